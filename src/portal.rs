//! Execution substrates.
//!
//! A portal decides *where* a work item runs: inline on the calling
//! thread, on a fresh thread, or on a pooled worker
//! ([`PoolPortal`](crate::pool::PoolPortal)). The library never imposes
//! ordering between items a portal launches; joining is the counter's
//! job.

use std::{
    io,
    sync::{Arc, Mutex, OnceLock},
    thread::JoinHandle,
};

use thiserror::Error;
use tracing::{debug, warn};

/// A unit of work handed to a portal.
pub type Work = Box<dyn FnOnce() + Send>;

/// Arranges for work to run, somewhere, some time after the call.
///
/// Contract:
/// - the portal returns promptly (the serial portal, which runs inline,
///   is the deliberate exception);
/// - a dispatched item is never dropped: it runs to completion, or the
///   substrate keeps the process alive long enough for it to;
/// - no ordering is provided between dispatched items.
pub trait Portal: Send + Sync {
    fn dispatch(&self, work: Work);
}

/// Shared, type-erased portal handle.
pub type PortalHandle = Arc<dyn Portal>;

impl<P: Portal + ?Sized> Portal for Arc<P> {
    #[inline]
    fn dispatch(&self, work: Work) {
        (**self).dispatch(work);
    }
}

/// Failure to stand up an execution substrate.
#[derive(Debug, Error)]
pub enum PortalError {
    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread")]
    Spawn(#[from] io::Error),
    /// A pool was requested with zero workers, which would silently drop
    /// every dispatched item.
    #[error("thread pool requires at least one worker")]
    NoWorkers,
}

/// Runs work inline, synchronously, on the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialPortal;

impl Portal for SerialPortal {
    #[inline]
    fn dispatch(&self, work: Work) {
        work();
    }
}

/// Runs each work item on a fresh OS thread.
#[derive(Clone, Copy, Debug)]
pub struct ThreadPortal {
    daemon: bool,
}

impl ThreadPortal {
    /// Fresh detached threads; the process will not wait for them.
    pub fn daemon() -> Self {
        Self { daemon: true }
    }

    /// Fresh threads registered with the global [`ThreadRegistry`], to be
    /// joined by [`ThreadRegistry::drain`] before process exit.
    pub fn joined() -> Self {
        Self { daemon: false }
    }
}

impl Portal for ThreadPortal {
    fn dispatch(&self, work: Work) {
        let handle = std::thread::spawn(work);
        if !self.daemon {
            ThreadRegistry::global().adopt(handle);
        }
    }
}

/// Process-wide registry of threads that must be joined before exit.
///
/// Rust has no static destructors, so draining is explicit: call
/// [`drain`](Self::drain) once all portals that feed the registry are
/// done, in particular after dropping every
/// [`PoolPortal`](crate::pool::PoolPortal) whose workers live here, or
/// `drain` will wait on workers that have not been told to stop.
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadRegistry {
    pub fn global() -> &'static ThreadRegistry {
        static GLOBAL: OnceLock<ThreadRegistry> = OnceLock::new();
        GLOBAL.get_or_init(ThreadRegistry::default)
    }

    /// Takes ownership of a running thread.
    pub fn adopt(&self, handle: JoinHandle<()>) {
        self.threads
            .lock()
            .expect("thread registry poisoned")
            .push(handle);
    }

    /// Joins every registered thread, including ones registered while
    /// draining.
    pub fn drain(&self) {
        loop {
            let batch = std::mem::take(
                &mut *self.threads.lock().expect("thread registry poisoned"),
            );
            if batch.is_empty() {
                break;
            }
            debug!(threads = batch.len(), "draining thread registry");
            for handle in batch {
                if handle.join().is_err() {
                    warn!("registered thread panicked");
                }
            }
        }
    }
}
