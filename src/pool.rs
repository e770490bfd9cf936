//! Fixed-size thread-pool portal.

use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex},
    thread,
};

use tracing::{debug, trace};

use crate::portal::{Portal, PortalError, ThreadRegistry, Work};

#[derive(Default)]
struct PoolState {
    queue: VecDeque<Work>,
    shutdown: bool,
}

struct PoolCore {
    state: Mutex<PoolState>,
    available: Condvar,
}

impl PoolCore {
    fn new() -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            available: Condvar::new(),
        }
    }

    /// Worker body: drain the queue, sleep on the condvar, exit once the
    /// shutdown flag is up and the queue is empty.
    fn work_loop(&self) {
        trace!("pool worker started");
        let mut state = self.state.lock().expect("pool poisoned");
        loop {
            while let Some(task) = state.queue.pop_front() {
                drop(state);
                task();
                state = self.state.lock().expect("pool poisoned");
            }
            if state.shutdown {
                break;
            }
            state = self.available.wait(state).expect("pool poisoned");
        }
        trace!("pool worker exiting");
    }

    fn push(&self, work: Work) {
        {
            let mut state = self.state.lock().expect("pool poisoned");
            assert!(!state.shutdown, "dispatch on a shut-down pool");
            state.queue.push_back(work);
        }
        self.available.notify_one();
    }

    fn shutdown(&self) {
        {
            let mut state = self.state.lock().expect("pool poisoned");
            state.shutdown = true;
        }
        self.available.notify_all();
    }
}

/// Tells the workers to stop once the last portal clone is gone.
struct PoolShutdown {
    core: Arc<PoolCore>,
}

impl Drop for PoolShutdown {
    fn drop(&mut self) {
        debug!("shutting down pool");
        self.core.shutdown();
    }
}

/// Portal backed by a fixed set of worker threads and an unbounded FIFO
/// queue.
///
/// The portal value is cheap to clone; clones share the pool. Workers
/// drain the remaining queue and exit when the last clone is dropped.
/// The worker threads themselves keep the pool storage alive, so dropping
/// the portal never races a running task.
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use convoke::{Callable, Lineup, PoolPortal, procedure, sync_invoke};
///
/// let pool = PoolPortal::new(2).unwrap();
/// let hits = Arc::new(AtomicUsize::new(0));
/// sync_invoke(
///     || (),
///     Lineup::repeat_with(8, || {
///         let hits = hits.clone();
///         Callable::new(pool.clone(), procedure(move || {
///             hits.fetch_add(1, Ordering::Relaxed);
///         }))
///     }),
/// );
/// assert_eq!(hits.load(Ordering::Relaxed), 8);
/// # drop(pool);
/// # convoke::ThreadRegistry::global().drain();
/// ```
#[derive(Clone)]
pub struct PoolPortal {
    shutdown: Arc<PoolShutdown>,
}

impl PoolPortal {
    /// Builds a pool of `workers` named threads registered with the
    /// global [`ThreadRegistry`].
    pub fn new(workers: usize) -> Result<Self, PortalError> {
        if workers == 0 {
            return Err(PortalError::NoWorkers);
        }
        let core = Arc::new(PoolCore::new());
        for i in 0..workers {
            let core = Arc::clone(&core);
            let handle = thread::Builder::new()
                .name(format!("convoke-pool-{i}"))
                .spawn(move || core.work_loop())?;
            ThreadRegistry::global().adopt(handle);
        }
        Ok(Self {
            shutdown: Arc::new(PoolShutdown { core }),
        })
    }

    /// Builds a pool whose worker loops are launched through `launcher`
    /// instead of dedicated named threads.
    pub fn with_launcher(workers: usize, launcher: &dyn Portal) -> Result<Self, PortalError> {
        if workers == 0 {
            return Err(PortalError::NoWorkers);
        }
        let core = Arc::new(PoolCore::new());
        for _ in 0..workers {
            let core = Arc::clone(&core);
            launcher.dispatch(Box::new(move || core.work_loop()));
        }
        Ok(Self {
            shutdown: Arc::new(PoolShutdown { core }),
        })
    }
}

impl Portal for PoolPortal {
    fn dispatch(&self, work: Work) {
        self.shutdown.core.push(work);
    }
}

impl core::fmt::Debug for PoolPortal {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PoolPortal").finish_non_exhaustive()
    }
}
