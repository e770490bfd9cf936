//! Structured concurrent invocation with precise completion tracking.
//!
//! Declare a set of logically concurrent work items, launch them through a
//! pluggable execution substrate ([`SerialPortal`], [`ThreadPortal`],
//! [`PoolPortal`], or your own [`Portal`]), and get exactly one completion
//! signal once every item, including work [forked](ForkScope::fork) at
//! runtime, has finished. Completion is tracked by a lock-free atomic
//! counter: flat by default, [tree-sharded](TreeInit) under heavy fan-out.
//!
//! # Usage
//!
//! ## Synchronous invocation
//!
//! [`sync_invoke`] resumes the caller once all work has finished:
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! use convoke::{Callable, Lineup, ThreadPortal, procedure, sync_invoke};
//!
//! let hits = Arc::new(AtomicUsize::new(0));
//! sync_invoke(
//!     || (),
//!     Lineup::repeat_with(10, || {
//!         let hits = hits.clone();
//!         Callable::new(ThreadPortal::daemon(), procedure(move || {
//!             hits.fetch_add(1, Ordering::Relaxed);
//!         }))
//!     }),
//! );
//! assert_eq!(hits.load(Ordering::Relaxed), 10);
//! ```
//!
//! ## Asynchronous invocation
//!
//! [`async_invoke`] returns immediately; the callback fires on whichever
//! thread performs the last decrement:
//!
//! ```rust
//! use std::sync::mpsc;
//!
//! use convoke::{Callable, Single, ThreadPortal, async_invoke, procedure};
//!
//! let (done, completed) = mpsc::channel();
//! async_invoke(
//!     move || done.send(()).unwrap(),
//!     Single::new(Callable::new(
//!         ThreadPortal::daemon(),
//!         procedure(|| println!("working")),
//!     )),
//! );
//! completed.recv().unwrap();
//! ```
//!
//! ## Forking
//!
//! Work items may spawn further work into the same invocation through
//! their [`ForkScope`]; the completion waits for the whole tree:
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! use convoke::{Callable, Single, ThreadPortal, procedure, scoped, sync_invoke};
//!
//! let finished = Arc::new(AtomicUsize::new(0));
//! let probe = finished.clone();
//! sync_invoke(
//!     || (),
//!     Single::new(Callable::new(
//!         ThreadPortal::daemon(),
//!         scoped(move |scope| {
//!             for _ in 0..3 {
//!                 let finished = finished.clone();
//!                 scope.fork(Single::new(Callable::new(
//!                     ThreadPortal::daemon(),
//!                     procedure(move || {
//!                         finished.fetch_add(1, Ordering::Relaxed);
//!                     }),
//!                 )));
//!             }
//!         }),
//!     )),
//! );
//! assert_eq!(probe.load(Ordering::Relaxed), 3);
//! ```

mod buffer;
mod callable;
mod caller;
mod counter;
mod invoke;
mod pool;
mod portal;
mod procedure;
mod semaphore;
mod tree;
mod utils;

pub use crate::{
    buffer::{RepeatBuffer, StackedBuffer, TokenBuffer},
    callable::Callable,
    caller::{Caller, Lineup, Partitioned, Single},
    counter::{CounterInit, FlatInit, FlatToken, Token},
    invoke::{Completion, async_invoke, async_invoke_with, fork, sync_invoke, sync_invoke_with},
    pool::PoolPortal,
    portal::{Portal, PortalError, PortalHandle, SerialPortal, ThreadPortal, ThreadRegistry, Work},
    procedure::{ForkScope, Procedure, procedure, scoped},
    semaphore::{Semaphore, SpinSemaphore, SyncSemaphore},
    tree::{TreeInit, TreeToken},
};

#[cfg(not(loom))]
pub use crate::semaphore::ParkSemaphore;

#[cfg(test)]
mod tests;
