//! Invocation entry points.
//!
//! An invocation takes a group of callers, sizes a counter to the total
//! work count, hands one token per work item to the callables, and wires
//! a completion callback that fires exactly once when the last item (and
//! anything it forked) has finished.

use std::sync::Arc;

use crate::{
    caller::Caller,
    counter::{CounterInit, FlatInit, FlatToken, Token},
    semaphore::{DefaultSemaphore, Semaphore},
};

/// The shared completion callback of one invocation.
///
/// Cloned to every work item; invoked exactly once, on whichever thread
/// performs the terminal decrement. All writes made by completed work
/// items happen-before the callback body.
#[derive(Clone)]
pub struct Completion(Arc<dyn Fn() + Send + Sync>);

impl Completion {
    pub fn new(callback: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }

    #[inline]
    pub(crate) fn invoke(&self) {
        (self.0)();
    }
}

impl core::fmt::Debug for Completion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Completion")
    }
}

/// Retires a work item's token; fires the completion on the terminal
/// transition.
pub(crate) fn join<T: Token>(token: T, completion: &Completion) {
    if !token.decrement() {
        completion.invoke();
    }
}

fn dispatch<I, C>(init: &I, completion: &Completion, callers: C)
where
    I: CounterInit,
    C: Caller<I::Token>,
{
    let total = callers.size();
    if total == 0 {
        completion.invoke();
        return;
    }
    let mut buffer = init.init(total - 1);
    callers.call(&mut buffer, completion);
}

/// Launches `callers` and returns immediately; `callback` fires exactly
/// once after every work item (and everything forked from them) has
/// finished.
///
/// An empty caller composition completes immediately on the calling
/// thread.
pub fn async_invoke<C>(callback: impl Fn() + Send + Sync + 'static, callers: C)
where
    C: Caller<FlatToken>,
{
    async_invoke_with(FlatInit, callback, callers);
}

/// [`async_invoke`] with an explicit counter initializer.
pub fn async_invoke_with<I, C>(init: I, callback: impl Fn() + Send + Sync + 'static, callers: C)
where
    I: CounterInit,
    C: Caller<I::Token>,
{
    let completion = Completion::new(callback);
    dispatch(&init, &completion, callers);
}

struct WaitOnDrop<S: Semaphore>(Arc<S>);

impl<S: Semaphore> Drop for WaitOnDrop<S> {
    fn drop(&mut self) {
        self.0.wait();
    }
}

/// Launches `callers`, runs `runnable` on the current thread, then blocks
/// until every work item has finished. Returns `runnable`'s result.
///
/// The wait happens on the exit path even if `runnable` panics, so the
/// unwinding thread never outpaces the work it started.
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use convoke::{Callable, Lineup, ThreadPortal, procedure, sync_invoke};
///
/// let done = Arc::new(AtomicUsize::new(0));
/// sync_invoke(
///     || (),
///     Lineup::repeat_with(10, || {
///         let done = done.clone();
///         Callable::new(ThreadPortal::daemon(), procedure(move || {
///             done.fetch_add(1, Ordering::Relaxed);
///         }))
///     }),
/// );
/// assert_eq!(done.load(Ordering::Relaxed), 10);
/// ```
pub fn sync_invoke<R>(runnable: impl FnOnce() -> R, callers: impl Caller<FlatToken>) -> R {
    sync_invoke_with(FlatInit, DefaultSemaphore::new(), runnable, callers)
}

/// [`sync_invoke`] with explicit counter initializer and semaphore.
pub fn sync_invoke_with<I, S, R>(
    init: I,
    semaphore: S,
    runnable: impl FnOnce() -> R,
    callers: impl Caller<I::Token>,
) -> R
where
    I: CounterInit,
    S: Semaphore + Send + Sync + 'static,
{
    let semaphore = Arc::new(semaphore);
    let releaser = Arc::clone(&semaphore);
    async_invoke_with(init, move || releaser.release(), callers);
    let _blocker = WaitOnDrop(semaphore);
    runnable()
}

/// Adds `callers` to a live invocation from inside one of its work items.
///
/// Grows the counter by the callers' total size and dispatches them with
/// the same completion; the forking item's own token stays owed, so the
/// completion cannot fire before both the forker and the forked work have
/// finished. Usually reached through
/// [`ForkScope::fork`](crate::procedure::ForkScope::fork).
pub fn fork<T: Token>(token: &mut T, completion: &Completion, callers: impl Caller<T>) {
    let added = callers.size();
    let mut buffer = token.increase(added);
    callers.call(&mut buffer, completion);
}
