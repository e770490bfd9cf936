//! User work in canonical form.
//!
//! A procedure is the user's action wrapped to the one signature the
//! library dispatches: it receives a [`ForkScope`] carrying the work
//! item's token and the invocation's completion, and it must not retire
//! the token itself; the enclosing callable joins after the last phase.

use crate::{
    counter::Token,
    invoke::{self, Completion},
};

/// Execution context of a running work item.
///
/// Borrows the item's token and the shared completion so the body can
/// [`fork`](Self::fork) additional work into the same invocation.
#[derive(Debug)]
pub struct ForkScope<'a, T: Token> {
    token: &'a mut T,
    completion: &'a Completion,
}

impl<'a, T: Token> ForkScope<'a, T> {
    pub(crate) fn new(token: &'a mut T, completion: &'a Completion) -> Self {
        Self { token, completion }
    }

    /// Spawns `callers` into the live invocation.
    ///
    /// The completion will not fire until the forked work, and anything
    /// it forks in turn, has finished, in addition to the current item.
    pub fn fork(&mut self, callers: impl crate::caller::Caller<T>) {
        invoke::fork(self.token, self.completion, callers);
    }
}

/// A boxed procedure in canonical form.
pub type Procedure<T> = Box<dyn FnOnce(&mut ForkScope<'_, T>) + Send>;

/// Wraps a plain action into a procedure; the scope is not exposed.
///
/// ```
/// use convoke::{Callable, SerialPortal, Single, procedure, sync_invoke};
///
/// sync_invoke(
///     || (),
///     Single::new(Callable::new(SerialPortal, procedure(|| println!("hi")))),
/// );
/// ```
pub fn procedure<T: Token>(action: impl FnOnce() + Send + 'static) -> Procedure<T> {
    Box::new(move |_scope: &mut ForkScope<'_, T>| action())
}

/// Wraps an action that needs the scope, typically to fork.
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use convoke::{Callable, SerialPortal, Single, procedure, scoped, sync_invoke};
///
/// let seen = Arc::new(AtomicUsize::new(0));
/// let probe = seen.clone();
/// sync_invoke(
///     || (),
///     Single::new(Callable::new(
///         SerialPortal,
///         scoped(move |scope| {
///             for _ in 0..3 {
///                 let seen = seen.clone();
///                 scope.fork(Single::new(Callable::new(
///                     SerialPortal,
///                     procedure(move || {
///                         seen.fetch_add(1, Ordering::Relaxed);
///                     }),
///                 )));
///             }
///         }),
///     )),
/// );
/// assert_eq!(probe.load(Ordering::Relaxed), 3);
/// ```
pub fn scoped<T: Token>(
    action: impl FnOnce(&mut ForkScope<'_, T>) + Send + 'static,
) -> Procedure<T> {
    Box::new(action)
}
