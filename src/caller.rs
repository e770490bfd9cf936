//! Groups of callables with a known count.
//!
//! A caller owns callables and hands each one a token from the
//! invocation's buffer. The counter is sized from `size()`, so a caller
//! must consume exactly that many tokens, no more and no fewer.

use std::num::NonZeroUsize;

use crate::{
    buffer::TokenBuffer,
    callable::Callable,
    counter::{FlatToken, Token},
    invoke::{self, Completion},
    portal::{Portal, PortalHandle},
    procedure::procedure,
};

/// An iterable bundle of callables with a known count.
///
/// Tuples of callers compose into one caller (sizes add, dispatch is in
/// declaration order), as does `Vec<C>` for a dynamic number of
/// same-typed callers.
pub trait Caller<T: Token> {
    /// Exact number of tokens [`call`](Self::call) will consume.
    fn size(&self) -> usize;

    /// Fetches one token per callable and dispatches them all.
    fn call(self, buffer: &mut T::Buffer, completion: &Completion);
}

/// Caller of exactly one callable.
#[derive(Debug)]
pub struct Single<T: Token = FlatToken>(Callable<T>);

impl<T: Token> Single<T> {
    pub fn new(callable: Callable<T>) -> Self {
        Self(callable)
    }
}

impl<T: Token> Caller<T> for Single<T> {
    fn size(&self) -> usize {
        1
    }

    fn call(self, buffer: &mut T::Buffer, completion: &Completion) {
        self.0.invoke(buffer.fetch(), completion.clone());
    }
}

/// Ordered list of callables, dispatched one token each.
#[derive(derive_more::Debug)]
pub struct Lineup<T: Token = FlatToken> {
    #[debug("{} item(s)", callables.len())]
    callables: Vec<Callable<T>>,
}

impl<T: Token> Default for Lineup<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Token> Lineup<T> {
    pub fn new() -> Self {
        Self {
            callables: Vec::new(),
        }
    }

    pub fn push(&mut self, callable: Callable<T>) {
        self.callables.push(callable);
    }

    /// Builds a lineup of `count` callables from a factory closure.
    pub fn repeat_with(count: usize, mut factory: impl FnMut() -> Callable<T>) -> Self {
        Self {
            callables: (0..count).map(|_| factory()).collect(),
        }
    }
}

impl<T: Token> FromIterator<Callable<T>> for Lineup<T> {
    fn from_iter<I: IntoIterator<Item = Callable<T>>>(iter: I) -> Self {
        Self {
            callables: iter.into_iter().collect(),
        }
    }
}

impl<T: Token> Extend<Callable<T>> for Lineup<T> {
    fn extend<I: IntoIterator<Item = Callable<T>>>(&mut self, iter: I) {
        self.callables.extend(iter);
    }
}

impl<T: Token> Caller<T> for Lineup<T> {
    fn size(&self) -> usize {
        self.callables.len()
    }

    fn call(self, buffer: &mut T::Buffer, completion: &Completion) {
        for callable in self.callables {
            callable.invoke(buffer.fetch(), completion.clone());
        }
    }
}

/// List of callables whose *dispatch* is itself parallelized.
///
/// Dispatching many items from one thread serializes on the dispatching
/// loop; a partitioned caller splits its list into contiguous batches and
/// pushes each batch through `portal`, so the dispatch fan-out happens on
/// up to `concurrency` workers. `call` returns once every item has been
/// dispatched (not completed).
///
/// The batches are pushed through a nested synchronous invocation on
/// `portal`; a pool with a single worker cannot host that fan-out without
/// deadlocking on itself; give the partitioned caller threads or a wider
/// pool.
#[derive(derive_more::Debug)]
pub struct Partitioned<T: Token = FlatToken> {
    #[debug("{} item(s)", callables.len())]
    callables: Vec<Callable<T>>,
    #[debug(skip)]
    portal: PortalHandle,
    concurrency: usize,
}

impl<T: Token> Partitioned<T> {
    /// Batch dispatch through `portal` at the host's available
    /// parallelism.
    pub fn new(portal: impl Portal + 'static) -> Self {
        let concurrency = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self::with_concurrency(portal, concurrency)
    }

    /// Batch dispatch through `portal` with an explicit batch count.
    pub fn with_concurrency(portal: impl Portal + 'static, concurrency: usize) -> Self {
        Self {
            callables: Vec::new(),
            portal: std::sync::Arc::new(portal),
            concurrency: concurrency.max(1),
        }
    }

    pub fn push(&mut self, callable: Callable<T>) {
        self.callables.push(callable);
    }
}

impl<T: Token> Extend<Callable<T>> for Partitioned<T> {
    fn extend<I: IntoIterator<Item = Callable<T>>>(&mut self, iter: I) {
        self.callables.extend(iter);
    }
}

impl<T: Token> Caller<T> for Partitioned<T> {
    fn size(&self) -> usize {
        self.callables.len()
    }

    fn call(self, buffer: &mut T::Buffer, completion: &Completion) {
        let total = self.callables.len();
        if total == 0 {
            return;
        }
        // All tokens come out of the shared buffer up front; the batches
        // own their (callable, token) pairs outright.
        let items: Vec<(Callable<T>, T)> = self
            .callables
            .into_iter()
            .map(|callable| (callable, buffer.fetch()))
            .collect();
        let mut items = items.into_iter();

        let batches = self.concurrency.min(total);
        let base = total / batches;
        let remainder = total % batches;
        let mut lineup = Lineup::new();
        for index in 0..batches {
            let take = base + usize::from(index < remainder);
            let chunk: Vec<(Callable<T>, T)> = items.by_ref().take(take).collect();
            let completion = completion.clone();
            lineup.push(Callable::new(
                self.portal.clone(),
                procedure(move || {
                    for (callable, token) in chunk {
                        callable.invoke(token, completion.clone());
                    }
                }),
            ));
        }
        debug_assert!(items.next().is_none());
        invoke::sync_invoke(|| (), lineup);
    }
}

macro_rules! impl_caller_for_tuple {
    ($($name:ident)+) => {
        #[allow(non_snake_case)]
        impl<T: Token, $($name: Caller<T>),+> Caller<T> for ($($name,)+) {
            fn size(&self) -> usize {
                let ($($name,)+) = self;
                0 $(+ $name.size())+
            }

            fn call(self, buffer: &mut T::Buffer, completion: &Completion) {
                let ($($name,)+) = self;
                $($name.call(buffer, completion);)+
            }
        }
    };
}

impl_caller_for_tuple!(A);
impl_caller_for_tuple!(A B);
impl_caller_for_tuple!(A B C);
impl_caller_for_tuple!(A B C D);
impl_caller_for_tuple!(A B C D E);
impl_caller_for_tuple!(A B C D E F);
impl_caller_for_tuple!(A B C D E F G);
impl_caller_for_tuple!(A B C D E F G H);

impl<T: Token, C: Caller<T>> Caller<T> for Vec<C> {
    fn size(&self) -> usize {
        self.iter().map(Caller::size).sum()
    }

    fn call(self, buffer: &mut T::Buffer, completion: &Completion) {
        for caller in self {
            caller.call(buffer, completion);
        }
    }
}
