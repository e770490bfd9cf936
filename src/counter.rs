//! The completion-tracking counter contract and its flat implementation.
//!
//! A counter tracks how many decrements are still outstanding across one
//! invocation. Work items hold [`Token`]s onto it; the single decrement
//! that observes the counter at zero is the *terminal transition* and is
//! reported by returning `false`, after which the counter storage is gone.

use core::ptr::NonNull;

use crate::{
    buffer::{RepeatBuffer, TokenBuffer},
    utils::*,
};

/// A handle onto a live counter, owed exactly one consumption.
///
/// Every token must reach exactly one of [`decrement`](Token::decrement)
/// or be retired through the invocation machinery; dropping a token
/// without decrementing leaks the counter and the completion never fires.
///
/// Tokens are `Clone` so buffers can hand out duplicates against units
/// already reserved on the counter. Cloning does **not** reserve a new
/// unit; treat clones obtained outside a buffer as a contract violation.
pub trait Token: Clone + Send + 'static {
    /// The buffer type produced when this token family issues fresh tokens.
    type Buffer: TokenBuffer<Token = Self>;

    /// Consumes the token, releasing one outstanding unit.
    ///
    /// Returns `false` iff this call observed the counter at zero before
    /// decrementing, which is the terminal transition. The counter storage is
    /// freed on that path; all writes made before any `decrement` are
    /// visible to whoever observes the terminal transition.
    #[must_use]
    fn decrement(self) -> bool;

    /// Grows the outstanding count by exactly `amount` and returns a
    /// buffer yielding exactly `amount` fresh tokens.
    ///
    /// The receiver stays owed its own decrement, though it may be
    /// retargeted in place to equivalent storage. `amount == 0` returns
    /// an empty buffer and does not touch the counter.
    #[must_use]
    fn increase(&mut self, amount: usize) -> Self::Buffer;
}

/// Produces the counter for one invocation.
pub trait CounterInit {
    type Token: Token;

    /// Creates a counter with initial value `count` and returns a buffer
    /// of `count + 1` tokens.
    ///
    /// The off-by-one is the terminal-detection slack: the terminal
    /// transition is a decrement observing the counter at zero, so a
    /// counter serving `n` work items is initialized to `n - 1` and
    /// issues `n` tokens.
    fn init(&self, count: usize) -> <Self::Token as Token>::Buffer;
}

/// Initializer for the flat, single-word counter.
///
/// The default choice: one heap-allocated atomic shared by every token.
/// Fine for moderate fan-out; under very heavy contention prefer
/// [`TreeInit`](crate::tree::TreeInit).
#[derive(Clone, Copy, Debug, Default)]
pub struct FlatInit;

/// Token onto a flat counter.
#[derive(Debug)]
pub struct FlatToken {
    count: NonNull<AtomicUsize>,
}

// The pointee is an atomic and the deallocation protocol guarantees it is
// live for as long as any token exists.
unsafe impl Send for FlatToken {}

impl Clone for FlatToken {
    #[inline]
    fn clone(&self) -> Self {
        Self { count: self.count }
    }
}

impl CounterInit for FlatInit {
    type Token = FlatToken;

    fn init(&self, count: usize) -> RepeatBuffer<FlatToken> {
        let raw = Box::leak(Box::new(AtomicUsize::new(count)));
        RepeatBuffer::new(FlatToken { count: raw.into() }, count + 1)
    }
}

impl Token for FlatToken {
    type Buffer = RepeatBuffer<FlatToken>;

    fn decrement(self) -> bool {
        // SAFETY: the counter is freed only by the terminal decrement,
        // and this token proves one unit is still outstanding.
        let count = unsafe { self.count.as_ref() };
        if count.fetch_sub(1, atomic::Release) != 0 {
            return true;
        }
        acquire!(count);
        // SAFETY: observing zero means every other token has already been
        // consumed; this is the unique last access.
        drop(unsafe { Box::from_raw(self.count.as_ptr()) });
        false
    }

    fn increase(&mut self, amount: usize) -> RepeatBuffer<FlatToken> {
        if amount > 0 {
            // SAFETY: as in `decrement`, the storage outlives this token.
            unsafe { self.count.as_ref() }.fetch_add(amount, atomic::Relaxed);
        }
        RepeatBuffer::new(self.clone(), amount)
    }
}
