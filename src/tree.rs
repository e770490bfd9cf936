//! Tree-sharded counter for heavy fan-out.
//!
//! A single atomic word becomes a contention hot spot when thousands of
//! work items finish at once. The tree variant bounds every node's value
//! by `MAX_COUNT` and grows a tree of nodes instead: tokens decrement the
//! leaf they were issued from, and a leaf draining to zero forwards one
//! decrement to its parent. Only the root's zero-observation is terminal,
//! so completion still fires exactly once.

use core::ptr::NonNull;

use crate::{
    buffer::{StackedBuffer, TokenBuffer},
    counter::{CounterInit, Token},
    utils::*,
};

struct Node {
    parent: Option<NonNull<Node>>,
    count: AtomicUsize,
}

impl Node {
    fn alloc(parent: Option<NonNull<Node>>, count: usize) -> NonNull<Node> {
        #[cfg(all(test, not(loom)))]
        audit::LIVE_NODES.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
        Box::leak(Box::new(Node {
            parent,
            count: AtomicUsize::new(count),
        }))
        .into()
    }

    /// # Safety
    ///
    /// `node` must have been produced by [`Node::alloc`] and every token
    /// referencing it must already be consumed.
    unsafe fn free(node: NonNull<Node>) {
        #[cfg(all(test, not(loom)))]
        audit::LIVE_NODES.fetch_sub(1, core::sync::atomic::Ordering::Relaxed);
        drop(unsafe { Box::from_raw(node.as_ptr()) });
    }
}

/// Initializer for the tree-sharded counter.
///
/// `MAX_COUNT` bounds each node's value; smaller values shard harder.
#[derive(Clone, Copy, Debug, Default)]
pub struct TreeInit<const MAX_COUNT: usize>;

/// Token onto one node of a tree counter.
#[derive(Debug)]
pub struct TreeToken<const MAX_COUNT: usize> {
    node: NonNull<Node>,
}

// As for the flat token: the node outlives every token referencing it,
// its count is atomic, and its parent pointer is written once at
// allocation and read-only afterwards.
unsafe impl<const MAX_COUNT: usize> Send for TreeToken<MAX_COUNT> {}

impl<const MAX_COUNT: usize> Clone for TreeToken<MAX_COUNT> {
    #[inline]
    fn clone(&self) -> Self {
        Self { node: self.node }
    }
}

/// Allocates a chain of nodes carrying `count + 1` token obligations and
/// pushes the matching tokens onto `buffer`.
///
/// Nodes past the first are parented to the previously allocated one, so
/// the chain forwards exactly one decrement into `parent` when it drains.
fn push_chain<const MAX_COUNT: usize>(
    mut parent: Option<NonNull<Node>>,
    mut count: usize,
    buffer: &mut StackedBuffer<TreeToken<MAX_COUNT>>,
) {
    while MAX_COUNT < count {
        let node = Node::alloc(parent, MAX_COUNT);
        buffer.push_run(MAX_COUNT, TreeToken { node });
        parent = Some(node);
        count -= MAX_COUNT;
    }
    let node = Node::alloc(parent, count);
    buffer.push_run(count + 1, TreeToken { node });
}

impl<const MAX_COUNT: usize> CounterInit for TreeInit<MAX_COUNT> {
    type Token = TreeToken<MAX_COUNT>;

    fn init(&self, count: usize) -> StackedBuffer<TreeToken<MAX_COUNT>> {
        const { assert!(MAX_COUNT > 0, "MAX_COUNT must be at least 1") };
        let mut buffer = StackedBuffer::new();
        push_chain(None, count, &mut buffer);
        buffer
    }
}

impl<const MAX_COUNT: usize> Token for TreeToken<MAX_COUNT> {
    type Buffer = StackedBuffer<TreeToken<MAX_COUNT>>;

    fn decrement(mut self) -> bool {
        loop {
            // SAFETY: this token (or the child that just drained) still
            // holds one outstanding unit on the node, so it is live.
            let node = unsafe { self.node.as_ref() };
            if node.count.fetch_sub(1, atomic::Release) != 0 {
                return true;
            }
            acquire!(node.count);
            let parent = node.parent;
            // SAFETY: observing zero makes this the unique last access.
            unsafe { Node::free(self.node) };
            match parent {
                None => return false,
                Some(parent) => self.node = parent,
            }
        }
    }

    fn increase(&mut self, amount: usize) -> StackedBuffer<TreeToken<MAX_COUNT>> {
        let mut buffer = StackedBuffer::new();
        if amount == 0 {
            return buffer;
        }
        // SAFETY: the receiver holds an outstanding unit on the node.
        let node = unsafe { self.node.as_ref() };
        let mut current = node.count.load(atomic::Relaxed);
        let reserved = loop {
            if current == MAX_COUNT {
                // Node full: grow a chain under it. The chain carries
                // `amount + 1` obligations; this token immediately takes
                // one, donating its claim on the full node to the chain's
                // upward propagation. Net growth stays `amount`.
                push_chain(Some(self.node), amount, &mut buffer);
                *self = buffer.fetch();
                return buffer;
            }
            let step = amount.min(MAX_COUNT - current);
            match node.count.compare_exchange_weak(
                current,
                current + step,
                atomic::Relaxed,
                atomic::Relaxed,
            ) {
                Ok(_) => break step,
                Err(observed) => current = observed,
            }
        };
        if reserved == amount {
            buffer.push_run(reserved, self.clone());
        } else {
            // One reserved unit pays for the spill chain's propagation
            // into this node; the rest are handed out directly.
            if reserved > 1 {
                buffer.push_run(reserved - 1, self.clone());
            }
            push_chain(Some(self.node), amount - reserved, &mut buffer);
        }
        buffer
    }
}
