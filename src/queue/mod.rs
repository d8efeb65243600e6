//! Hand-off queues holding idle resources, resource slots and blocked borrowers.

mod bounded;
mod fair;

use std::time::Instant;

pub use self::{bounded::BoundedQueue, fair::FairQueue};

/// How long a consumer is prepared to wait in [`WaitQueue::poll`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    /// Never block.
    Never,
    /// Block until the deadline, or forever if [`None`].
    Until(Option<Instant>),
}

/// Result of [`WaitQueue::poll`].
#[derive(Debug, PartialEq, Eq)]
pub enum Poll<T> {
    /// An item was taken from the queue or handed over directly.
    Item(T),
    /// A slot was reserved for the caller, who must fill it with a new item or
    /// [release](WaitQueue::release) it.
    Slot,
    /// Nothing became available in time.
    TimedOut,
    /// Queue has been closed.
    Closed,
}

/// Bounded queue of idle items that blocked consumers can wait on.
///
/// Besides stored items the queue counts slots: one per live item, stored or taken out. A
/// consumer finding no stored item reserves a free slot, if any, under the same lock that
/// registers it as a waiter, so a slot released meanwhile is never missed.
pub trait WaitQueue<T: Clone>: Send + Sync {
    /// Store an item or hand it directly to a blocked consumer.
    ///
    /// # Errors
    ///
    /// Gives the item back if the queue is full or closed.
    fn offer(&self, item: T) -> Result<(), T>;

    /// Take a stored item or reserve a free slot, waiting as long as `wait` allows.
    fn poll(&self, wait: Wait) -> Poll<T>;

    /// Take a stored item if one is immediately available.
    fn try_poll(&self) -> Option<T>;

    /// Reserve a free slot without taking stored items or blocking.
    fn reserve(&self) -> bool;

    /// Give a slot back: it goes to a blocked consumer, or becomes free.
    fn release(&self);

    /// Number of reserved slots.
    fn size(&self) -> usize;

    /// Remove and return all stored items matching the predicate.
    fn remove(&self, pred: &mut dyn FnMut(&T) -> bool) -> Vec<T>;

    /// Copy of all stored items, oldest first.
    fn snapshot(&self) -> Vec<T>;

    /// Number of stored items.
    fn len(&self) -> usize;

    /// Whether no items are stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of blocked consumers.
    fn waiting(&self) -> usize;

    /// Refuse further offers and wake every blocked consumer with [`Poll::Closed`].
    ///
    /// Stored items stay in place and can still be taken out.
    fn close(&self);

    /// Whether [`Self::close`] was called.
    fn is_closed(&self) -> bool;
}
