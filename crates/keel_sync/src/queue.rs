//! # Bounded Blocking Queue
//!
//! Fixed-capacity FIFO shared by any number of producers and consumers.
//!
//! ## Architecture
//!
//! ```text
//!   Producer 1 ──┐                               ┌──> Consumer 1
//!   Producer 2 ──┼──> [ Mutex<VecDeque<T>> ] ────┼──> Consumer 2
//!   Producer N ──┘     not_full │ not_empty      └──> Consumer M
//!                      (Condvar)  (Condvar)
//! ```
//!
//! One mutex guards the store. Producers park on `not_full`, consumers on
//! `not_empty`, and each successful operation wakes exactly one waiter on the
//! opposite side.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::PutError;

/// A bounded, blocking, multi-producer multi-consumer FIFO queue.
///
/// The queue has no closed state. Shutdown is signalled in-band, see
/// [`crate::shutdown`].
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use keel_sync::BoundedQueue;
///
/// let queue = BoundedQueue::new(1);
/// queue.put(7);
/// assert!(queue.put_timeout(8, Duration::from_millis(1)).is_err());
/// assert_eq!(queue.take_timeout(Duration::from_millis(1)), Some(7));
/// ```
pub struct BoundedQueue<T> {
    /// The stored items, head at the front.
    items: Mutex<VecDeque<T>>,
    /// Signalled when an item is appended.
    not_empty: Condvar,
    /// Signalled when an item is removed.
    not_full: Condvar,
    /// Maximum number of stored items.
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Creates an empty queue holding at most `capacity` items.
    ///
    /// The backing buffer is allocated upfront.
    ///
    /// # Panics
    ///
    /// Panics if capacity is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than zero");

        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Returns the maximum number of items.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of items currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Returns true if no item is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Returns true if a `put` would block.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.items.lock().len() >= self.capacity
    }

    /// Returns how many more items fit before producers block.
    #[must_use]
    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.items.lock().len()
    }

    /// Appends `item`, blocking while the queue is full.
    pub fn put(&self, item: T) {
        let mut items = self.items.lock();
        self.not_full
            .wait_while(&mut items, |items| items.len() >= self.capacity);
        self.push(items, item);
    }

    /// Appends `item`, waiting at most `timeout` for space.
    ///
    /// # Errors
    ///
    /// Returns [`PutError::Timeout`] carrying the item if the queue stayed
    /// full. The queue is not modified in that case.
    pub fn put_timeout(&self, item: T, timeout: Duration) -> Result<(), PutError<T>> {
        let mut items = self.items.lock();
        let waited = self
            .not_full
            .wait_while_for(&mut items, |items| items.len() >= self.capacity, timeout);

        // Space may have opened right at the deadline.
        if waited.timed_out() && items.len() >= self.capacity {
            tracing::trace!(capacity = self.capacity, ?timeout, "queue put timed out");
            return Err(PutError::Timeout(item));
        }
        self.push(items, item);
        Ok(())
    }

    /// Appends `item` only if there is space right now.
    ///
    /// # Errors
    ///
    /// Returns [`PutError::Full`] carrying the item if the queue is full.
    pub fn try_put(&self, item: T) -> Result<(), PutError<T>> {
        let items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(PutError::Full(item));
        }
        self.push(items, item);
        Ok(())
    }

    /// Removes the head item, blocking while the queue is empty.
    pub fn take(&self) -> T {
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                drop(items);
                self.not_full.notify_one();
                return item;
            }
            self.not_empty.wait(&mut items);
        }
    }

    /// Removes the head item, waiting at most `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout without touching the queue.
    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        let mut items = self.items.lock();
        let waited = self
            .not_empty
            .wait_while_for(&mut items, |items| items.is_empty(), timeout);

        let item = items.pop_front();
        drop(items);
        if item.is_some() {
            self.not_full.notify_one();
        } else if waited.timed_out() {
            tracing::trace!(?timeout, "queue take timed out");
        }
        item
    }

    /// Removes the head item if one is present.
    pub fn try_take(&self) -> Option<T> {
        let item = self.items.lock().pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Appends under an already-held lock, then wakes one consumer.
    fn push(&self, mut items: parking_lot::MutexGuard<'_, VecDeque<T>>, item: T) {
        items.push_back(item);
        debug_assert!(items.len() <= self.capacity);
        drop(items);
        self.not_empty.notify_one();
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
