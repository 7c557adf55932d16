//! # Ordered Locking
//!
//! Two threads locking the same two resources in opposite orders can each
//! end up holding one lock and waiting forever for the other. Taking locks in
//! one global order removes the cycle:
//!
//! ```text
//!   T1: transfer(A -> B)    lock min(A, B) ──> lock max(A, B)
//!   T2: transfer(B -> A)    lock min(A, B) ──> lock max(A, B)   (waits on the first lock)
//! ```
//!
//! The order comes from each resource's key, which must be unique among the
//! resources that are ever locked together.

use std::cmp::Ordering;
use std::fmt::Debug;
use std::ptr;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use crate::error::{SyncError, SyncResult};

/// A value behind its own lock, ordered by `key`.
#[derive(Debug)]
pub struct OrderedResource<K, T> {
    key: K,
    data: Mutex<T>,
}

impl<K, T> OrderedResource<K, T> {
    /// Wraps `data` under the ordering key `key`.
    pub fn new(key: K, data: T) -> Self {
        Self {
            key,
            data: Mutex::new(data),
        }
    }

    /// Returns the ordering key.
    #[inline]
    pub const fn key(&self) -> &K {
        &self.key
    }

    /// Locks this resource alone.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.data.lock()
    }

    /// Locks this resource alone, waiting at most `timeout`.
    pub fn try_lock_for(&self, timeout: Duration) -> Option<MutexGuard<'_, T>> {
        self.data.try_lock_for(timeout)
    }

    /// Consumes the resource, returning the value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

/// Which side of a pair holds the lower key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairOrder {
    /// The first argument is locked first.
    FirstLow,
    /// The second argument is locked first.
    SecondLow,
}

/// Locks pairs of [`OrderedResource`]s lowest key first.
#[derive(Clone, Copy, Debug, Default)]
pub struct OrderedLockStrategy;

impl OrderedLockStrategy {
    /// Decides which of `first` and `second` must be locked first.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SameResource`] if both are the same resource and
    /// [`SyncError::KeyCollision`] if two distinct resources share a key.
    pub fn order<K, T>(
        first: &OrderedResource<K, T>,
        second: &OrderedResource<K, T>,
    ) -> SyncResult<PairOrder>
    where
        K: Ord + Debug,
    {
        if ptr::eq(first, second) {
            return Err(SyncError::SameResource);
        }
        match first.key.cmp(&second.key) {
            Ordering::Less => Ok(PairOrder::FirstLow),
            Ordering::Greater => Ok(PairOrder::SecondLow),
            Ordering::Equal => Err(SyncError::KeyCollision(format!("{:?}", first.key))),
        }
    }

    /// Locks both resources in key order and returns the guards in argument
    /// order, so callers keep their logical roles (source, target).
    ///
    /// # Errors
    ///
    /// Same as [`OrderedLockStrategy::order`]. No lock is taken on error.
    pub fn lock_pair<'a, K, T>(
        &self,
        first: &'a OrderedResource<K, T>,
        second: &'a OrderedResource<K, T>,
    ) -> SyncResult<(MutexGuard<'a, T>, MutexGuard<'a, T>)>
    where
        K: Ord + Debug,
    {
        Ok(match Self::order(first, second)? {
            PairOrder::FirstLow => {
                let low = first.data.lock();
                let high = second.data.lock();
                (low, high)
            }
            PairOrder::SecondLow => {
                let low = second.data.lock();
                let high = first.data.lock();
                (high, low)
            }
        })
    }

    /// Like [`OrderedLockStrategy::lock_pair`], giving up once `timeout` has
    /// passed. Both locks share the one deadline.
    ///
    /// # Errors
    ///
    /// Same as [`OrderedLockStrategy::order`], or [`SyncError::Timeout`] if
    /// either lock stayed held. Nothing is left locked on error.
    pub fn lock_pair_timeout<'a, K, T>(
        &self,
        first: &'a OrderedResource<K, T>,
        second: &'a OrderedResource<K, T>,
        timeout: Duration,
    ) -> SyncResult<(MutexGuard<'a, T>, MutexGuard<'a, T>)>
    where
        K: Ord + Debug,
    {
        let order = Self::order(first, second)?;
        let (low, high) = match order {
            PairOrder::FirstLow => (first, second),
            PairOrder::SecondLow => (second, first),
        };

        let started = Instant::now();
        let expired = || SyncError::timeout("ordered.lock_pair", timeout);
        let low = low.data.try_lock_for(timeout).ok_or_else(expired)?;
        let remaining = timeout.saturating_sub(started.elapsed());
        // On failure `low` drops here, unlocking it.
        let high = high.data.try_lock_for(remaining).ok_or_else(expired)?;

        Ok(match order {
            PairOrder::FirstLow => (low, high),
            PairOrder::SecondLow => (high, low),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_order_by_key() {
        let a = OrderedResource::new(1, ());
        let b = OrderedResource::new(2, ());
        assert_eq!(OrderedLockStrategy::order(&a, &b), Ok(PairOrder::FirstLow));
        assert_eq!(OrderedLockStrategy::order(&b, &a), Ok(PairOrder::SecondLow));
    }

    #[test]
    fn test_guards_keep_argument_order() {
        let low = OrderedResource::new(1, "low");
        let high = OrderedResource::new(9, "high");

        let (first, second) = OrderedLockStrategy.lock_pair(&high, &low).unwrap();
        assert_eq!(*first, "high");
        assert_eq!(*second, "low");
    }

    #[test]
    fn test_same_resource_rejected() {
        let a = OrderedResource::new(1, 0u32);
        assert!(matches!(
            OrderedLockStrategy.lock_pair(&a, &a),
            Err(SyncError::SameResource)
        ));
        // Nothing was left locked.
        assert_eq!(*a.lock(), 0);
    }

    #[test]
    fn test_key_collision_rejected() {
        let a = OrderedResource::new(3, 0u32);
        let b = OrderedResource::new(3, 0u32);
        assert!(matches!(
            OrderedLockStrategy.lock_pair(&a, &b),
            Err(SyncError::KeyCollision(key)) if key == "3"
        ));
    }

    #[test]
    fn test_lock_pair_timeout_releases_low_on_failure() {
        let low = OrderedResource::new(1, 0u32);
        let high = OrderedResource::new(2, 0u32);

        let held = high.lock();
        let err = OrderedLockStrategy
            .lock_pair_timeout(&high, &low, Duration::from_millis(10))
            .unwrap_err();
        assert!(err.is_timeout());
        // The low lock was taken and then given back.
        assert!(low.try_lock_for(Duration::ZERO).is_some());
        drop(held);

        let (first, second) = OrderedLockStrategy
            .lock_pair_timeout(&high, &low, Duration::from_millis(10))
            .unwrap();
        assert_eq!((*first, *second), (0, 0));
    }

    #[test]
    fn test_lock_pair_timeout_validates_first() {
        let a = OrderedResource::new(5, ());
        assert!(matches!(
            OrderedLockStrategy.lock_pair_timeout(&a, &a, Duration::ZERO),
            Err(SyncError::SameResource)
        ));
    }

    #[test]
    fn test_opposite_orders_do_not_deadlock() {
        let a = Arc::new(OrderedResource::new(1, 0u64));
        let b = Arc::new(OrderedResource::new(2, 0u64));
        let (done_tx, done_rx) = crossbeam_channel::unbounded();

        for forward in [true, false] {
            let a = Arc::clone(&a);
            let b = Arc::clone(&b);
            let done_tx = done_tx.clone();
            thread::spawn(move || {
                for _ in 0..10_000 {
                    let (first, second) = if forward { (&*a, &*b) } else { (&*b, &*a) };
                    let (mut x, mut y) = OrderedLockStrategy.lock_pair(first, second).unwrap();
                    *x += 1;
                    *y += 1;
                }
                done_tx.send(()).unwrap();
            });
        }

        for _ in 0..2 {
            done_rx
                .recv_timeout(Duration::from_secs(30))
                .expect("opposite-order lockers deadlocked");
        }
        assert_eq!(*a.lock(), 20_000);
        assert_eq!(*b.lock(), 20_000);
    }
}
