//! # Resource Pool
//!
//! A fixed set of reusable objects that doubles as a concurrency limiter: at
//! most `capacity` callers hold an object at any instant.
//!
//! ## Design
//!
//! The free set is the semaphore. Its length is the number of available
//! permits, and each permit carries the object it grants, so the counter and
//! the objects can never disagree.
//!
//! ```text
//!   acquire ──> [ Mutex<Vec<T>> ] ──> Pooled<T> ──(drop)──> back into the free set
//!                     │                                    notify_one(returned)
//!               returned (Condvar)
//! ```
//!
//! Return happens in [`Pooled`]'s `Drop`, so every exit path (normal return,
//! `Err`, or a panic unwinding through the body) gives the object back.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{SyncError, SyncResult};

/// A bounded pool of pre-built objects.
///
/// # Example
///
/// ```rust
/// use keel_sync::ResourcePool;
///
/// let pool = ResourcePool::from_fn(2, |slot| vec![slot as u8; 4]);
/// let len = pool.exec(|buffer| buffer.len());
/// assert_eq!(len, 4);
/// assert_eq!(pool.available(), 2);
/// ```
pub struct ResourcePool<T> {
    /// Objects not currently lent out.
    free: Mutex<Vec<T>>,
    /// Signalled whenever an object comes back.
    returned: Condvar,
    /// Total number of objects owned by the pool.
    capacity: usize,
}

impl<T> ResourcePool<T> {
    /// Creates a pool owning `instances`.
    ///
    /// # Panics
    ///
    /// Panics if `instances` is empty.
    #[must_use]
    pub fn new(instances: Vec<T>) -> Self {
        assert!(!instances.is_empty(), "Capacity must be greater than zero");

        Self {
            capacity: instances.len(),
            free: Mutex::new(instances),
            returned: Condvar::new(),
        }
    }

    /// Creates a pool of `capacity` objects built by `factory(slot)`.
    ///
    /// # Panics
    ///
    /// Panics if capacity is zero.
    #[must_use]
    pub fn from_fn<F>(capacity: usize, factory: F) -> Self
    where
        F: FnMut(usize) -> T,
    {
        Self::new((0..capacity).map(factory).collect())
    }

    /// Returns the total number of objects.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of objects ready to lend.
    #[must_use]
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    /// Returns the number of objects currently lent out.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }

    /// Borrows an object, blocking until one is free.
    #[must_use = "dropping the guard returns the object immediately"]
    pub fn acquire(&self) -> Pooled<'_, T> {
        let mut free = self.free.lock();
        loop {
            if let Some(item) = free.pop() {
                return self.lend(item);
            }
            self.returned.wait(&mut free);
        }
    }

    /// Borrows an object, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Timeout`] if every object stayed lent out. The
    /// pool is unchanged in that case.
    pub fn acquire_timeout(&self, timeout: Duration) -> SyncResult<Pooled<'_, T>> {
        let mut free = self.free.lock();
        let waited = self
            .returned
            .wait_while_for(&mut free, |free| free.is_empty(), timeout);

        match free.pop() {
            Some(item) => Ok(self.lend(item)),
            None => {
                debug_assert!(waited.timed_out());
                tracing::debug!(capacity = self.capacity, ?timeout, "pool acquire timed out");
                Err(SyncError::timeout("pool.acquire", timeout))
            }
        }
    }

    /// Borrows an object if one is free right now.
    #[must_use]
    pub fn try_acquire(&self) -> Option<Pooled<'_, T>> {
        self.free.lock().pop().map(|item| self.lend(item))
    }

    /// Runs `body` on a pooled object and returns its result.
    ///
    /// Blocks until an object is free. The object goes back to the pool before
    /// this returns, and also when `body` panics (the panic then resumes in the
    /// caller).
    pub fn exec<R, F>(&self, body: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut item = self.acquire();
        body(&mut item)
    }

    /// Runs a fallible `body` on a pooled object.
    ///
    /// # Errors
    ///
    /// Returns whatever error `body` returns, after the object is back in
    /// the pool.
    pub fn try_exec<R, E, F>(&self, body: F) -> Result<R, E>
    where
        F: FnOnce(&mut T) -> Result<R, E>,
    {
        let mut item = self.acquire();
        body(&mut item)
    }

    /// Like [`ResourcePool::exec`], giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Timeout`] without running `body` if no object
    /// became free.
    pub fn exec_timeout<R, F>(&self, timeout: Duration, body: F) -> SyncResult<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut item = self.acquire_timeout(timeout)?;
        Ok(body(&mut item))
    }

    fn lend(&self, item: T) -> Pooled<'_, T> {
        Pooled {
            pool: self,
            item: Some(item),
        }
    }

    fn give_back(&self, item: T) {
        let mut free = self.free.lock();
        free.push(item);
        debug_assert!(free.len() <= self.capacity);
        drop(free);
        self.returned.notify_one();
    }
}

impl<T> std::fmt::Debug for ResourcePool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("available", &self.available())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// An object on loan from a [`ResourcePool`]. Returned on drop.
pub struct Pooled<'a, T> {
    pool: &'a ResourcePool<T>,
    /// Always `Some` until drop.
    item: Option<T>,
}

impl<T> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().expect("pooled object is present until drop")
    }
}

impl<T> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("pooled object is present until drop")
    }
}

impl<T> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.give_back(item);
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Pooled<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Pooled").field(&self.item).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};

    #[test]
    fn test_exec_returns_object() {
        let pool = ResourcePool::new(vec![10u32, 20]);
        let doubled = pool.exec(|value| *value * 2);
        assert!(doubled == 20 || doubled == 40);
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_mutation_persists() {
        let pool = ResourcePool::new(vec![0u32]);
        pool.exec(|value| *value += 5);
        pool.exec(|value| *value += 5);
        assert_eq!(pool.exec(|value| *value), 10);
    }

    #[test]
    fn test_try_exec_propagates_error() {
        let pool = ResourcePool::new(vec!["conn"]);
        let result: Result<(), &str> = pool.try_exec(|_| Err("refused"));
        assert_eq!(result, Err("refused"));
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_panic_returns_object() {
        let pool = ResourcePool::new(vec![1u8]);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            pool.exec(|_| panic!("body failed"));
        }));
        assert!(outcome.is_err());
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_acquire_timeout_when_exhausted() {
        let pool = ResourcePool::new(vec![()]);
        let held = pool.acquire();
        assert!(pool.try_acquire().is_none());

        let err = pool.acquire_timeout(Duration::from_millis(10)).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(pool.in_use(), 1);

        drop(held);
        assert!(pool.exec_timeout(Duration::from_millis(10), |_| ()).is_ok());
    }

    #[test]
    #[should_panic(expected = "Capacity must be greater than zero")]
    fn test_empty_pool_panics() {
        let _pool: ResourcePool<u8> = ResourcePool::new(Vec::new());
    }
}
