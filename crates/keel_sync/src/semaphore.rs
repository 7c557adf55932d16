//! # Counting Semaphore
//!
//! A permit counter bounded to `[0, max]`, guarded by one mutex and one
//! condvar. Standalone: [`ResourcePool`](crate::ResourcePool) gates on its own
//! free set instead.
//!
//! Permits come in two kinds. Manual ones (`acquire`/`release`) are balanced
//! by the caller. Guarded ones ([`Permit`]) are counted separately and always
//! come back on drop, so a stray manual `release` can never return a permit a
//! guard still holds.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{SyncError, SyncResult};

/// A counting semaphore.
///
/// # Example
///
/// ```rust
/// use keel_sync::Semaphore;
///
/// let semaphore = Semaphore::new(1);
/// {
///     let _permit = semaphore.permit();
///     assert!(!semaphore.try_acquire());
/// }
/// assert_eq!(semaphore.available(), 1);
/// ```
#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<Permits>,
    /// Signalled on every release.
    released: Condvar,
    /// Upper bound on `available`.
    max: usize,
}

#[derive(Debug)]
struct Permits {
    available: usize,
    /// Taken by live [`Permit`] guards.
    guarded: usize,
}

impl Semaphore {
    /// Creates a semaphore with all `permits` available.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(Permits {
                available: permits,
                guarded: 0,
            }),
            released: Condvar::new(),
            max: permits,
        }
    }

    /// Returns the permit limit.
    #[inline]
    #[must_use]
    pub const fn max_permits(&self) -> usize {
        self.max
    }

    /// Returns the permits available right now.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.lock().available
    }

    /// Takes one permit, blocking until one is available.
    pub fn acquire(&self) {
        let mut permits = self.permits.lock();
        self.released
            .wait_while(&mut permits, |permits| permits.available == 0);
        permits.available -= 1;
    }

    /// Takes one permit if one is available right now.
    #[must_use = "a taken permit must be released"]
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock();
        if permits.available == 0 {
            return false;
        }
        permits.available -= 1;
        true
    }

    /// Takes one permit, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Timeout`] if no permit became available. The count
    /// is unchanged in that case.
    pub fn acquire_timeout(&self, timeout: Duration) -> SyncResult<()> {
        let mut permits = self.permits.lock();
        let waited = self.released.wait_while_for(
            &mut permits,
            |permits| permits.available == 0,
            timeout,
        );
        if waited.timed_out() && permits.available == 0 {
            return Err(SyncError::timeout("semaphore.acquire", timeout));
        }
        permits.available -= 1;
        Ok(())
    }

    /// Returns one manually acquired permit and wakes one waiter.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::PermitOverflow`] if no manually acquired permit is
    /// outstanding. Permits held by [`Permit`] guards do not count: they are
    /// returned only by dropping the guard.
    pub fn release(&self) -> SyncResult<()> {
        let mut permits = self.permits.lock();
        if permits.available + permits.guarded >= self.max {
            tracing::warn!(
                available = permits.available,
                guarded = permits.guarded,
                max = self.max,
                "unbalanced semaphore release"
            );
            return Err(SyncError::PermitOverflow {
                available: permits.available,
                max: self.max,
            });
        }
        permits.available += 1;
        drop(permits);
        self.released.notify_one();
        Ok(())
    }

    /// Takes one permit and returns a guard that gives it back on drop.
    #[must_use = "dropping the permit releases it immediately"]
    pub fn permit(&self) -> Permit<'_> {
        let mut permits = self.permits.lock();
        self.released
            .wait_while(&mut permits, |permits| permits.available == 0);
        permits.available -= 1;
        permits.guarded += 1;
        Permit { semaphore: self }
    }

    /// Like [`Semaphore::permit`] with a timeout.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Timeout`] if no permit became available.
    pub fn permit_timeout(&self, timeout: Duration) -> SyncResult<Permit<'_>> {
        let mut permits = self.permits.lock();
        let waited = self.released.wait_while_for(
            &mut permits,
            |permits| permits.available == 0,
            timeout,
        );
        if waited.timed_out() && permits.available == 0 {
            return Err(SyncError::timeout("semaphore.permit", timeout));
        }
        permits.available -= 1;
        permits.guarded += 1;
        Ok(Permit { semaphore: self })
    }

    /// Returns a permit held by a guard.
    fn restore(&self) {
        let mut permits = self.permits.lock();
        permits.guarded -= 1;
        permits.available += 1;
        drop(permits);
        self.released.notify_one();
    }
}

/// One permit, returned to its semaphore on drop.
#[derive(Debug)]
pub struct Permit<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.semaphore.restore();
    }
}
