//! # Count-Down Latch
//!
//! A one-shot gate. Waiters block until the count reaches zero; once it does
//! the gate stays open and every later wait returns at once.
//!
//! ```text
//!   workers:  work ──> count_down ─┐
//!   workers:  work ──> count_down ─┼──> 0 ──> waiters proceed
//!   workers:  work ──> count_down ─┘
//! ```

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{SyncError, SyncResult};

/// Blocks waiters until `count` count-downs have happened.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::thread;
/// use keel_sync::CountDownLatch;
///
/// let latch = Arc::new(CountDownLatch::new(2));
/// for _ in 0..2 {
///     let latch = Arc::clone(&latch);
///     thread::spawn(move || latch.count_down());
/// }
/// latch.wait();
/// assert_eq!(latch.count(), 0);
/// ```
#[derive(Debug)]
pub struct CountDownLatch {
    count: Mutex<usize>,
    /// Signalled once, when the count reaches zero.
    opened: Condvar,
}

impl CountDownLatch {
    /// Creates a latch that opens after `count` count-downs. A zero count
    /// starts open.
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            opened: Condvar::new(),
        }
    }

    /// Returns the count-downs still needed.
    #[must_use]
    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Decrements the count, opening the latch when it hits zero. No effect
    /// once open.
    pub fn count_down(&self) {
        let mut count = self.count.lock();
        if *count == 0 {
            return;
        }
        *count -= 1;
        if *count == 0 {
            drop(count);
            tracing::trace!("latch opened");
            self.opened.notify_all();
        }
    }

    /// Blocks until the latch is open.
    pub fn wait(&self) {
        let mut count = self.count.lock();
        self.opened.wait_while(&mut count, |count| *count > 0);
    }

    /// Blocks until the latch is open, at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Timeout`] if the count was still above zero.
    pub fn wait_timeout(&self, timeout: Duration) -> SyncResult<()> {
        let mut count = self.count.lock();
        let waited = self
            .opened
            .wait_while_for(&mut count, |count| *count > 0, timeout);
        if waited.timed_out() && *count > 0 {
            return Err(SyncError::timeout("latch.wait", timeout));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_waiter_sees_all_work() {
        let latch = Arc::new(CountDownLatch::new(5));
        let log = Arc::new(Mutex::new(Vec::new()));

        for worker in 0..5 {
            let latch = Arc::clone(&latch);
            let log = Arc::clone(&log);
            thread::spawn(move || {
                log.lock().push(worker);
                latch.count_down();
            });
        }

        latch.wait();
        log.lock().push(usize::MAX);
        let log = log.lock();
        assert_eq!(log.len(), 6);
        assert_eq!(log.last(), Some(&usize::MAX));
    }

    #[test]
    fn test_start_gate() {
        // Workers wait for one signal, then the caller waits for all of them.
        let ready = Arc::new(CountDownLatch::new(3));
        let start = Arc::new(CountDownLatch::new(1));
        let done = Arc::new(CountDownLatch::new(3));

        for _ in 0..3 {
            let (ready, start, done) = (Arc::clone(&ready), Arc::clone(&start), Arc::clone(&done));
            thread::spawn(move || {
                ready.count_down();
                start.wait();
                done.count_down();
            });
        }

        ready.wait_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(done.count(), 3);
        start.count_down();
        done.wait_timeout(Duration::from_secs(10)).unwrap();
    }

    #[test]
    fn test_missing_count_down_times_out() {
        let latch = CountDownLatch::new(2);
        latch.count_down();

        let err = latch.wait_timeout(Duration::from_millis(10)).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(latch.count(), 1);
    }

    #[test]
    fn test_stays_open() {
        let latch = CountDownLatch::new(1);
        latch.count_down();
        latch.count_down();
        assert_eq!(latch.count(), 0);
        latch.wait();
        assert!(CountDownLatch::new(0).wait_timeout(Duration::ZERO).is_ok());
    }
}
