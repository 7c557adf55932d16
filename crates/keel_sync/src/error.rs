//! # Sync Error Types
//!
//! Every failure a primitive can report. None of them are fatal: a timeout
//! leaves shared state untouched, and an invalid precondition is rejected
//! before anything is mutated.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Errors reported by the synchronization primitives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The operation did not complete before its deadline.
    #[error("{operation} timed out after {waited:?}")]
    Timeout {
        /// Name of the operation that gave up.
        operation: &'static str,
        /// How long the caller waited.
        waited: Duration,
    },

    /// A multi-resource claim named the same identity more than once.
    #[error("resource claimed more than once in a single request")]
    DuplicateResource,

    /// Both sides of a paired lock are the same resource.
    #[error("cannot lock a resource against itself")]
    SameResource,

    /// Two distinct resources share an ordering key, so no total order exists.
    #[error("distinct resources share ordering key {0}")]
    KeyCollision(String),

    /// A barrier party timed out or its trip action panicked. The barrier
    /// stays broken.
    #[error("barrier is broken")]
    BrokenBarrier,

    /// A release would push the semaphore above its permit limit.
    #[error("semaphore release overflow: {available} available of {max}")]
    PermitOverflow {
        /// Permits available before the rejected release.
        available: usize,
        /// Configured maximum.
        max: usize,
    },
}

impl SyncError {
    /// Builds a timeout error for `operation`.
    #[must_use]
    pub const fn timeout(operation: &'static str, waited: Duration) -> Self {
        Self::Timeout { operation, waited }
    }

    /// Returns true if this is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// A rejected queue insertion. The item is always handed back.
#[derive(Clone, PartialEq, Eq)]
pub enum PutError<T> {
    /// The queue was full and the caller did not want to wait.
    Full(T),
    /// The queue stayed full for the whole timeout.
    Timeout(T),
}

impl<T> PutError<T> {
    /// Recovers the item that was not enqueued.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Timeout(item) => item,
        }
    }

    /// Returns true if the put gave up on a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

// Hand-written so `T` does not need to be `Debug`.
impl<T> fmt::Debug for PutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Full(..)"),
            Self::Timeout(_) => f.write_str("Timeout(..)"),
        }
    }
}

impl<T> fmt::Display for PutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("queue is full"),
            Self::Timeout(_) => f.write_str("timed out waiting for queue capacity"),
        }
    }
}

impl<T> std::error::Error for PutError<T> {}
