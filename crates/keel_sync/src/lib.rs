//! # KEEL Sync
//!
//! Blocking primitives for sharing bounded resources between threads without
//! deadlock, starvation, or lost wakeups.
//!
//! ## Components
//!
//! | Type | Role |
//! |------|------|
//! | [`BoundedQueue`] | Fixed-capacity FIFO between producers and consumers |
//! | [`Envelope`] / [`ShutdownPlan`] | Sentinel-based consumer shutdown |
//! | [`Semaphore`] | Counting semaphore over one mutex/condvar pair |
//! | [`ResourcePool`] | Pool of reusable objects; its free set is the permit count |
//! | [`ResourceAllocator`] | All-or-nothing claims over resource identities |
//! | [`OrderedLockStrategy`] | Two-lock acquisition in global key order |
//! | [`CountDownLatch`] | One-shot gate opened after N count-downs |
//! | [`CyclicBarrier`] | Reusable rendezvous for a fixed number of parties |
//!
//! ## Locking Rules
//!
//! 1. **One structural lock per structure** - the queue store, the semaphore
//!    count, the pool free set, the allocator claim set, the latch count and
//!    the barrier state each sit behind exactly one `parking_lot::Mutex`.
//! 2. **Never nested** - no operation holds two structural locks at once.
//! 3. **Resource locks come last** - per-resource locks are taken only after
//!    every structural lock has been released.
//!
//! ## Example
//!
//! ```rust
//! use keel_sync::BoundedQueue;
//!
//! let queue = BoundedQueue::new(2);
//! queue.put("a");
//! queue.put("b");
//! assert!(queue.is_full());
//! assert_eq!(queue.take(), "a");
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod allocator;
pub mod barrier;
pub mod error;
pub mod latch;
pub mod ordered;
pub mod pool;
pub mod queue;
pub mod semaphore;
pub mod shutdown;

pub use allocator::{Claim, ClaimToken, ResourceAllocator};
pub use barrier::{BarrierWaitResult, CyclicBarrier};
pub use error::{PutError, SyncError, SyncResult};
pub use latch::CountDownLatch;
pub use ordered::{OrderedLockStrategy, OrderedResource, PairOrder};
pub use pool::{Pooled, ResourcePool};
pub use queue::BoundedQueue;
pub use semaphore::{Permit, Semaphore};
pub use shutdown::{consume, Envelope, ShutdownPlan};
