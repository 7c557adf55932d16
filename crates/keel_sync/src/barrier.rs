//! # Cyclic Barrier
//!
//! A fixed number of parties meet at the barrier. The last one to arrive
//! runs the optional trip action, then every party of that generation is
//! released and the barrier resets for the next round.
//!
//! ```text
//!   gen 0:  P0 ──wait─┐
//!           P1 ──wait─┼── P2 arrives last: action, trip ──> gen 1
//!           P2 ───────┘
//! ```
//!
//! A party that times out breaks the barrier, as does a panicking trip
//! action. Every waiting and later party then gets
//! [`SyncError::BrokenBarrier`]; a broken barrier is not repaired.

use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{SyncError, SyncResult};

type TripAction = Box<dyn Fn() + Send + Sync>;

/// What a party learns when the barrier trips.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BarrierWaitResult {
    leader: bool,
    generation: u64,
}

impl BarrierWaitResult {
    /// True for exactly one party per generation: the one that arrived last
    /// and ran the trip action.
    #[must_use]
    pub const fn is_leader(&self) -> bool {
        self.leader
    }

    /// The round this party took part in, counting from zero.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    broken: bool,
}

/// Reusable rendezvous point for `parties` threads.
pub struct CyclicBarrier {
    state: Mutex<BarrierState>,
    /// Signalled when a generation trips or the barrier breaks.
    tripped: Condvar,
    parties: usize,
    action: Option<TripAction>,
}

impl CyclicBarrier {
    /// Creates a barrier for `parties` threads.
    ///
    /// # Panics
    ///
    /// Panics if `parties` is zero.
    #[must_use]
    pub fn new(parties: usize) -> Self {
        assert!(parties > 0, "A barrier needs at least one party");
        Self {
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
                broken: false,
            }),
            tripped: Condvar::new(),
            parties,
            action: None,
        }
    }

    /// Creates a barrier whose last arriving party runs `action` before the
    /// others are released.
    ///
    /// The action runs under the barrier's lock and must not call back into
    /// the barrier.
    ///
    /// # Panics
    ///
    /// Panics if `parties` is zero.
    #[must_use]
    pub fn with_action<F>(parties: usize, action: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            action: Some(Box::new(action)),
            ..Self::new(parties)
        }
    }

    /// Returns the number of parties per generation.
    #[must_use]
    pub const fn parties(&self) -> usize {
        self.parties
    }

    /// Returns how many parties are waiting in the current generation.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.state.lock().arrived
    }

    /// Returns true once a timeout or a panicking action broke the barrier.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.state.lock().broken
    }

    /// Waits until all parties have arrived.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::BrokenBarrier`] if the barrier is or becomes
    /// broken.
    ///
    /// # Panics
    ///
    /// Re-raises a panic from the trip action in the party that ran it,
    /// after breaking the barrier.
    pub fn wait(&self) -> SyncResult<BarrierWaitResult> {
        self.arrive(None)
    }

    /// Like [`CyclicBarrier::wait`], giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Timeout`] to the party that gave up, which also
    /// breaks the barrier for everyone else.
    ///
    /// # Panics
    ///
    /// Same as [`CyclicBarrier::wait`].
    pub fn wait_timeout(&self, timeout: Duration) -> SyncResult<BarrierWaitResult> {
        let deadline = Instant::now().checked_add(timeout);
        self.arrive(deadline.map(|deadline| (deadline, timeout)))
    }

    fn arrive(&self, deadline: Option<(Instant, Duration)>) -> SyncResult<BarrierWaitResult> {
        let mut state = self.state.lock();
        if state.broken {
            return Err(SyncError::BrokenBarrier);
        }
        let generation = state.generation;
        state.arrived += 1;

        if state.arrived == self.parties {
            if let Some(action) = &self.action {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(action)) {
                    state.broken = true;
                    drop(state);
                    self.tripped.notify_all();
                    tracing::warn!(generation, "barrier action panicked");
                    panic::resume_unwind(payload);
                }
            }
            state.arrived = 0;
            state.generation += 1;
            drop(state);
            self.tripped.notify_all();
            tracing::trace!(generation, "barrier tripped");
            return Ok(BarrierWaitResult {
                leader: true,
                generation,
            });
        }

        loop {
            let timed_out = match deadline {
                Some((deadline, _)) => self.tripped.wait_until(&mut state, deadline).timed_out(),
                None => {
                    self.tripped.wait(&mut state);
                    false
                }
            };
            // A broken barrier never trips again, so a new generation means
            // this one completed.
            if state.generation != generation {
                return Ok(BarrierWaitResult {
                    leader: false,
                    generation,
                });
            }
            if state.broken {
                return Err(SyncError::BrokenBarrier);
            }
            if timed_out {
                state.broken = true;
                drop(state);
                self.tripped.notify_all();
                let waited = deadline.map_or(Duration::ZERO, |(_, timeout)| timeout);
                tracing::debug!(generation, ?waited, "barrier wait timed out");
                return Err(SyncError::timeout("barrier.wait", waited));
            }
        }
    }
}

impl std::fmt::Debug for CyclicBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CyclicBarrier")
            .field("parties", &self.parties)
            .field("state", &*self.state.lock())
            .field("has_action", &self.action.is_some())
            .finish()
    }
}
