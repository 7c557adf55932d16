//! # Resource Allocator
//!
//! Grants all-or-nothing claims over sets of resource identities.
//!
//! ## Why it prevents deadlock
//!
//! Deadlock needs hold-and-wait: a thread keeps one resource while blocking
//! on another. A thread that must touch `a` and `b` first claims both here in
//! a single critical section. It gets both or neither, so it never sits on `a`
//! while waiting for `b`. Only after the claim succeeds does it take the
//! resources' own locks, which nobody else can be contending for.
//!
//! ```text
//!   T1: claim(a, b) ──ok──> lock a, lock b ──> work ──> release
//!   T2: claim(b, a) ──wait on condvar──────────────────────────┘──ok──> ...
//! ```
//!
//! ## Ownership
//!
//! Every grant is stamped with a unique number and handed out as a
//! [`ClaimToken`]. Releasing consumes the token and removes only identities
//! still stamped with it, so a claim can be released once and never on
//! behalf of somebody else.
//!
//! ## Fairness
//!
//! A blocked claimer takes a ticket and reserves the identities it wants.
//! A newer request that overlaps any reservation of an older waiter is
//! refused even if its identities are free, so overlapping single-identity
//! traffic cannot overtake a waiting pair claimer forever. The oldest waiter
//! is blocked only by current holders.
//!
//! The allocator is an ordinary value. Share it with `Arc` between the
//! callers that must be mutually excluded; unrelated callers use their own.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{SyncError, SyncResult};

/// Grant stamps are unique across allocators, so a token is only ever
/// honoured by the allocator that issued it.
static NEXT_GRANT: AtomicU64 = AtomicU64::new(1);

/// Tracks claimed identities and hands out all-or-nothing claims.
///
/// # Example
///
/// ```rust
/// use keel_sync::ResourceAllocator;
///
/// let allocator = ResourceAllocator::new();
/// let token = allocator.try_claim(1, 2).unwrap().expect("both free");
/// assert!(allocator.try_claim(2, 3).unwrap().is_none());
/// assert_eq!(allocator.release(token), 2);
/// assert!(allocator.try_claim(2, 3).unwrap().is_some());
/// ```
#[derive(Debug)]
pub struct ResourceAllocator<K> {
    state: Mutex<ClaimTable<K>>,
    /// Signalled whenever identities are released or a reservation lapses.
    released: Condvar,
}

#[derive(Debug)]
struct ClaimTable<K> {
    /// Identity to the grant holding it. Each identity appears at most once.
    claimed: HashMap<K, u64>,
    /// Blocked claimers by ticket, oldest first, with the identities they want.
    waiting: BTreeMap<u64, Vec<K>>,
    next_ticket: u64,
}

impl<K> ClaimTable<K>
where
    K: Eq + Hash + Clone,
{
    /// Grants `ids` if none is claimed and none is reserved by a waiter older
    /// than `ticket`. A request without a ticket yields to every waiter.
    fn try_grant(&mut self, ids: &[K], ticket: Option<u64>) -> Option<u64> {
        if ids.iter().any(|id| self.claimed.contains_key(id)) {
            return None;
        }
        let reserved = self
            .waiting
            .range(..ticket.unwrap_or(u64::MAX))
            .flat_map(|(_, wanted)| wanted)
            .any(|id| ids.contains(id));
        if reserved {
            return None;
        }

        let grant = NEXT_GRANT.fetch_add(1, Ordering::Relaxed);
        for id in ids {
            self.claimed.insert(id.clone(), grant);
        }
        Some(grant)
    }

    fn enqueue(&mut self, ids: &[K]) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.waiting.insert(ticket, ids.to_vec());
        ticket
    }
}

impl<K> Default for ResourceAllocator<K>
where
    K: Eq + Hash + Clone + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> ResourceAllocator<K>
where
    K: Eq + Hash + Clone + Debug,
{
    /// Creates an allocator with nothing claimed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClaimTable {
                claimed: HashMap::new(),
                waiting: BTreeMap::new(),
                next_ticket: 0,
            }),
            released: Condvar::new(),
        }
    }

    /// Returns true if `id` is currently claimed.
    #[must_use]
    pub fn is_claimed(&self, id: &K) -> bool {
        self.state.lock().claimed.contains_key(id)
    }

    /// Returns how many identities are claimed.
    #[must_use]
    pub fn claimed_count(&self) -> usize {
        self.state.lock().claimed.len()
    }

    /// Returns how many claimers are blocked waiting.
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.state.lock().waiting.len()
    }

    /// Claims `a` and `b` together if neither is claimed.
    ///
    /// Returns `Ok(None)` without changing anything if either one is taken
    /// or reserved by a blocked claimer.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::DuplicateResource`] if `a == b`.
    pub fn try_claim(&self, a: K, b: K) -> SyncResult<Option<ClaimToken<K>>> {
        self.try_claim_all(vec![a, b])
    }

    /// Claims every identity in `ids` if none of them is claimed.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::DuplicateResource`] if `ids` repeats an identity.
    pub fn try_claim_all(&self, ids: Vec<K>) -> SyncResult<Option<ClaimToken<K>>> {
        ensure_distinct(&ids)?;
        let grant = self.state.lock().try_grant(&ids, None);
        Ok(grant.map(|grant| ClaimToken { grant, ids }))
    }

    /// Releases the identities held by `token` and wakes blocked claimers.
    ///
    /// Returns how many identities were removed. A token issued by another
    /// allocator removes nothing.
    #[allow(clippy::needless_pass_by_value)]
    pub fn release(&self, token: ClaimToken<K>) -> usize {
        let mut state = self.state.lock();
        let mut removed = 0;
        for id in &token.ids {
            if state.claimed.get(id) == Some(&token.grant) {
                state.claimed.remove(id);
                removed += 1;
            }
        }
        drop(state);

        if removed < token.ids.len() {
            tracing::warn!(
                ids = ?token.ids,
                removed,
                "released identities this claim did not hold"
            );
        }
        if removed > 0 {
            // Waiters want different sets, so any of them may now fit.
            self.released.notify_all();
        }
        removed
    }

    /// Claims `a` and `b`, blocking until both are free at once.
    ///
    /// The returned guard releases the pair on drop.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::DuplicateResource`] if `a == b`.
    pub fn claim(&self, a: K, b: K) -> SyncResult<Claim<'_, K>> {
        self.claim_all(vec![a, b])
    }

    /// Claims every identity in `ids`, blocking until all are free at once.
    ///
    /// Waiters are served in arrival order among those that overlap.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::DuplicateResource`] if `ids` repeats an identity.
    pub fn claim_all(&self, ids: Vec<K>) -> SyncResult<Claim<'_, K>> {
        ensure_distinct(&ids)?;
        let mut state = self.state.lock();
        if let Some(grant) = state.try_grant(&ids, None) {
            return Ok(self.guard(grant, ids));
        }

        let ticket = state.enqueue(&ids);
        let grant = loop {
            self.released.wait(&mut state);
            if let Some(grant) = state.try_grant(&ids, Some(ticket)) {
                break grant;
            }
        };
        // The claim now covers exactly what the reservation did.
        state.waiting.remove(&ticket);
        drop(state);
        Ok(self.guard(grant, ids))
    }

    /// Claims `a` and `b`, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::DuplicateResource`] if `a == b`, or
    /// [`SyncError::Timeout`] if the pair never became free. Nothing is
    /// claimed or reserved on error.
    pub fn claim_timeout(&self, a: K, b: K, timeout: Duration) -> SyncResult<Claim<'_, K>> {
        self.claim_all_timeout(vec![a, b], timeout)
    }

    /// Claims every identity in `ids`, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Same as [`ResourceAllocator::claim_timeout`].
    pub fn claim_all_timeout(&self, ids: Vec<K>, timeout: Duration) -> SyncResult<Claim<'_, K>> {
        ensure_distinct(&ids)?;
        let deadline = Instant::now().checked_add(timeout);

        let mut state = self.state.lock();
        if let Some(grant) = state.try_grant(&ids, None) {
            return Ok(self.guard(grant, ids));
        }

        let ticket = state.enqueue(&ids);
        let grant = loop {
            let timed_out = match deadline {
                Some(deadline) => self.released.wait_until(&mut state, deadline).timed_out(),
                None => {
                    self.released.wait(&mut state);
                    false
                }
            };
            // One last attempt is made after the deadline passes.
            if let Some(grant) = state.try_grant(&ids, Some(ticket)) {
                break Some(grant);
            }
            if timed_out {
                break None;
            }
        };
        state.waiting.remove(&ticket);
        drop(state);

        match grant {
            Some(grant) => Ok(self.guard(grant, ids)),
            None => {
                // Younger waiters may have been held back by this reservation.
                self.released.notify_all();
                tracing::debug!(?ids, ?timeout, "claim timed out");
                Err(SyncError::timeout("allocator.claim", timeout))
            }
        }
    }

    fn guard(&self, grant: u64, ids: Vec<K>) -> Claim<'_, K> {
        Claim {
            allocator: self,
            token: Some(ClaimToken { grant, ids }),
        }
    }
}

fn ensure_distinct<K: Eq + Hash>(ids: &[K]) -> SyncResult<()> {
    let mut seen = HashSet::with_capacity(ids.len());
    if ids.iter().all(|id| seen.insert(id)) {
        Ok(())
    } else {
        Err(SyncError::DuplicateResource)
    }
}

/// Proof of a granted claim, redeemed by [`ResourceAllocator::release`].
///
/// Not `Clone`: each grant is released at most once.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "the identities stay claimed until the token is released"]
pub struct ClaimToken<K> {
    grant: u64,
    ids: Vec<K>,
}

impl<K> ClaimToken<K> {
    /// The claimed identities, in request order.
    #[must_use]
    pub fn ids(&self) -> &[K] {
        &self.ids
    }
}

/// A granted claim. Releases its identities on drop.
#[derive(Debug)]
pub struct Claim<'a, K>
where
    K: Eq + Hash + Clone + Debug,
{
    allocator: &'a ResourceAllocator<K>,
    /// Always present until drop.
    token: Option<ClaimToken<K>>,
}

impl<K> Claim<'_, K>
where
    K: Eq + Hash + Clone + Debug,
{
    /// The claimed identities, in request order.
    #[must_use]
    pub fn ids(&self) -> &[K] {
        self.token.as_ref().map_or(&[][..], ClaimToken::ids)
    }
}

impl<K> Drop for Claim<'_, K>
where
    K: Eq + Hash + Clone + Debug,
{
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.allocator.release(token);
        }
    }
}
