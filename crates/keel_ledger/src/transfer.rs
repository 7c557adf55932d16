//! # Transfer Coordinator
//!
//! Moves an amount from one account to another so that both balances change
//! together or neither does, under one of three strategies:
//!
//! | Strategy | How both locks are obtained | Deadlock condition removed |
//! |----------|-----------------------------|----------------------------|
//! | `OrderedLocks` | lower id first, then higher | circular wait |
//! | `Allocator` | claim both ids at once, then lock | hold-and-wait |
//! | `GlobalLock` | one lock for every transfer | all concurrency |
//!
//! ## Phases
//!
//! ```text
//!   ordered:   Pending -> LockedLow -> LockedHigh -> Applied|Aborted -> Unlocked
//!   allocator: Pending -> Acquired  -> Applied|Aborted -> Released
//!   global:    Pending -> Acquired  -> Applied|Aborted -> Released
//! ```
//!
//! A transfer applies only when the source balance strictly exceeds the
//! amount. Otherwise it aborts: locks and claims are still released and no
//! balance changes.
//!
//! Strategies do not mix. Every transfer touching a given set of accounts
//! must go through coordinators of the same strategy, and allocator
//! coordinators must share one allocator.

use std::ptr;
use std::sync::Arc;
use std::time::Duration;

use keel_sync::{OrderedLockStrategy, ResourceAllocator, SyncError};
use parking_lot::Mutex;
use serde::Deserialize;

use crate::account::{Account, AccountId, Balance};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};

/// Which deadlock-avoidance scheme a coordinator uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStrategy {
    /// Lock both accounts in id order.
    #[default]
    OrderedLocks,
    /// Claim both ids from a shared allocator, then lock.
    Allocator,
    /// Serialize every transfer behind one lock.
    GlobalLock,
}

/// A step a transfer went through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferPhase {
    /// Validated, nothing held yet.
    Pending,
    /// Allocator claim or global lock obtained.
    Acquired,
    /// Lower-id account locked.
    LockedLow,
    /// Higher-id account locked.
    LockedHigh,
    /// Balances moved.
    Applied,
    /// Precondition failed under the locks, nothing moved.
    Aborted,
    /// Allocator claim or global lock given up.
    Released,
    /// Both account locks given up.
    Unlocked,
}

/// Why a transfer did not move any money.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbortReason {
    /// The source balance did not strictly exceed the amount.
    InsufficientFunds {
        /// Source balance observed under the lock.
        available: Balance,
        /// Amount requested.
        requested: Balance,
    },
}

/// Final result of a transfer that ran to completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Source debited and destination credited.
    Applied,
    /// Nothing changed.
    Aborted(AbortReason),
}

/// Record of one completed transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferReceipt {
    /// Strategy that ran it.
    pub strategy: TransferStrategy,
    /// Debited account.
    pub from: AccountId,
    /// Credited account.
    pub to: AccountId,
    /// Amount requested.
    pub amount: Balance,
    /// What happened.
    pub outcome: TransferOutcome,
    /// Every phase, in order.
    pub phases: Vec<TransferPhase>,
}

impl TransferReceipt {
    /// Returns true if money moved.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        self.outcome == TransferOutcome::Applied
    }
}

enum Coordination {
    Ordered(OrderedLockStrategy),
    Allocator {
        allocator: Arc<ResourceAllocator<AccountId>>,
        claim_timeout: Option<Duration>,
    },
    Global(Mutex<()>),
}

/// Performs atomic two-account transfers with a fixed strategy.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use keel_ledger::{AccountId, Ledger, TransferCoordinator, TransferPhase};
/// use keel_sync::ResourceAllocator;
///
/// let ledger = Ledger::with_balances(&[100, 50]).unwrap();
/// let a = ledger.get(AccountId(0)).unwrap();
/// let b = ledger.get(AccountId(1)).unwrap();
///
/// let coordinator = TransferCoordinator::with_allocator(Arc::new(ResourceAllocator::new()));
/// let receipt = coordinator.transfer(&b, &a, 10).unwrap();
/// assert_eq!(receipt.phases.last(), Some(&TransferPhase::Released));
/// ```
pub struct TransferCoordinator {
    coordination: Coordination,
}

impl TransferCoordinator {
    /// Coordinator that locks accounts in id order.
    #[must_use]
    pub fn ordered() -> Self {
        Self {
            coordination: Coordination::Ordered(OrderedLockStrategy),
        }
    }

    /// Coordinator that claims account pairs from `allocator` first.
    ///
    /// Claims wait without limit; see [`TransferCoordinator::with_claim_timeout`].
    #[must_use]
    pub fn with_allocator(allocator: Arc<ResourceAllocator<AccountId>>) -> Self {
        Self {
            coordination: Coordination::Allocator {
                allocator,
                claim_timeout: None,
            },
        }
    }

    /// Coordinator that serializes every transfer behind one lock.
    #[must_use]
    pub fn global_lock() -> Self {
        Self {
            coordination: Coordination::Global(Mutex::new(())),
        }
    }

    /// Builds the coordinator described by `config`. An allocator strategy
    /// gets a fresh allocator.
    #[must_use]
    pub fn from_config(config: &LedgerConfig) -> Self {
        match config.strategy {
            TransferStrategy::OrderedLocks => Self::ordered(),
            TransferStrategy::GlobalLock => Self::global_lock(),
            TransferStrategy::Allocator => {
                let coordinator = Self::with_allocator(Arc::new(ResourceAllocator::new()));
                match config.claim_timeout() {
                    Some(timeout) => coordinator.with_claim_timeout(timeout),
                    None => coordinator,
                }
            }
        }
    }

    /// Bounds how long an allocator claim may wait. Transfers that time out
    /// fail with a timeout error and change nothing. No effect on the other
    /// strategies.
    #[must_use]
    pub fn with_claim_timeout(mut self, timeout: Duration) -> Self {
        if let Coordination::Allocator { claim_timeout, .. } = &mut self.coordination {
            *claim_timeout = Some(timeout);
        }
        self
    }

    /// Returns the strategy in use.
    #[must_use]
    pub fn strategy(&self) -> TransferStrategy {
        match self.coordination {
            Coordination::Ordered(_) => TransferStrategy::OrderedLocks,
            Coordination::Allocator { .. } => TransferStrategy::Allocator,
            Coordination::Global(_) => TransferStrategy::GlobalLock,
        }
    }

    /// Returns the shared allocator, if this is an allocator coordinator.
    #[must_use]
    pub fn allocator(&self) -> Option<&Arc<ResourceAllocator<AccountId>>> {
        match &self.coordination {
            Coordination::Allocator { allocator, .. } => Some(allocator),
            _ => None,
        }
    }

    /// Moves `amount` from `from` to `to`.
    ///
    /// Returns a receipt whose outcome is [`TransferOutcome::Aborted`] when
    /// the source balance does not strictly exceed `amount`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] if `amount` is zero
    /// - [`LedgerError::SelfTransfer`] if `from` and `to` are the same account
    /// - [`LedgerError::BalanceOverflow`] if crediting `to` would overflow
    /// - [`LedgerError::Sync`] on a claim timeout or when two distinct
    ///   accounts share an id
    ///
    /// No balance changes on error.
    pub fn transfer(
        &self,
        from: &Account,
        to: &Account,
        amount: Balance,
    ) -> LedgerResult<TransferReceipt> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        if ptr::eq(from, to) {
            return Err(LedgerError::SelfTransfer(*from.key()));
        }
        if from.key() == to.key() {
            // Neither a lock order nor a claim can tell the two apart.
            return Err(SyncError::KeyCollision(from.key().to_string()).into());
        }

        let mut phases = vec![TransferPhase::Pending];
        let outcome = match &self.coordination {
            Coordination::Ordered(strategy) => {
                let (mut source, mut target) = strategy.lock_pair(from, to)?;
                phases.extend([TransferPhase::LockedLow, TransferPhase::LockedHigh]);

                let outcome = apply(&mut source, &mut target, amount, *to.key())?;
                phases.push(outcome_phase(outcome));
                drop((source, target));
                phases.push(TransferPhase::Unlocked);
                outcome
            }
            Coordination::Allocator { allocator, claim_timeout } => {
                let claim = match claim_timeout {
                    Some(timeout) => allocator.claim_timeout(*from.key(), *to.key(), *timeout)?,
                    None => allocator.claim(*from.key(), *to.key())?,
                };
                phases.push(TransferPhase::Acquired);

                // Claimed: nobody else on this allocator can hold either lock.
                let outcome = {
                    let mut source = from.lock();
                    let mut target = to.lock();
                    apply(&mut source, &mut target, amount, *to.key())?
                };
                phases.push(outcome_phase(outcome));
                drop(claim);
                phases.push(TransferPhase::Released);
                outcome
            }
            Coordination::Global(lock) => {
                let global = lock.lock();
                phases.push(TransferPhase::Acquired);

                let outcome = {
                    let mut source = from.lock();
                    let mut target = to.lock();
                    apply(&mut source, &mut target, amount, *to.key())?
                };
                phases.push(outcome_phase(outcome));
                drop(global);
                phases.push(TransferPhase::Released);
                outcome
            }
        };

        match outcome {
            TransferOutcome::Applied => {
                tracing::trace!(from = %from.key(), to = %to.key(), amount, "transfer applied");
            }
            TransferOutcome::Aborted(reason) => {
                tracing::debug!(
                    from = %from.key(),
                    to = %to.key(),
                    amount,
                    ?reason,
                    "transfer aborted"
                );
            }
        }

        Ok(TransferReceipt {
            strategy: self.strategy(),
            from: *from.key(),
            to: *to.key(),
            amount,
            outcome,
            phases,
        })
    }
}

impl std::fmt::Debug for TransferCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferCoordinator")
            .field("strategy", &self.strategy())
            .finish()
    }
}

/// Debits `source` and credits `target` if `source > amount`. Both locks held.
fn apply(
    source: &mut Balance,
    target: &mut Balance,
    amount: Balance,
    target_id: AccountId,
) -> LedgerResult<TransferOutcome> {
    if *source <= amount {
        return Ok(TransferOutcome::Aborted(AbortReason::InsufficientFunds {
            available: *source,
            requested: amount,
        }));
    }
    let credited = target
        .checked_add(amount)
        .ok_or(LedgerError::BalanceOverflow(target_id))?;

    *source -= amount;
    *target = credited;
    Ok(TransferOutcome::Applied)
}

const fn outcome_phase(outcome: TransferOutcome) -> TransferPhase {
    match outcome {
        TransferOutcome::Applied => TransferPhase::Applied,
        TransferOutcome::Aborted(_) => TransferPhase::Aborted,
    }
}
