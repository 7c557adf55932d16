//! # Teller Pipeline
//!
//! Transfer requests flow through a [`BoundedQueue`] to teller threads, each
//! of which runs [`run_teller`] until it dequeues its shutdown sentinel.
//!
//! ```text
//!   producers ── TransferRequest ──> BoundedQueue ──> tellers ──> TransferCoordinator
//!               (then sentinels via ShutdownPlan)
//! ```

use keel_sync::{consume, BoundedQueue, Envelope};

use crate::account::{AccountId, Balance, Ledger};
use crate::error::LedgerResult;
use crate::transfer::{TransferCoordinator, TransferReceipt};

/// A request to move `amount` from `from` to `to`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferRequest {
    /// Account to debit.
    pub from: AccountId,
    /// Account to credit.
    pub to: AccountId,
    /// Amount to move.
    pub amount: Balance,
}

impl TransferRequest {
    /// Creates a request.
    #[must_use]
    pub const fn new(from: AccountId, to: AccountId, amount: Balance) -> Self {
        Self { from, to, amount }
    }
}

/// Counters for the requests one or more tellers handled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TellerStats {
    /// Transfers that moved money.
    pub applied: u64,
    /// Transfers aborted for insufficient funds.
    pub aborted: u64,
    /// Requests that failed with an error.
    pub rejected: u64,
}

impl TellerStats {
    /// Adds another teller's counters to these.
    pub fn merge(&mut self, other: Self) {
        self.applied += other.applied;
        self.aborted += other.aborted;
        self.rejected += other.rejected;
    }

    /// Total requests handled.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.applied + self.aborted + self.rejected
    }
}

/// Executes requests from `queue` until a shutdown sentinel arrives.
///
/// Failed requests (unknown account, self-transfer, timeout) are counted as
/// rejected and do not stop the teller.
pub fn run_teller(
    queue: &BoundedQueue<Envelope<TransferRequest>>,
    ledger: &Ledger,
    coordinator: &TransferCoordinator,
) -> TellerStats {
    let mut stats = TellerStats::default();
    consume(queue, |request| match execute(ledger, coordinator, request) {
        Ok(receipt) if receipt.is_applied() => stats.applied += 1,
        Ok(_) => stats.aborted += 1,
        Err(e) => {
            tracing::warn!(?request, error = %e, "transfer request rejected");
            stats.rejected += 1;
        }
    });
    tracing::debug!(?stats, "teller stopped");
    stats
}

fn execute(
    ledger: &Ledger,
    coordinator: &TransferCoordinator,
    request: TransferRequest,
) -> LedgerResult<TransferReceipt> {
    let from = ledger.get(request.from)?;
    let to = ledger.get(request.to)?;
    coordinator.transfer(&from, &to, request.amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_sync::ShutdownPlan;

    #[test]
    fn test_counts_each_kind() {
        let ledger = Ledger::with_balances(&[100, 50]).unwrap();
        let coordinator = TransferCoordinator::ordered();
        let queue = BoundedQueue::new(8);

        queue.put(Envelope::Payload(TransferRequest::new(AccountId(0), AccountId(1), 30)));
        queue.put(Envelope::Payload(TransferRequest::new(AccountId(1), AccountId(0), 500)));
        queue.put(Envelope::Payload(TransferRequest::new(AccountId(0), AccountId(9), 1)));
        ShutdownPlan::new(1, 1).emit(0, &queue);

        let stats = run_teller(&queue, &ledger, &coordinator);
        assert_eq!(
            stats,
            TellerStats {
                applied: 1,
                aborted: 1,
                rejected: 1,
            }
        );
        assert_eq!(stats.total(), 3);
        assert_eq!(ledger.balance(AccountId(0)), Ok(70));
        assert_eq!(ledger.balance(AccountId(1)), Ok(80));
    }

    #[test]
    fn test_merge() {
        let mut total = TellerStats::default();
        total.merge(TellerStats {
            applied: 2,
            aborted: 1,
            rejected: 0,
        });
        total.merge(TellerStats {
            applied: 1,
            aborted: 0,
            rejected: 4,
        });
        assert_eq!(
            total,
            TellerStats {
                applied: 3,
                aborted: 1,
                rejected: 4,
            }
        );
    }
}
