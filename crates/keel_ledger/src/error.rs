//! # Ledger Error Types
//!
//! All errors that can occur while moving money between accounts. An
//! insufficient balance is not among them: that is an aborted transfer, see
//! [`crate::TransferOutcome`].

use keel_sync::SyncError;
use thiserror::Error;

use crate::account::AccountId;

/// Errors that can occur in the ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Source and destination are the same account.
    #[error("cannot transfer from account {0} to itself")]
    SelfTransfer(AccountId),

    /// Transfers must move a positive amount.
    #[error("invalid transfer amount: {0}")]
    InvalidAmount(u64),

    /// Crediting the destination would overflow its balance.
    #[error("balance overflow on account {0}")]
    BalanceOverflow(AccountId),

    /// No account with this id is registered.
    #[error("account not found: {0}")]
    UnknownAccount(AccountId),

    /// Every account id is in use.
    #[error("account id space exhausted")]
    TooManyAccounts,

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The underlying lock or claim failed (timeout, bad pairing).
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;
