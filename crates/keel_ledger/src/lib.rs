//! # KEEL Ledger
//!
//! Atomic transfers between two accounts without a deadlock-prone lock order
//! and, unless asked for, without one global lock.
//!
//! ## Design Principles
//!
//! 1. **Integer balances** - `u64`, with checked credit
//! 2. **Both or neither** - a transfer either moves the amount or changes nothing
//! 3. **Strategies are comparable** - the same transfer runs through ordered
//!    locks, allocator claims, or a global lock
//! 4. **External configuration** - strategy and sizing come from TOML
//!
//! ## Example
//!
//! ```rust
//! use keel_ledger::{Ledger, TransferCoordinator, TransferOutcome};
//!
//! let ledger = Ledger::new();
//! let alice = ledger.open(100).unwrap();
//! let bob = ledger.open(50).unwrap();
//!
//! let coordinator = TransferCoordinator::ordered();
//! let receipt = coordinator.transfer(&alice, &bob, 30).unwrap();
//! assert_eq!(receipt.outcome, TransferOutcome::Applied);
//! assert_eq!(*alice.lock(), 70);
//! assert_eq!(*bob.lock(), 80);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod account;
pub mod config;
pub mod error;
pub mod teller;
pub mod transfer;

pub use account::{Account, AccountId, Balance, Ledger};
pub use config::LedgerConfig;
pub use error::{LedgerError, LedgerResult};
pub use teller::{run_teller, TellerStats, TransferRequest};
pub use transfer::{
    AbortReason, TransferCoordinator, TransferOutcome, TransferPhase, TransferReceipt,
    TransferStrategy,
};
