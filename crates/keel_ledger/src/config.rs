//! # Ledger Configuration
//!
//! Strategy and sizing loaded from TOML. Every field is optional:
//!
//! ```toml
//! strategy = "allocator"      # ordered_locks | allocator | global_lock
//! claim_timeout_ms = 250      # allocator only; absent means wait forever
//! request_queue_capacity = 64
//! tellers = 4
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::{LedgerError, LedgerResult};
use crate::transfer::TransferStrategy;

/// Configuration for a transfer pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    /// Deadlock-avoidance strategy.
    pub strategy: TransferStrategy,
    /// Upper bound on an allocator claim wait, in milliseconds.
    pub claim_timeout_ms: Option<u64>,
    /// Capacity of the request queue between producers and tellers.
    pub request_queue_capacity: usize,
    /// Number of teller threads draining the request queue.
    pub tellers: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            strategy: TransferStrategy::OrderedLocks,
            claim_timeout_ms: None,
            request_queue_capacity: 64,
            tellers: 4,
        }
    }
}

impl LedgerConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidConfig`] on malformed TOML, unknown keys,
    /// or values that fail [`LedgerConfig::validate`].
    pub fn from_toml_str(source: &str) -> LedgerResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| LedgerError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the sizes are usable.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidConfig`] if the queue capacity or the
    /// teller count is zero.
    pub fn validate(&self) -> LedgerResult<()> {
        if self.request_queue_capacity == 0 {
            return Err(LedgerError::InvalidConfig(
                "request_queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.tellers == 0 {
            return Err(LedgerError::InvalidConfig(
                "tellers must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the allocator claim timeout, if any.
    #[must_use]
    pub fn claim_timeout(&self) -> Option<Duration> {
        self.claim_timeout_ms.map(Duration::from_millis)
    }
}
