//! # Accounts
//!
//! An account is a balance behind its own lock, ordered by its id. The
//! [`Ledger`] hands out ids in increasing order, which is what makes the
//! ordered-lock strategy sound: no two accounts ever share a key.

use std::fmt;
use std::sync::Arc;

use keel_sync::OrderedResource;
use parking_lot::RwLock;

use crate::error::{LedgerError, LedgerResult};

/// Unique account identifier. Also the lock-ordering key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountId(pub u32);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Account balance in the smallest currency unit.
pub type Balance = u64;

/// A balance behind its own lock, keyed by [`AccountId`].
pub type Account = OrderedResource<AccountId, Balance>;

/// Registry of every open account.
#[derive(Debug, Default)]
pub struct Ledger {
    /// Indexed by `AccountId`.
    accounts: RwLock<Vec<Arc<Account>>>,
}

impl Ledger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger with one account per entry of `balances`, ids
    /// assigned in order from `#0`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::TooManyAccounts`] if the ids run out.
    pub fn with_balances(balances: &[Balance]) -> LedgerResult<Self> {
        let ledger = Self::new();
        for &balance in balances {
            ledger.open(balance)?;
        }
        Ok(ledger)
    }

    /// Opens an account holding `initial` and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::TooManyAccounts`] if the ids run out.
    pub fn open(&self, initial: Balance) -> LedgerResult<Arc<Account>> {
        let mut accounts = self.accounts.write();
        let id = u32::try_from(accounts.len()).map_err(|_| LedgerError::TooManyAccounts)?;

        let account = Arc::new(Account::new(AccountId(id), initial));
        accounts.push(Arc::clone(&account));
        tracing::debug!(account = %AccountId(id), initial, "account opened");
        Ok(account)
    }

    /// Looks up an account.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::UnknownAccount`] if no such account exists.
    pub fn get(&self, id: AccountId) -> LedgerResult<Arc<Account>> {
        self.accounts
            .read()
            .get(id.0 as usize)
            .cloned()
            .ok_or(LedgerError::UnknownAccount(id))
    }

    /// Returns the current balance of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::UnknownAccount`] if no such account exists.
    pub fn balance(&self, id: AccountId) -> LedgerResult<Balance> {
        Ok(*self.get(id)?.lock())
    }

    /// Returns the number of open accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.read().len()
    }

    /// Returns true if no account is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.read().is_empty()
    }

    /// Sums every balance.
    ///
    /// Accounts are locked one at a time, never together, so this cannot
    /// deadlock against any transfer strategy. The sum is exact whenever no
    /// transfer is in flight.
    #[must_use]
    pub fn total_balance(&self) -> u128 {
        self.snapshot()
            .iter()
            .map(|account| u128::from(*account.lock()))
            .sum()
    }

    /// Returns every account, in id order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Account>> {
        self.accounts.read().clone()
    }
}
