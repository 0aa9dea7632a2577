//! Storage ports used by the core
//!
//! The core never talks to a concrete backend. The lock coordinator, the
//! balance mutator and the cache layer receive these capabilities as
//! `Arc<dyn ...>` so that in-memory fakes, the embedded sled backend or an
//! external service can be swapped in without touching the core.

use std::fmt::Debug;
use std::time::Duration;

use crate::types::{
    Balance, BackendError, BalanceChange, CommitReceipt, CurrencyId, LedgerEntry, UserId,
};

/// Shared coordination store holding lock leases
///
/// Implementations must make both operations atomic with respect to every
/// other client of the same store, across processes when the store is shared.
pub trait LeaseStore: Send + Sync + Debug {
    /// Create the lease `name` for `holder` unless an unexpired lease exists
    ///
    /// Returns `Ok(true)` if the lease was created (an expired lease counts as
    /// absent) and `Ok(false)` if someone else currently holds it. Never waits.
    fn try_acquire(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool, BackendError>;

    /// Delete the lease `name` only if it is still owned by `holder`
    ///
    /// Returns `Ok(false)` when the lease is gone or owned by someone else.
    fn release(&self, name: &str, holder: &str) -> Result<bool, BackendError>;
}

/// Durable source of truth for users, balances and the ledger
pub trait BalanceStore: Send + Sync + Debug {
    /// Register a user. Registering an existing user is a no-op.
    fn register_user(&self, user_id: UserId) -> Result<(), BackendError>;

    /// Check whether a user is registered
    fn user_exists(&self, user_id: UserId) -> Result<bool, BackendError>;

    /// Read the current balance row, if any
    fn load_balance(
        &self,
        user_id: UserId,
        currency_id: CurrencyId,
    ) -> Result<Option<Balance>, BackendError>;

    /// Conditionally write a balance and append its ledger entry atomically
    ///
    /// The write happens only if the row is still at `change.expected_version`
    /// (`None` = the row must not exist). Otherwise nothing is written and
    /// [`BackendError::Conflict`] is returned. Balance and ledger either both
    /// change or neither does.
    fn commit(&self, change: &BalanceChange) -> Result<CommitReceipt, BackendError>;

    /// Ledger entries for one balance, oldest first
    fn ledger_entries(
        &self,
        user_id: UserId,
        currency_id: CurrencyId,
    ) -> Result<Vec<LedgerEntry>, BackendError>;

    /// Snapshot of every balance row
    fn all_balances(&self) -> Result<Vec<Balance>, BackendError>;
}

/// Key-value cache with per-entry time-to-live
///
/// Purely advisory: callers treat every error as a miss.
pub trait CacheBackend: Send + Sync + Debug {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), BackendError>;

    fn delete(&self, key: &str) -> Result<(), BackendError>;
}
