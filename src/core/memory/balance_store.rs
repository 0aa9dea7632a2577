//! Thread-safe in-memory balance store
//!
//! This module provides `MemoryBalanceStore`, a `DashMap`-backed
//! implementation of [`BalanceStore`] used by tests, benchmarks and the
//! default replay configuration.
//!
//! # Atomicity
//!
//! A commit holds the balance row's entry guard while it checks the version,
//! appends the ledger entry and writes the new row. No other commit on the
//! same row can interleave, so a balance and its ledger never diverge. The
//! ledger map is only ever locked after a balance entry, never before, which
//! keeps the lock order acyclic.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};

use crate::core::traits::BalanceStore;
use crate::types::{
    BackendError, Balance, BalanceChange, CommitReceipt, CurrencyId, LedgerEntry, UserId,
};

/// In-memory users, balances and ledger
#[derive(Debug, Default)]
pub struct MemoryBalanceStore {
    users: DashSet<UserId>,
    balances: DashMap<(UserId, CurrencyId), Balance>,
    ledger: DashMap<(UserId, CurrencyId), Vec<LedgerEntry>>,
    last_entry_id: AtomicU64,
}

impl MemoryBalanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of ledger entries across all balances
    pub fn ledger_len(&self) -> usize {
        self.ledger.iter().map(|entries| entries.len()).sum()
    }

    fn conflict(change: &BalanceChange, actual: Option<u64>) -> BackendError {
        BackendError::Conflict {
            key: format!("balance:{}:{}", change.user_id, change.currency_id),
            expected: change.expected_version,
            actual,
        }
    }

    /// Append the ledger entry for `change`. Caller holds the balance row.
    fn append(&self, change: &BalanceChange) -> LedgerEntry {
        let id = self.last_entry_id.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = change.ledger_entry(id);
        self.ledger
            .entry((change.user_id, change.currency_id))
            .or_default()
            .push(entry.clone());
        entry
    }
}

impl BalanceStore for MemoryBalanceStore {
    fn register_user(&self, user_id: UserId) -> Result<(), BackendError> {
        self.users.insert(user_id);
        Ok(())
    }

    fn user_exists(&self, user_id: UserId) -> Result<bool, BackendError> {
        Ok(self.users.contains(&user_id))
    }

    fn load_balance(
        &self,
        user_id: UserId,
        currency_id: CurrencyId,
    ) -> Result<Option<Balance>, BackendError> {
        Ok(self
            .balances
            .get(&(user_id, currency_id))
            .map(|row| row.value().clone()))
    }

    fn commit(&self, change: &BalanceChange) -> Result<CommitReceipt, BackendError> {
        let balance = change.next_balance();

        match self.balances.entry((change.user_id, change.currency_id)) {
            Entry::Occupied(mut row) => {
                let actual = row.get().version;
                if change.expected_version != Some(actual) {
                    return Err(Self::conflict(change, Some(actual)));
                }
                let ledger_entry = self.append(change);
                row.insert(balance.clone());
                Ok(CommitReceipt {
                    balance,
                    ledger_entry,
                })
            }
            Entry::Vacant(slot) => {
                if change.expected_version.is_some() {
                    return Err(Self::conflict(change, None));
                }
                let ledger_entry = self.append(change);
                slot.insert(balance.clone());
                Ok(CommitReceipt {
                    balance,
                    ledger_entry,
                })
            }
        }
    }

    fn ledger_entries(
        &self,
        user_id: UserId,
        currency_id: CurrencyId,
    ) -> Result<Vec<LedgerEntry>, BackendError> {
        Ok(self
            .ledger
            .get(&(user_id, currency_id))
            .map(|entries| entries.value().clone())
            .unwrap_or_default())
    }

    fn all_balances(&self) -> Result<Vec<Balance>, BackendError> {
        Ok(self
            .balances
            .iter()
            .map(|row| row.value().clone())
            .collect())
    }
}
