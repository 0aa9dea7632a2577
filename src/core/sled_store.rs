//! Embedded durable backends built on sled
//!
//! `SledBalanceStore` keeps users, balances and the ledger in three trees of
//! one sled database and commits a balance together with its ledger entry in
//! a multi-tree transaction. `SledLeaseStore` keeps leases in a fourth tree
//! and uses compare-and-swap for create-if-absent and delete-if-owner.
//!
//! Values are JSON. Keys are big-endian ids, so a prefix scan over
//! `user ++ currency` returns a balance's ledger in commit order.
//!
//! A sled database is opened by one process at a time; both stores are safe
//! to share between threads and survive restarts.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use sled::{Db, Tree};
use tracing::debug;

use crate::core::traits::{BalanceStore, LeaseStore};
use crate::types::{
    BackendError, Balance, BalanceChange, CommitReceipt, CurrencyId, LedgerEntry, UserId,
};

fn balance_key(user_id: UserId, currency_id: CurrencyId) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&user_id.to_be_bytes());
    key[8..].copy_from_slice(&currency_id.to_be_bytes());
    key
}

fn ledger_key(user_id: UserId, currency_id: CurrencyId, entry_id: u64) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..16].copy_from_slice(&balance_key(user_id, currency_id));
    key[16..].copy_from_slice(&entry_id.to_be_bytes());
    key
}

fn encode<T: Serialize>(label: &str, value: &T) -> Result<Vec<u8>, BackendError> {
    serde_json::to_vec(value).map_err(|e| BackendError::codec(label, e))
}

fn decode<T: DeserializeOwned>(label: &str, bytes: &[u8]) -> Result<T, BackendError> {
    serde_json::from_slice(bytes).map_err(|e| BackendError::codec(label, e))
}

/// Open a sled database at `path`, creating it if needed
pub fn open_db(path: &Path) -> Result<Db, BackendError> {
    Ok(sled::open(path)?)
}

/// Durable balance store on sled
#[derive(Debug, Clone)]
pub struct SledBalanceStore {
    db: Db,
    users: Tree,
    balances: Tree,
    ledger: Tree,
}

impl SledBalanceStore {
    /// Open (or create) the store's trees inside an existing database
    pub fn from_db(db: &Db) -> Result<Self, BackendError> {
        Ok(Self {
            db: db.clone(),
            users: db.open_tree("users")?,
            balances: db.open_tree("balances")?,
            ledger: db.open_tree("ledger")?,
        })
    }

    pub fn open(path: &Path) -> Result<Self, BackendError> {
        Self::from_db(&open_db(path)?)
    }
}

impl BalanceStore for SledBalanceStore {
    fn register_user(&self, user_id: UserId) -> Result<(), BackendError> {
        self.users.insert(user_id.to_be_bytes(), Vec::<u8>::new())?;
        self.db.flush()?;
        Ok(())
    }

    fn user_exists(&self, user_id: UserId) -> Result<bool, BackendError> {
        Ok(self.users.contains_key(user_id.to_be_bytes())?)
    }

    fn load_balance(
        &self,
        user_id: UserId,
        currency_id: CurrencyId,
    ) -> Result<Option<Balance>, BackendError> {
        let label = format!("balance:{}:{}", user_id, currency_id);
        match self.balances.get(balance_key(user_id, currency_id))? {
            Some(bytes) => Ok(Some(decode(&label, &bytes)?)),
            None => Ok(None),
        }
    }

    fn commit(&self, change: &BalanceChange) -> Result<CommitReceipt, BackendError> {
        let label = format!("balance:{}:{}", change.user_id, change.currency_id);
        let key = balance_key(change.user_id, change.currency_id);

        // generate_id starts at zero; ledger ids start at one like the memory store
        let entry_id = self.db.generate_id()? + 1;
        let balance = change.next_balance();
        let ledger_entry = change.ledger_entry(entry_id);
        let entry_key = ledger_key(change.user_id, change.currency_id, entry_id);
        let balance_bytes = encode(&label, &balance)?;
        let entry_bytes = encode(&label, &ledger_entry)?;

        let result = (&self.balances, &self.ledger).transaction(|(balances, ledger)| {
            let actual = match balances.get(key)? {
                Some(bytes) => Some(
                    decode::<Balance>(&label, &bytes)
                        .map_err(ConflictableTransactionError::Abort)?
                        .version,
                ),
                None => None,
            };
            if actual != change.expected_version {
                return Err(ConflictableTransactionError::Abort(BackendError::Conflict {
                    key: label.clone(),
                    expected: change.expected_version,
                    actual,
                }));
            }

            balances.insert(&key[..], balance_bytes.as_slice())?;
            ledger.insert(&entry_key[..], entry_bytes.as_slice())?;
            Ok(())
        });

        match result {
            Ok(()) => {
                self.db.flush()?;
                debug!(key = %label, entry_id, version = balance.version, "sled commit");
                Ok(CommitReceipt {
                    balance,
                    ledger_entry,
                })
            }
            Err(TransactionError::Abort(error)) => Err(error),
            Err(TransactionError::Storage(error)) => Err(error.into()),
        }
    }

    fn ledger_entries(
        &self,
        user_id: UserId,
        currency_id: CurrencyId,
    ) -> Result<Vec<LedgerEntry>, BackendError> {
        let label = format!("ledger:{}:{}", user_id, currency_id);
        self.ledger
            .scan_prefix(balance_key(user_id, currency_id))
            .map(|item| {
                let (_, bytes) = item?;
                decode(&label, &bytes)
            })
            .collect()
    }

    fn all_balances(&self) -> Result<Vec<Balance>, BackendError> {
        self.balances
            .iter()
            .map(|item| {
                let (_, bytes) = item?;
                decode("balances", &bytes)
            })
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LeaseRecord {
    holder: String,
    expires_at_ms: i64,
}

/// Lease store on a sled tree
///
/// Expiry uses wall-clock milliseconds so a lease left behind by a crashed
/// run expires normally after a restart.
#[derive(Debug, Clone)]
pub struct SledLeaseStore {
    leases: Tree,
}

impl SledLeaseStore {
    pub fn from_db(db: &Db) -> Result<Self, BackendError> {
        Ok(Self {
            leases: db.open_tree("leases")?,
        })
    }
}

impl LeaseStore for SledLeaseStore {
    fn try_acquire(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool, BackendError> {
        let now_ms = Utc::now().timestamp_millis();
        let current = self.leases.get(name)?;

        if let Some(bytes) = &current {
            let record: LeaseRecord = decode(name, bytes)?;
            if record.expires_at_ms > now_ms {
                return Ok(false);
            }
        }

        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let record = LeaseRecord {
            holder: holder.to_string(),
            expires_at_ms: now_ms.saturating_add(ttl_ms),
        };
        let swapped = self
            .leases
            .compare_and_swap(name, current, Some(encode(name, &record)?))?;

        // A failed swap means another holder got in between the read and the write
        Ok(swapped.is_ok())
    }

    fn release(&self, name: &str, holder: &str) -> Result<bool, BackendError> {
        let current = match self.leases.get(name)? {
            Some(bytes) => bytes,
            None => return Ok(false),
        };

        let record: LeaseRecord = decode(name, &current)?;
        if record.holder != holder {
            return Ok(false);
        }

        let swapped = self
            .leases
            .compare_and_swap(name, Some(current), None::<Vec<u8>>)?;
        Ok(swapped.is_ok())
    }
}
