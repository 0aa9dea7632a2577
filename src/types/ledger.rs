//! Mutation and ledger types for the currency ledger
//!
//! This module defines the typed mutation request handed to the balance
//! mutator, the change record handed to a balance store, and the immutable
//! ledger entries that make up the audit trail.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::balance::{Balance, CurrencyId, UserId};
use super::error::LedgerError;

/// Ledger entry identifier, assigned by the balance store
pub type LedgerEntryId = u64;

/// Kinds of balance mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    /// Increase the balance. Creates the balance row on first use.
    Add,

    /// Decrease the balance. Requires an existing row holding at least the
    /// requested amount.
    Subtract,
}

impl MutationKind {
    /// Lowercase name used in logs, lock names and the ledger
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Add => "add",
            MutationKind::Subtract => "subtract",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to change one balance
///
/// This is the explicit, typed entry point of the balance mutator. Callers
/// build it from whatever they parsed and pass it by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationRequest {
    pub user_id: UserId,
    pub currency_id: CurrencyId,
    pub amount: u64,
    pub kind: MutationKind,
}

impl MutationRequest {
    pub fn add(user_id: UserId, currency_id: CurrencyId, amount: u64) -> Self {
        Self {
            user_id,
            currency_id,
            amount,
            kind: MutationKind::Add,
        }
    }

    pub fn subtract(user_id: UserId, currency_id: CurrencyId, amount: u64) -> Self {
        Self {
            user_id,
            currency_id,
            amount,
            kind: MutationKind::Subtract,
        }
    }

    /// Check the shape of the request before any lock is taken
    ///
    /// Ids and amounts must be positive, and the amount must fit the signed
    /// ledger delta.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.user_id == 0 {
            return Err(LedgerError::invalid_request("user id must be positive"));
        }
        if self.currency_id == 0 {
            return Err(LedgerError::invalid_request("currency id must be positive"));
        }
        if self.amount == 0 {
            return Err(LedgerError::invalid_request("amount must be positive"));
        }
        if self.amount > i64::MAX as u64 {
            return Err(LedgerError::invalid_request(format!(
                "amount {} exceeds the maximum of {}",
                self.amount,
                i64::MAX
            )));
        }
        Ok(())
    }

    /// Signed change this request applies to the balance
    ///
    /// Only meaningful after [`MutationRequest::validate`] succeeded.
    pub fn delta(&self) -> i64 {
        let amount = self.amount as i64;
        match self.kind {
            MutationKind::Add => amount,
            MutationKind::Subtract => -amount,
        }
    }
}

/// Immutable audit record of one committed mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Store-assigned id, strictly increasing within one store
    pub id: LedgerEntryId,
    pub user_id: UserId,
    pub currency_id: CurrencyId,
    pub kind: MutationKind,
    /// Unsigned amount as requested
    pub amount: u64,
    /// Signed change applied to the balance
    pub delta: i64,
    /// Quantity right after this entry was committed
    pub balance_after: u64,
    pub recorded_at: DateTime<Utc>,
}

/// A fully computed change handed to a balance store for commit
///
/// The store applies it only if the row is still at `expected_version`
/// (`None` meaning the row must not exist yet), writing the new balance and
/// the ledger entry in one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceChange {
    pub user_id: UserId,
    pub currency_id: CurrencyId,
    pub kind: MutationKind,
    pub amount: u64,
    pub delta: i64,
    pub expected_version: Option<u64>,
    pub new_quantity: u64,
    pub recorded_at: DateTime<Utc>,
}

impl BalanceChange {
    /// Balance row as it looks after this change commits
    pub fn next_balance(&self) -> Balance {
        Balance {
            user_id: self.user_id,
            currency_id: self.currency_id,
            quantity: self.new_quantity,
            version: self.expected_version.unwrap_or(0) + 1,
        }
    }

    /// Ledger entry recording this change under the given id
    pub fn ledger_entry(&self, id: LedgerEntryId) -> LedgerEntry {
        LedgerEntry {
            id,
            user_id: self.user_id,
            currency_id: self.currency_id,
            kind: self.kind,
            amount: self.amount,
            delta: self.delta,
            balance_after: self.new_quantity,
            recorded_at: self.recorded_at,
        }
    }
}

/// What a store returns after a successful commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub balance: Balance,
    pub ledger_entry: LedgerEntry,
}

/// Result of a successful mutation: the new balance and its ledger record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOutcome {
    pub balance: Balance,
    pub ledger_entry: LedgerEntry,
}

impl From<CommitReceipt> for MutationOutcome {
    fn from(receipt: CommitReceipt) -> Self {
        Self {
            balance: receipt.balance,
            ledger_entry: receipt.ledger_entry,
        }
    }
}
