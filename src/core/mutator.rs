//! Balance mutation engine
//!
//! This module provides the `BalanceMutator` that applies add/subtract
//! requests by coordinating the lock coordinator, the balance store and the
//! cache layer.
//!
//! Each mutation runs the same critical section:
//!
//! 1. Validate the request shape
//! 2. Acquire the per-user lease (fail fast if held)
//! 3. Check the user and load the balance row
//! 4. Compute and validate the new quantity
//! 5. Commit balance and ledger entry in one version-checked store write
//! 6. Invalidate the cached snapshot
//! 7. Release the lease, on every path
//!
//! The version check in step 5 means a mutation never overwrites a row it
//! did not read, even when two lock scopes let mutations overlap.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::core::cache::CacheLayer;
use crate::core::lock_coordinator::LockCoordinator;
use crate::core::traits::BalanceStore;
use crate::types::{
    Balance, BalanceChange, CurrencyId, LedgerEntry, LedgerError, MutationKind, MutationOutcome,
    MutationRequest, ReplayOperation, UserId,
};

/// Progress of a single mutation, reported in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStage {
    Idle,
    LockAcquired,
    Validated,
    Committed,
    Unlocked,
    Done,
    Failed,
}

impl MutationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationStage::Idle => "idle",
            MutationStage::LockAcquired => "lock_acquired",
            MutationStage::Validated => "validated",
            MutationStage::Committed => "committed",
            MutationStage::Unlocked => "unlocked",
            MutationStage::Done => "done",
            MutationStage::Failed => "failed",
        }
    }
}

impl fmt::Display for MutationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn user_key(user_id: UserId) -> String {
    format!("user:{}", user_id)
}

fn balance_key(user_id: UserId, currency_id: CurrencyId) -> String {
    format!("balance:{}:{}", user_id, currency_id)
}

/// Balance mutation engine
///
/// Holds its collaborators as explicit capabilities. It is `Send + Sync`;
/// share it through an `Arc` and call it from as many threads as needed.
#[derive(Debug, Clone)]
pub struct BalanceMutator {
    store: Arc<dyn BalanceStore>,
    locks: LockCoordinator,
    cache: CacheLayer,
}

impl BalanceMutator {
    pub fn new(store: Arc<dyn BalanceStore>, locks: LockCoordinator, cache: CacheLayer) -> Self {
        Self {
            store,
            locks,
            cache,
        }
    }

    pub fn locks(&self) -> &LockCoordinator {
        &self.locks
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    /// Add `amount` to a user's balance, creating the row if needed
    pub fn add(
        &self,
        user_id: UserId,
        currency_id: CurrencyId,
        amount: u64,
    ) -> Result<MutationOutcome, LedgerError> {
        self.mutate(MutationRequest::add(user_id, currency_id, amount))
    }

    /// Subtract `amount` from an existing balance
    pub fn subtract(
        &self,
        user_id: UserId,
        currency_id: CurrencyId,
        amount: u64,
    ) -> Result<MutationOutcome, LedgerError> {
        self.mutate(MutationRequest::subtract(user_id, currency_id, amount))
    }

    /// Apply one balance mutation
    ///
    /// # Arguments
    ///
    /// * `request` - The typed mutation to apply
    ///
    /// # Returns
    ///
    /// * `Ok(MutationOutcome)` with the new balance and its ledger entry
    /// * `Err(LedgerError)` if nothing was changed
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for zero ids or amounts
    /// - `ResourceLocked` if another operation holds the user's lease
    /// - `UserNotFound` if the user is not registered
    /// - `BalanceNotFound` for a subtract on a currency the user never held
    /// - `InsufficientFunds` if a subtract exceeds the balance
    /// - `ArithmeticOverflow` if an add overflows the balance
    /// - `StorageFailure` if a backend failed or the commit lost a version race
    ///
    /// On every error the balance and the ledger are unchanged and the lease,
    /// if it was acquired, has been released.
    pub fn mutate(&self, request: MutationRequest) -> Result<MutationOutcome, LedgerError> {
        if let Err(error) = request.validate() {
            return Err(self.failed(&request, MutationStage::Idle, error));
        }

        let lock_name = self.locks.lock_name(request.kind, request.user_id);
        let guard = match self.locks.acquire(&lock_name) {
            Ok(guard) => guard,
            Err(error) => return Err(self.failed(&request, MutationStage::Idle, error)),
        };

        let mut stage = MutationStage::LockAcquired;
        let result = self.apply(&request, &mut stage);
        let released = guard.release();
        debug!(
            lock_name = %lock_name,
            lease_released = released,
            stage_reached = %stage,
            stage = %MutationStage::Unlocked,
            "mutation unlocked"
        );

        match result {
            Ok(outcome) => {
                debug!(
                    user_id = request.user_id,
                    currency_id = request.currency_id,
                    kind = %request.kind,
                    amount = request.amount,
                    balance = outcome.balance.quantity,
                    version = outcome.balance.version,
                    ledger_entry = outcome.ledger_entry.id,
                    stage = %MutationStage::Done,
                    "mutation committed"
                );
                Ok(outcome)
            }
            Err(error) => Err(self.failed(&request, stage, error)),
        }
    }

    /// Critical section, run while the lease is held
    fn apply(
        &self,
        request: &MutationRequest,
        stage: &mut MutationStage,
    ) -> Result<MutationOutcome, LedgerError> {
        let user_id = request.user_id;
        let currency_id = request.currency_id;

        let exists = self
            .store
            .user_exists(user_id)
            .map_err(|e| LedgerError::storage(user_key(user_id), "user_exists", e))?;
        if !exists {
            return Err(LedgerError::user_not_found(user_id));
        }

        let key = balance_key(user_id, currency_id);
        let current = self
            .store
            .load_balance(user_id, currency_id)
            .map_err(|e| LedgerError::storage(&key, "load_balance", e))?;

        let (expected_version, quantity) = match (current, request.kind) {
            (Some(balance), _) => (Some(balance.version), balance.quantity),
            (None, MutationKind::Add) => (None, 0),
            (None, MutationKind::Subtract) => {
                return Err(LedgerError::balance_not_found(user_id, currency_id))
            }
        };

        let new_quantity = match request.kind {
            MutationKind::Add => quantity
                .checked_add(request.amount)
                .ok_or_else(|| LedgerError::arithmetic_overflow(user_id, currency_id))?,
            MutationKind::Subtract => quantity.checked_sub(request.amount).ok_or_else(|| {
                LedgerError::insufficient_funds(user_id, currency_id, quantity, request.amount)
            })?,
        };
        *stage = MutationStage::Validated;

        let change = BalanceChange {
            user_id,
            currency_id,
            kind: request.kind,
            amount: request.amount,
            delta: request.delta(),
            expected_version,
            new_quantity,
            recorded_at: Utc::now(),
        };
        let receipt = self
            .store
            .commit(&change)
            .map_err(|e| LedgerError::storage(&key, "commit", e))?;
        *stage = MutationStage::Committed;

        // Only after the commit: a failed mutation leaves the snapshot valid
        self.cache.invalidate(user_id, currency_id);

        Ok(receipt.into())
    }

    fn failed(
        &self,
        request: &MutationRequest,
        reached: MutationStage,
        error: LedgerError,
    ) -> LedgerError {
        warn!(
            user_id = request.user_id,
            currency_id = request.currency_id,
            kind = %request.kind,
            amount = request.amount,
            stage_reached = %reached,
            stage = %MutationStage::Failed,
            error = %error,
            "mutation failed"
        );
        error
    }

    /// Register a user so that mutations on it are accepted
    ///
    /// Registering an existing user is a no-op.
    pub fn register_user(&self, user_id: UserId) -> Result<(), LedgerError> {
        if user_id == 0 {
            return Err(LedgerError::invalid_request("user id must be positive"));
        }
        self.store
            .register_user(user_id)
            .map_err(|e| LedgerError::storage(user_key(user_id), "register_user", e))
    }

    /// Apply one replay operation, discarding the mutation outcome
    pub fn replay(&self, operation: &ReplayOperation) -> Result<(), LedgerError> {
        match operation {
            ReplayOperation::Register { user_id } => self.register_user(*user_id),
            ReplayOperation::Mutate(request) => self.mutate(*request).map(|_| ()),
        }
    }

    /// Current balance, served from the cache when possible
    ///
    /// A miss reads the store and fills the cache. The row is read again
    /// after the fill; if a commit moved it on in between, that commit's
    /// invalidation may already have run, so the snapshot is dropped.
    pub fn balance(
        &self,
        user_id: UserId,
        currency_id: CurrencyId,
    ) -> Result<Balance, LedgerError> {
        if let Some(balance) = self.cache.get(user_id, currency_id) {
            return Ok(balance);
        }

        let balance = self
            .store
            .load_balance(user_id, currency_id)
            .map_err(|e| LedgerError::storage(balance_key(user_id, currency_id), "load_balance", e))?
            .ok_or_else(|| LedgerError::balance_not_found(user_id, currency_id))?;
        self.cache.put(&balance);

        match self.store.load_balance(user_id, currency_id) {
            Ok(Some(latest)) if latest.version == balance.version => {}
            _ => {
                debug!(
                    user_id,
                    currency_id,
                    version = balance.version,
                    "balance changed during cache fill"
                );
                self.cache.invalidate(user_id, currency_id);
            }
        }
        Ok(balance)
    }

    /// Ledger of one balance, in commit order
    pub fn ledger(
        &self,
        user_id: UserId,
        currency_id: CurrencyId,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.store
            .ledger_entries(user_id, currency_id)
            .map_err(|e| LedgerError::storage(balance_key(user_id, currency_id), "ledger_entries", e))
    }

    /// Snapshot of every balance, straight from the store
    pub fn balances(&self) -> Result<Vec<Balance>, LedgerError> {
        self.store
            .all_balances()
            .map_err(|e| LedgerError::storage("balances", "all_balances", e))
    }
}
