//! Lease-based mutual exclusion keyed by operation class and user
//!
//! The `LockCoordinator` grants time-bounded leases named
//! `{prefix}:{user_id}` on a shared [`LeaseStore`]. Acquisition is a single,
//! non-blocking attempt: contention fails fast with
//! [`LedgerError::ResourceLocked`] and the caller decides whether to retry.
//!
//! A granted lease is represented by a [`LeaseGuard`] that releases the lease
//! when dropped, so every exit path out of a critical section gives the lock
//! back. If a holder dies without releasing, the lease simply expires.
//!
//! # Thread Safety
//!
//! The coordinator holds only an `Arc` to the store and its configuration. It
//! is `Send + Sync` and meant to be shared between all mutating threads.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::traits::LeaseStore;
use crate::types::{LedgerError, MutationKind, UserId};

/// Default lease duration, matching a critical section of a few store calls
/// with a wide margin
pub const DEFAULT_LEASE: Duration = Duration::from_secs(10);

/// Longest accepted lease
pub const MAX_LEASE: Duration = Duration::from_secs(3600);

/// How lock names are derived from a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LockScope {
    /// One lock per user for every kind of mutation: `currency_lock:{user}`
    #[default]
    Unified,

    /// Separate locks for adds and subtracts:
    /// `add_currency_lock:{user}` / `subtract_currency_lock:{user}`
    ///
    /// An add and a subtract on the same user may then overlap. Version
    /// checked commits still keep the balance correct; the loser of such a
    /// race gets a retryable storage conflict.
    PerKind,
}

impl LockScope {
    /// Lock name prefix for a mutation kind under this scope
    pub fn prefix(&self, kind: MutationKind) -> &'static str {
        match (self, kind) {
            (LockScope::Unified, _) => "currency_lock",
            (LockScope::PerKind, MutationKind::Add) => "add_currency_lock",
            (LockScope::PerKind, MutationKind::Subtract) => "subtract_currency_lock",
        }
    }
}

/// Lock coordinator settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    pub lease: Duration,
    pub scope: LockScope,
}

impl LockConfig {
    /// Build a validated configuration
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Config` if `lease` is zero or above [`MAX_LEASE`].
    pub fn new(lease: Duration, scope: LockScope) -> Result<Self, LedgerError> {
        if lease.is_zero() {
            return Err(LedgerError::config("lock lease duration must be positive"));
        }
        if lease > MAX_LEASE {
            return Err(LedgerError::config(format!(
                "lock lease duration must not exceed {}ms",
                MAX_LEASE.as_millis()
            )));
        }
        Ok(Self { lease, scope })
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease: DEFAULT_LEASE,
            scope: LockScope::Unified,
        }
    }
}

/// A lease held by this process
#[derive(Debug, Clone)]
pub struct LeaseHandle {
    pub name: String,
    /// Unique token proving ownership on release
    pub holder: String,
    pub acquired_at: Instant,
    pub lease: Duration,
}

impl LeaseHandle {
    /// Whether the lease duration has already run out locally
    pub fn is_elapsed(&self) -> bool {
        self.acquired_at.elapsed() >= self.lease
    }
}

/// RAII guard over an acquired lease
///
/// Dropping the guard releases the lease. Use [`LeaseGuard::release`] to
/// release explicitly and learn whether the lease was still ours.
#[derive(Debug)]
pub struct LeaseGuard<'a> {
    coordinator: &'a LockCoordinator,
    handle: LeaseHandle,
    released: bool,
}

impl LeaseGuard<'_> {
    pub fn handle(&self) -> &LeaseHandle {
        &self.handle
    }

    pub fn name(&self) -> &str {
        &self.handle.name
    }

    /// Release now
    ///
    /// # Returns
    ///
    /// `true` if the lease was still held by this guard and is now deleted.
    pub fn release(mut self) -> bool {
        self.released = true;
        self.coordinator.release(&self.handle)
    }
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.coordinator.release(&self.handle);
        }
    }
}

/// Grants and releases per-user leases
#[derive(Debug, Clone)]
pub struct LockCoordinator {
    store: Arc<dyn LeaseStore>,
    config: LockConfig,
}

impl LockCoordinator {
    pub fn new(store: Arc<dyn LeaseStore>, config: LockConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Lock name guarding mutations of `kind` for `user_id`
    pub fn lock_name(&self, kind: MutationKind, user_id: UserId) -> String {
        format!("{}:{}", self.config.scope.prefix(kind), user_id)
    }

    /// Acquire `lock_name` with the configured lease duration
    ///
    /// See [`LockCoordinator::acquire_with_lease`].
    pub fn acquire(&self, lock_name: &str) -> Result<LeaseGuard<'_>, LedgerError> {
        self.acquire_with_lease(lock_name, self.config.lease)
    }

    /// Try once to acquire `lock_name` for `lease`
    ///
    /// # Arguments
    ///
    /// * `lock_name` - Name of the lease, e.g. `currency_lock:42`
    /// * `lease` - How long the lease stays valid if never released
    ///
    /// # Returns
    ///
    /// * `Ok(LeaseGuard)` holding the lease under a fresh holder token
    /// * `Err(LedgerError)` if the lease could not be granted
    ///
    /// # Errors
    ///
    /// - `ResourceLocked` if another holder has an unexpired lease
    /// - `StorageFailure` (operation `acquire_lock`) if the lease store failed
    /// - `InvalidRequest` if `lease` is zero
    pub fn acquire_with_lease(
        &self,
        lock_name: &str,
        lease: Duration,
    ) -> Result<LeaseGuard<'_>, LedgerError> {
        if lease.is_zero() {
            return Err(LedgerError::invalid_request(
                "lease duration must be positive",
            ));
        }

        let holder = Uuid::new_v4().to_string();
        match self.store.try_acquire(lock_name, &holder, lease) {
            Ok(true) => {
                debug!(lock = %lock_name, holder = %holder, lease_ms = lease.as_millis() as u64, "lock acquired");
                Ok(LeaseGuard {
                    coordinator: self,
                    handle: LeaseHandle {
                        name: lock_name.to_string(),
                        holder,
                        acquired_at: Instant::now(),
                        lease,
                    },
                    released: false,
                })
            }
            Ok(false) => {
                debug!(lock = %lock_name, "lock held by another operation");
                Err(LedgerError::resource_locked(lock_name))
            }
            Err(error) => Err(LedgerError::storage(lock_name, "acquire_lock", error)),
        }
    }

    /// Release a lease if this handle still owns it
    ///
    /// Never fails: a lease that is already gone, was taken over after
    /// expiring, or cannot be released because the store is down is logged
    /// and left to expire.
    pub fn release(&self, handle: &LeaseHandle) -> bool {
        if handle.is_elapsed() {
            warn!(
                lock = %handle.name,
                held_ms = handle.acquired_at.elapsed().as_millis() as u64,
                lease_ms = handle.lease.as_millis() as u64,
                "lease elapsed before release"
            );
        }

        match self.store.release(&handle.name, &handle.holder) {
            Ok(true) => {
                debug!(lock = %handle.name, holder = %handle.holder, "lock released");
                true
            }
            Ok(false) => {
                warn!(lock = %handle.name, holder = %handle.holder, "lock was no longer held on release");
                false
            }
            Err(error) => {
                warn!(lock = %handle.name, error = %error, "failed to release lock");
                false
            }
        }
    }
}
