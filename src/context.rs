//! Wiring of stores, coordinator, cache and mutator from configuration
//!
//! `LedgerContext` is the single place where concrete backends are chosen.
//! Everything else receives its collaborators as explicit `Arc` capabilities.

use std::sync::Arc;

use tracing::info;

use crate::config::{AppConfig, BackendKind};
use crate::core::cache::CacheLayer;
use crate::core::lock_coordinator::LockCoordinator;
use crate::core::memory::{MemoryBalanceStore, MemoryCache, MemoryLeaseStore};
use crate::core::mutator::BalanceMutator;
use crate::core::sled_store::{open_db, SledBalanceStore, SledLeaseStore};
use crate::core::traits::{BalanceStore, LeaseStore};
use crate::types::LedgerError;

/// Main context for ledger operations
#[derive(Debug, Clone)]
pub struct LedgerContext {
    pub config: AppConfig,
    pub mutator: Arc<BalanceMutator>,
}

impl LedgerContext {
    /// Build every port from `config`
    ///
    /// Sled-backed ports share one database opened at `store.path`.
    pub fn from_config(config: AppConfig) -> Result<Self, LedgerError> {
        let db = if config.uses_sled() {
            let path = &config.store.path;
            Some(open_db(path).map_err(|e| {
                LedgerError::storage(path.display().to_string(), "open_database", e)
            })?)
        } else {
            None
        };

        let store: Arc<dyn BalanceStore> = match (&config.store.backend, &db) {
            (BackendKind::Sled, Some(db)) => Arc::new(
                SledBalanceStore::from_db(db)
                    .map_err(|e| LedgerError::storage("balances", "open_tree", e))?,
            ),
            _ => Arc::new(MemoryBalanceStore::new()),
        };

        let leases: Arc<dyn LeaseStore> = match (&config.lock.backend, &db) {
            (BackendKind::Sled, Some(db)) => Arc::new(
                SledLeaseStore::from_db(db)
                    .map_err(|e| LedgerError::storage("leases", "open_tree", e))?,
            ),
            _ => Arc::new(MemoryLeaseStore::new()),
        };

        let locks = LockCoordinator::new(leases, config.lock_config()?);
        let cache = CacheLayer::new(Arc::new(MemoryCache::new()), config.cache_ttl());
        let mutator = Arc::new(BalanceMutator::new(store, locks, cache));

        info!(
            store = ?config.store.backend,
            locks = ?config.lock.backend,
            scope = ?config.lock.scope,
            lease_ms = config.lock.lease_ms,
            cache_ttl_secs = config.cache.ttl_secs,
            "ledger context ready"
        );

        Ok(Self { config, mutator })
    }
}
