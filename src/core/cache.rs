//! Read-through, write-invalidate cache of balance snapshots
//!
//! The cache is never authoritative. Every backend failure or undecodable
//! entry is logged and treated as a miss, and invalidation failures never
//! fail the mutation that triggered them; the TTL bounds any staleness.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::core::traits::CacheBackend;
use crate::types::{Balance, CurrencyId, UserId};

/// Default time-to-live of a cached balance
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Longest accepted time-to-live (30 days)
pub const MAX_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

/// Cache key of a balance snapshot
pub fn cache_key(user_id: UserId, currency_id: CurrencyId) -> String {
    format!("user_currency:{}:{}", user_id, currency_id)
}

/// Balance cache over a [`CacheBackend`]
#[derive(Debug, Clone)]
pub struct CacheLayer {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl CacheLayer {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached balance, if present and decodable
    pub fn get(&self, user_id: UserId, currency_id: CurrencyId) -> Option<Balance> {
        let key = cache_key(user_id, currency_id);
        let raw = match self.backend.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(error) => {
                warn!(key = %key, error = %error, "cache read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(balance) => Some(balance),
            Err(error) => {
                warn!(key = %key, error = %error, "discarding undecodable cache entry");
                None
            }
        }
    }

    /// Store a snapshot with the configured TTL
    pub fn put(&self, balance: &Balance) {
        let key = cache_key(balance.user_id, balance.currency_id);
        let raw = match serde_json::to_string(balance) {
            Ok(raw) => raw,
            Err(error) => {
                warn!(key = %key, error = %error, "cannot encode balance for cache");
                return;
            }
        };

        if let Err(error) = self.backend.set(&key, raw, self.ttl) {
            warn!(key = %key, error = %error, "cache write failed");
        }
    }

    /// Drop the snapshot for (user, currency)
    ///
    /// Returns whether the backend accepted the delete. Callers may ignore it.
    pub fn invalidate(&self, user_id: UserId, currency_id: CurrencyId) -> bool {
        let key = cache_key(user_id, currency_id);
        match self.backend.delete(&key) {
            Ok(()) => {
                debug!(key = %key, "cache invalidated");
                true
            }
            Err(error) => {
                warn!(key = %key, error = %error, "cache invalidation failed");
                false
            }
        }
    }
}
