//! In-process TTL cache backend

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::core::traits::CacheBackend;
use crate::types::BackendError;

#[derive(Debug, Clone)]
struct CachedValue {
    value: String,
    /// `None` when the TTL reaches past what `Instant` can represent
    expires_at: Option<Instant>,
}

impl CachedValue {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// `DashMap`-backed cache with per-entry expiry
///
/// Expired entries read as misses and are evicted on that read.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, CachedValue>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheBackend for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(cached) if cached.is_fresh(now) => return Ok(Some(cached.value.clone())),
            Some(_) => {}
            None => return Ok(None),
        }

        // The read guard is gone here; evicting under it would deadlock the shard
        self.entries
            .remove_if(key, |_, cached| !cached.is_fresh(now));
        Ok(None)
    }

    fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), BackendError> {
        self.entries.insert(
            key.to_string(),
            CachedValue {
                value,
                expires_at: Instant::now().checked_add(ttl),
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.entries.remove(key);
        Ok(())
    }
}
