//! In-process lease store
//!
//! `MemoryLeaseStore` keeps leases in a `DashMap`, so create-if-absent and
//! delete-if-owner run under the entry's shard lock and are atomic for every
//! thread in the process. It coordinates a single process only; several
//! processes need a shared backend such as the sled lease store or an
//! external service implementing [`LeaseStore`].

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::core::traits::LeaseStore;
use crate::types::BackendError;

#[derive(Debug, Clone)]
struct MemoryLease {
    holder: String,
    /// `None` when the TTL reaches past what `Instant` can represent
    expires_at: Option<Instant>,
}

impl MemoryLease {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Thread-safe in-memory lease store
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    leases: DashMap<String, MemoryLease>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current holder of an unexpired lease, if any
    pub fn holder(&self, name: &str) -> Option<String> {
        let now = Instant::now();
        self.leases
            .get(name)
            .filter(|lease| lease.is_live(now))
            .map(|lease| lease.holder.clone())
    }
}

impl LeaseStore for MemoryLeaseStore {
    fn try_acquire(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool, BackendError> {
        let now = Instant::now();
        let lease = MemoryLease {
            holder: holder.to_string(),
            expires_at: now.checked_add(ttl),
        };

        match self.leases.entry(name.to_string()) {
            Entry::Occupied(mut existing) => {
                if existing.get().is_live(now) {
                    return Ok(false);
                }
                existing.insert(lease);
                Ok(true)
            }
            Entry::Vacant(slot) => {
                slot.insert(lease);
                Ok(true)
            }
        }
    }

    fn release(&self, name: &str, holder: &str) -> Result<bool, BackendError> {
        Ok(self
            .leases
            .remove_if(name, |_, lease| lease.holder == holder)
            .is_some())
    }
}
