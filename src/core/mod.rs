//! Core business logic module
//!
//! This module contains the balance mutation components:
//! - `traits` - Storage ports (lease store, balance store, cache backend)
//! - `lock_coordinator` - Per-user leases with fail-fast acquisition
//! - `cache` - Read-through, write-invalidate balance cache
//! - `mutator` - Balance mutation orchestration
//! - `memory` - In-memory backends
//! - `sled_store` - Durable embedded backends
//! - `batch_processor` - Concurrent replay partitioned by user

pub mod batch_processor;
pub mod cache;
pub mod lock_coordinator;
pub mod memory;
pub mod mutator;
pub mod sled_store;
pub mod traits;

pub use batch_processor::{BatchProcessor, ReplayResult};
pub use cache::CacheLayer;
pub use lock_coordinator::{LeaseGuard, LeaseHandle, LockConfig, LockCoordinator, LockScope};
pub use memory::{MemoryBalanceStore, MemoryCache, MemoryLeaseStore};
pub use mutator::{BalanceMutator, MutationStage};
pub use sled_store::{SledBalanceStore, SledLeaseStore};
pub use traits::{BalanceStore, CacheBackend, LeaseStore};
