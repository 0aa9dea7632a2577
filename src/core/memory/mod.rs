//! In-memory backends for the storage ports
//!
//! These implementations keep all state in `DashMap`s, which gives
//! fine-grained, per-shard locking:
//!
//! - **MemoryLeaseStore**: lock leases with monotonic-clock expiry
//! - **MemoryBalanceStore**: users, balance rows and the ledger
//! - **MemoryCache**: TTL-bounded balance snapshots
//!
//! They are the default replay backends and the fakes the tests inject.
//! State lives and dies with the process.

pub mod balance_store;
pub mod cache;
pub mod lease_store;

pub use balance_store::MemoryBalanceStore;
pub use cache::MemoryCache;
pub use lease_store::MemoryLeaseStore;
