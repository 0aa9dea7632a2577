//! Currency Ledger Library
//! # Overview
//!
//! Per-user balances of virtual currencies with strict consistency. Every
//! add or subtract runs under a per-user lease, commits the new balance and
//! its ledger entry in one version-checked store write, and invalidates the
//! cached snapshot afterwards.
//!
//! # Architecture
//!
//! - [`types`] - Balances, mutation requests, ledger entries, errors
//! - [`core`] - The balance mutation engine:
//!   - [`core::lock_coordinator`] - Fail-fast per-user leases
//!   - [`core::mutator`] - Mutation orchestration
//!   - [`core::cache`] - Read-through, write-invalidate balance cache
//!   - [`core::traits`] - Storage ports, with [`core::memory`] and
//!     [`core::sled_store`] backends
//!   - [`core::batch_processor`] - Concurrent replay partitioned by user
//! - [`config`] / [`context`] - Layered configuration and backend wiring
//! - [`cli`], [`io`], [`strategy`] - The CSV replay front end
//! - [`logging`] - Tracing subscriber setup
//!
//! # Example
//!
//! ```
//! use currency_ledger::config::AppConfig;
//! use currency_ledger::context::LedgerContext;
//!
//! let context = LedgerContext::from_config(AppConfig::load(None).unwrap()).unwrap();
//! context.mutator.register_user(1).unwrap();
//! context.mutator.add(1, 1, 100).unwrap();
//! let outcome = context.mutator.subtract(1, 1, 30).unwrap();
//! assert_eq!(outcome.balance.quantity, 70);
//! ```

pub mod cli;
pub mod config;
pub mod context;
pub mod core;
pub mod io;
pub mod logging;
pub mod strategy;
pub mod types;

pub use crate::core::{BalanceMutator, LockCoordinator, LockScope};
pub use context::LedgerContext;
pub use io::write_balances_csv;
pub use types::{
    Balance, CurrencyId, LedgerEntry, LedgerError, MutationKind, MutationOutcome,
    MutationRequest, UserId,
};
