//! Types module
//!
//! Contains core data structures used throughout the application.
//! This module organizes types into logical submodules:
//! - `balance`: Balance rows and their identifiers
//! - `ledger`: Mutation requests, store changes and ledger entries
//! - `replay`: Operations parsed from a replay input
//! - `error`: Error types for the core and the replay front end

pub mod balance;
pub mod error;
pub mod ledger;
pub mod replay;

pub use balance::{Balance, CurrencyId, UserId};
pub use error::{BackendError, ErrorKind, LedgerError};
pub use ledger::{
    BalanceChange, CommitReceipt, LedgerEntry, LedgerEntryId, MutationKind, MutationOutcome,
    MutationRequest,
};
pub use replay::ReplayOperation;
