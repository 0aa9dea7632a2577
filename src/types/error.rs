//! Error types for the currency ledger
//!
//! This module defines every error the core and the replay front end can
//! report. Errors carry the key and operation they relate to so a failure can
//! be diagnosed from the message alone.
//!
//! # Error Categories
//!
//! - **Not found**: the user or the balance row does not exist
//! - **Contention**: the per-user lease is held by another operation
//! - **Business rules**: insufficient funds, overflow, malformed requests
//! - **Storage**: a lease, balance or ledger backend failed
//! - **Replay I/O**: missing input files, unreadable CSV, bad configuration
//!
//! Cache failures are [`BackendError`]s that the cache layer logs and drops;
//! they never reach a caller as a [`LedgerError`].

use thiserror::Error;

use super::balance::{CurrencyId, UserId};

/// Failure reported by a storage port (lease store, balance store, cache)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// A conditional write found a different version than expected
    #[error("version conflict on {key}: expected {expected:?}, found {actual:?}")]
    Conflict {
        key: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    /// The backend could not be reached or rejected the operation
    #[error("{backend} unavailable: {message}")]
    Unavailable { backend: String, message: String },

    /// A stored value could not be encoded or decoded
    #[error("cannot encode or decode {key}: {message}")]
    Codec { key: String, message: String },
}

impl BackendError {
    pub fn unavailable(backend: &str, message: impl ToString) -> Self {
        BackendError::Unavailable {
            backend: backend.to_string(),
            message: message.to_string(),
        }
    }

    pub fn codec(key: impl Into<String>, message: impl ToString) -> Self {
        BackendError::Codec {
            key: key.into(),
            message: message.to_string(),
        }
    }
}

impl From<sled::Error> for BackendError {
    fn from(error: sled::Error) -> Self {
        BackendError::unavailable("sled", error)
    }
}

/// Coarse classification of a [`LedgerError`], for callers mapping errors to
/// responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    ResourceLocked,
    InsufficientFunds,
    InvalidRequest,
    StorageFailure,
    Replay,
}

/// Main error type for the currency ledger
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// The user is not registered
    ///
    /// Surfaced to the caller and never retried.
    #[error("User {user_id} not found")]
    UserNotFound { user_id: UserId },

    /// The user holds no balance row for this currency
    ///
    /// Returned for subtracts and reads; adds create the row instead.
    #[error("Balance for user {user_id} in currency {currency_id} not found")]
    BalanceNotFound {
        user_id: UserId,
        currency_id: CurrencyId,
    },

    /// Another operation holds the lease for this lock name
    ///
    /// The core never waits or retries; the caller may retry later.
    #[error("Resource is locked: {lock_name}")]
    ResourceLocked { lock_name: String },

    /// A subtract asked for more than the balance holds
    ///
    /// The balance is left unchanged and no ledger entry is written.
    #[error(
        "Insufficient funds for user {user_id} in currency {currency_id}: available {available}, requested {requested}"
    )]
    InsufficientFunds {
        user_id: UserId,
        currency_id: CurrencyId,
        available: u64,
        requested: u64,
    },

    /// An add would overflow the balance
    #[error("Arithmetic overflow for user {user_id} in currency {currency_id}")]
    ArithmeticOverflow {
        user_id: UserId,
        currency_id: CurrencyId,
    },

    /// The request itself is malformed (zero ids, zero amount, ...)
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// A lease, balance or ledger backend failed
    ///
    /// Any lease held by the failing operation has been released before this
    /// error is returned.
    #[error("Storage failure during {operation} on {key}: {source}")]
    StorageFailure {
        key: String,
        operation: String,
        #[source]
        source: BackendError,
    },

    /// Replay input file does not exist
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    /// I/O error while reading input or writing output
    #[error("I/O error: {message}")]
    IoError { message: String },

    /// Malformed replay CSV
    #[error("CSV parse error{}: {message}", line.map(|l| format!(" at line {}", l)).unwrap_or_default())]
    ParseError { line: Option<u64>, message: String },

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl From<std::io::Error> for LedgerError {
    fn from(error: std::io::Error) -> Self {
        LedgerError::IoError {
            message: error.to_string(),
        }
    }
}

impl From<csv::Error> for LedgerError {
    fn from(error: csv::Error) -> Self {
        let line = error.position().map(|pos| pos.line());

        LedgerError::ParseError {
            line,
            message: error.to_string(),
        }
    }
}

impl From<config::ConfigError> for LedgerError {
    fn from(error: config::ConfigError) -> Self {
        LedgerError::config(error)
    }
}

// Helper functions for creating common errors

impl LedgerError {
    pub fn user_not_found(user_id: UserId) -> Self {
        LedgerError::UserNotFound { user_id }
    }

    pub fn balance_not_found(user_id: UserId, currency_id: CurrencyId) -> Self {
        LedgerError::BalanceNotFound {
            user_id,
            currency_id,
        }
    }

    pub fn resource_locked(lock_name: &str) -> Self {
        LedgerError::ResourceLocked {
            lock_name: lock_name.to_string(),
        }
    }

    pub fn insufficient_funds(
        user_id: UserId,
        currency_id: CurrencyId,
        available: u64,
        requested: u64,
    ) -> Self {
        LedgerError::InsufficientFunds {
            user_id,
            currency_id,
            available,
            requested,
        }
    }

    pub fn arithmetic_overflow(user_id: UserId, currency_id: CurrencyId) -> Self {
        LedgerError::ArithmeticOverflow {
            user_id,
            currency_id,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        LedgerError::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn storage(key: impl Into<String>, operation: &str, source: BackendError) -> Self {
        LedgerError::StorageFailure {
            key: key.into(),
            operation: operation.to_string(),
            source,
        }
    }

    pub fn config(message: impl ToString) -> Self {
        LedgerError::Config {
            message: message.to_string(),
        }
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::UserNotFound { .. } | LedgerError::BalanceNotFound { .. } => {
                ErrorKind::NotFound
            }
            LedgerError::ResourceLocked { .. } => ErrorKind::ResourceLocked,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::ArithmeticOverflow { .. } | LedgerError::InvalidRequest { .. } => {
                ErrorKind::InvalidRequest
            }
            LedgerError::StorageFailure { .. } => ErrorKind::StorageFailure,
            LedgerError::FileNotFound { .. }
            | LedgerError::IoError { .. }
            | LedgerError::ParseError { .. }
            | LedgerError::Config { .. } => ErrorKind::Replay,
        }
    }

    /// Whether the same request may succeed if the caller tries again
    ///
    /// True for lease contention and for commits that lost a version race.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::ResourceLocked { .. }
                | LedgerError::StorageFailure {
                    source: BackendError::Conflict { .. },
                    ..
                }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::user_not_found(LedgerError::user_not_found(42), "User 42 not found")]
    #[case::balance_not_found(
        LedgerError::balance_not_found(42, 7),
        "Balance for user 42 in currency 7 not found"
    )]
    #[case::resource_locked(
        LedgerError::resource_locked("currency_lock:42"),
        "Resource is locked: currency_lock:42"
    )]
    #[case::insufficient_funds(
        LedgerError::insufficient_funds(1, 2, 10, 20),
        "Insufficient funds for user 1 in currency 2: available 10, requested 20"
    )]
    #[case::storage_failure(
        LedgerError::storage(
            "balance:1:2",
            "commit",
            BackendError::unavailable("sled", "disk full")
        ),
        "Storage failure during commit on balance:1:2: sled unavailable: disk full"
    )]
    #[case::parse_error_with_line(
        LedgerError::ParseError { line: Some(3), message: "bad op".to_string() },
        "CSV parse error at line 3: bad op"
    )]
    #[case::parse_error_without_line(
        LedgerError::ParseError { line: None, message: "bad op".to_string() },
        "CSV parse error: bad op"
    )]
    fn test_error_display(#[case] error: LedgerError, #[case] expected: &str) {
        assert_eq!(error.to_string(), expected);
    }

    #[rstest]
    #[case::locked(LedgerError::resource_locked("currency_lock:1"), true)]
    #[case::conflict(
        LedgerError::storage(
            "balance:1:1",
            "commit",
            BackendError::Conflict { key: "balance:1:1".to_string(), expected: Some(1), actual: Some(2) }
        ),
        true
    )]
    #[case::backend_down(
        LedgerError::storage("balance:1:1", "commit", BackendError::unavailable("memory", "injected")),
        false
    )]
    #[case::insufficient(LedgerError::insufficient_funds(1, 1, 0, 5), false)]
    #[case::not_found(LedgerError::user_not_found(1), false)]
    fn test_is_retryable(#[case] error: LedgerError, #[case] retryable: bool) {
        assert_eq!(error.is_retryable(), retryable);
    }

    #[rstest]
    #[case::user(LedgerError::user_not_found(1), ErrorKind::NotFound)]
    #[case::balance(LedgerError::balance_not_found(1, 1), ErrorKind::NotFound)]
    #[case::locked(LedgerError::resource_locked("x"), ErrorKind::ResourceLocked)]
    #[case::overflow(LedgerError::arithmetic_overflow(1, 1), ErrorKind::InvalidRequest)]
    #[case::config(LedgerError::config("bad"), ErrorKind::Replay)]
    fn test_kind(#[case] error: LedgerError, #[case] kind: ErrorKind) {
        assert_eq!(error.kind(), kind);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "Permission denied");
        let error: LedgerError = io_error.into();
        assert!(matches!(error, LedgerError::IoError { .. }));
        assert_eq!(error.to_string(), "I/O error: Permission denied");
    }
}
