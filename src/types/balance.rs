//! Balance-related types for the currency ledger
//!
//! This module defines the Balance row and the identifiers it is keyed by.

use serde::{Deserialize, Serialize};

/// User identifier (valid ids are positive)
pub type UserId = u64;

/// Currency identifier (valid ids are positive)
pub type CurrencyId = u64;

/// Current holding of one currency by one user
///
/// Balances are keyed by `(user_id, currency_id)` and are only ever changed
/// through the balance mutator, which appends a ledger entry in the same
/// store transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Owner of the balance
    pub user_id: UserId,

    /// Currency held
    pub currency_id: CurrencyId,

    /// Current quantity. Unsigned, and subtracts are validated before commit,
    /// so a persisted balance is never negative.
    pub quantity: u64,

    /// Commit counter used as the conditional-update guard
    ///
    /// A freshly created row has version 1; every committed mutation bumps it
    /// by one.
    pub version: u64,
}

impl Balance {
    /// Create the first version of a balance row
    pub fn new(user_id: UserId, currency_id: CurrencyId, quantity: u64) -> Self {
        Balance {
            user_id,
            currency_id,
            quantity,
            version: 1,
        }
    }

    /// The `(user_id, currency_id)` key of this row
    pub fn key(&self) -> (UserId, CurrencyId) {
        (self.user_id, self.currency_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_balance_starts_at_version_one() {
        let balance = Balance::new(7, 3, 100);

        assert_eq!(balance.key(), (7, 3));
        assert_eq!(balance.quantity, 100);
        assert_eq!(balance.version, 1);
    }

    #[test]
    fn test_balance_json_snapshot() {
        let balance = Balance::new(1, 2, 30);
        let json = serde_json::to_string(&balance).unwrap();

        assert_eq!(
            json,
            r#"{"user_id":1,"currency_id":2,"quantity":30,"version":1}"#
        );
        assert_eq!(serde_json::from_str::<Balance>(&json).unwrap(), balance);
    }
}
