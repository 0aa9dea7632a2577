//! Replay strategy module
//!
//! This module defines the Strategy pattern for complete replay pipelines:
//! reading an operations CSV, driving every operation through the balance
//! mutator and writing the resulting balances. Implementations (sequential,
//! concurrent batch) are selected at runtime.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::cli::StrategyType;
use crate::core::mutator::BalanceMutator;
use crate::types::LedgerError;

pub mod r#async;
pub mod sync;

pub use self::r#async::{AsyncReplayStrategy, BatchConfig};
pub use sync::SyncReplayStrategy;

/// Replay strategy trait for complete replay pipelines
pub trait ReplayStrategy: Send + Sync {
    /// Replay the operations in `input_path` and write final balances
    ///
    /// # Arguments
    ///
    /// * `input_path` - Path to the operations CSV
    /// * `output` - Writer receiving the `user,currency,balance` CSV
    ///
    /// # Returns
    ///
    /// * `Ok(())` once every row was attempted and the output written
    /// * `Err(LedgerError)` on a fatal error
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The input file cannot be opened
    /// - The final balances cannot be read from the store
    /// - Output cannot be written
    ///
    /// Rejected operations (malformed rows, insufficient funds, unknown users,
    /// ...) are logged and skipped; they never abort the replay.
    fn process(&self, input_path: &Path, output: &mut dyn Write) -> Result<(), LedgerError>;
}

/// Create a replay strategy over `mutator`
///
/// `config` is only used by the async strategy; `None` means defaults.
pub fn create_strategy(
    strategy_type: StrategyType,
    config: Option<BatchConfig>,
    mutator: Arc<BalanceMutator>,
) -> Box<dyn ReplayStrategy> {
    match strategy_type {
        StrategyType::Sync => Box::new(SyncReplayStrategy::new(mutator)),
        StrategyType::Async => {
            let config = config.unwrap_or_default();
            Box::new(AsyncReplayStrategy::new(config, mutator))
        }
    }
}
