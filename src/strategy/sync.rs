//! Sequential replay strategy
//!
//! Streams the operations CSV with `SyncReader` and applies each row through
//! the balance mutator on the calling thread, in file order. Memory use is
//! constant in the size of the input.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::mutator::BalanceMutator;
use crate::io::csv_format::write_balances_csv;
use crate::io::sync_reader::SyncReader;
use crate::strategy::ReplayStrategy;
use crate::types::LedgerError;

/// Sequential replay strategy
#[derive(Debug, Clone)]
pub struct SyncReplayStrategy {
    mutator: Arc<BalanceMutator>,
}

impl SyncReplayStrategy {
    pub fn new(mutator: Arc<BalanceMutator>) -> Self {
        Self { mutator }
    }
}

impl ReplayStrategy for SyncReplayStrategy {
    fn process(&self, input_path: &Path, output: &mut dyn Write) -> Result<(), LedgerError> {
        let reader = SyncReader::new(input_path)?;

        for result in reader {
            match result {
                Ok(operation) => {
                    if let Err(e) = self.mutator.replay(&operation) {
                        debug!(operation = ?operation, error = %e, "replay operation rejected");
                    }
                }
                Err(e) => warn!(error = %e, "skipping replay row"),
            }
        }

        let balances = self.mutator.balances()?;
        write_balances_csv(&balances, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::{CacheLayer, DEFAULT_TTL};
    use crate::core::lock_coordinator::{LockConfig, LockCoordinator};
    use crate::core::memory::{MemoryBalanceStore, MemoryCache, MemoryLeaseStore};
    use tempfile::NamedTempFile;

    fn create_temp_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("Failed to write to temp file");
        file.flush().expect("Failed to flush temp file");
        file
    }

    fn strategy() -> SyncReplayStrategy {
        SyncReplayStrategy::new(Arc::new(BalanceMutator::new(
            Arc::new(MemoryBalanceStore::new()),
            LockCoordinator::new(Arc::new(MemoryLeaseStore::new()), LockConfig::default()),
            CacheLayer::new(Arc::new(MemoryCache::new()), DEFAULT_TTL),
        )))
    }

    #[test]
    fn test_sync_strategy_replays_in_order() {
        let file = create_temp_csv(
            "op,user,currency,amount\n\
             register,1,,\n\
             add,1,1,100\n\
             subtract,1,1,30\n\
             subtract,1,1,500\n\
             add,2,1,10\n",
        );
        let mut output = Vec::new();

        strategy().process(file.path(), &mut output).unwrap();

        // User 2 was never registered, the overdraft is rejected
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "user,currency,balance\n1,1,70\n"
        );
    }

    #[test]
    fn test_sync_strategy_handles_missing_file() {
        let mut output = Vec::new();

        let result = strategy().process(Path::new("nonexistent.csv"), &mut output);

        assert!(matches!(result, Err(LedgerError::FileNotFound { .. })));
        assert!(output.is_empty());
    }

    #[test]
    fn test_sync_strategy_continues_on_malformed_record() {
        let file = create_temp_csv(
            "op,user,currency,amount\n\
             register,1,,\n\
             add,1,1,lots\n\
             add,1,1,5\n",
        );
        let mut output = Vec::new();

        strategy().process(file.path(), &mut output).unwrap();

        assert_eq!(
            String::from_utf8(output).unwrap(),
            "user,currency,balance\n1,1,5\n"
        );
    }

    #[test]
    fn test_sync_strategy_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SyncReplayStrategy>();
    }
}
