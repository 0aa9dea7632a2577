//! Concurrent batch replay strategy
//!
//! Reads the operations CSV in batches and replays each batch with the
//! `BatchProcessor` on a multi-threaded tokio runtime.
//!
//! ```text
//! AsyncReplayStrategy
//!     ├── BatchConfig (batch_size, worker_threads)
//!     ├── AsyncReader (batch CSV reading)
//!     └── BatchProcessor (user partitioning + blocking tasks)
//!         └── Arc<BalanceMutator>
//! ```
//!
//! Batches run one after another, so a user whose operations span several
//! batches still sees them in file order. Within a batch, different users
//! proceed in parallel.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::batch_processor::BatchProcessor;
use crate::core::mutator::BalanceMutator;
use crate::io::async_reader::AsyncReader;
use crate::io::csv_format::write_balances_csv;
use crate::strategy::ReplayStrategy;
use crate::types::LedgerError;

/// Configuration for batch replay
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    /// Number of operations per batch
    pub batch_size: usize,
    /// Worker threads of the replay runtime; users within a batch run in
    /// parallel on them, batches run one after another
    pub worker_threads: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            worker_threads: num_cpus::get(),
        }
    }
}

impl BatchConfig {
    /// Create a config, replacing zero values with defaults
    pub fn new(batch_size: usize, worker_threads: usize) -> Self {
        let default = Self::default();

        let batch_size = if batch_size == 0 {
            warn!(
                batch_size,
                default = default.batch_size,
                "invalid batch_size, using default"
            );
            default.batch_size
        } else {
            batch_size
        };

        let worker_threads = if worker_threads == 0 {
            warn!(
                worker_threads,
                default = default.worker_threads,
                "invalid worker_threads, using default"
            );
            default.worker_threads
        } else {
            worker_threads
        };

        Self {
            batch_size,
            worker_threads,
        }
    }
}

/// Concurrent batch replay strategy
#[derive(Debug, Clone)]
pub struct AsyncReplayStrategy {
    config: BatchConfig,
    mutator: Arc<BalanceMutator>,
}

impl AsyncReplayStrategy {
    pub fn new(config: BatchConfig, mutator: Arc<BalanceMutator>) -> Self {
        Self { config, mutator }
    }
}

impl ReplayStrategy for AsyncReplayStrategy {
    fn process(&self, input_path: &Path, output: &mut dyn Write) -> Result<(), LedgerError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.worker_threads)
            .build()
            .map_err(|e| LedgerError::IoError {
                message: format!("Failed to create tokio runtime: {}", e),
            })?;

        runtime.block_on(async {
            let processor = BatchProcessor::new(Arc::clone(&self.mutator));

            let file = tokio::fs::File::open(input_path).await.map_err(|e| {
                match e.kind() {
                    std::io::ErrorKind::NotFound => LedgerError::FileNotFound {
                        path: input_path.display().to_string(),
                    },
                    _ => LedgerError::IoError {
                        message: format!("Failed to open file '{}': {}", input_path.display(), e),
                    },
                }
            })?;
            let compat_file = tokio_util::compat::TokioAsyncReadCompatExt::compat(file);
            let mut reader = AsyncReader::new(compat_file);

            loop {
                let batch = reader.read_batch(self.config.batch_size).await;
                if batch.is_empty() {
                    break;
                }

                let results = processor.process_batch(batch).await;
                let rejected = results.iter().filter(|r| r.result.is_err()).count();
                debug!(operations = results.len(), rejected, "batch replayed");
            }

            Ok::<(), LedgerError>(())
        })?;

        let balances = self.mutator.balances()?;
        write_balances_csv(&balances, output)
    }
}
