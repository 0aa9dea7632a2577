use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::core::lock_coordinator::LockScope;
use crate::strategy::BatchConfig;

#[derive(Parser, Debug)]
#[command(name = "currency-ledger")]
#[command(about = "Replay currency balance operations through the ledger core", long_about = None)]
pub struct CliArgs {
    #[arg(value_name = "INPUT", help = "Path to the operations CSV (op,user,currency,amount)")]
    pub input_file: PathBuf,

    #[arg(
        long = "strategy",
        value_name = "STRATEGY",
        default_value = "async",
        help = "Replay strategy: 'sync' for sequential or 'async' for concurrent per-user batches"
    )]
    pub strategy: StrategyType,

    #[arg(
        long = "batch-size",
        value_name = "SIZE",
        help = "Number of operations per batch (default: 1000)"
    )]
    pub batch_size: Option<usize>,

    #[arg(
        long = "worker-threads",
        alias = "max-concurrent",
        value_name = "COUNT",
        help = "Worker threads replaying the users of a batch in parallel (default: CPU cores)"
    )]
    pub worker_threads: Option<usize>,

    #[arg(
        long = "config",
        value_name = "FILE",
        help = "Configuration file (TOML or YAML); LEDGER_* environment variables override it"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long = "lock-scope",
        value_name = "SCOPE",
        help = "Lock naming: one lock per user ('unified') or per user and operation ('per-kind')"
    )]
    pub lock_scope: Option<LockScope>,
}

#[derive(Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum StrategyType {
    Sync,
    Async,
}

impl CliArgs {
    pub fn to_batch_config(&self) -> BatchConfig {
        if self.batch_size.is_some() || self.worker_threads.is_some() {
            let default = BatchConfig::default();
            BatchConfig::new(
                self.batch_size.unwrap_or(default.batch_size),
                self.worker_threads.unwrap_or(default.worker_threads),
            )
        } else {
            BatchConfig::default()
        }
    }
}
