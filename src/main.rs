//! Currency Ledger CLI
//!
//! Replays a CSV of balance operations through the ledger core and prints the
//! final balances.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- operations.csv > balances.csv
//! cargo run -- --strategy sync operations.csv > balances.csv
//! cargo run -- --strategy async --batch-size 2000 --worker-threads 8 operations.csv
//! cargo run -- --config ledger.toml --lock-scope per-kind operations.csv
//! ```
//!
//! Logs go to stderr; `RUST_LOG` overrides `log.level`.
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error (bad configuration, file not found, unwritable output, etc.)

use std::process;

use currency_ledger::cli;
use currency_ledger::config::AppConfig;
use currency_ledger::context::LedgerContext;
use currency_ledger::logging;
use currency_ledger::strategy;
use currency_ledger::types::LedgerError;
use tracing::error;

fn run(args: cli::CliArgs) -> Result<(), LedgerError> {
    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(scope) = args.lock_scope {
        config.lock.scope = scope;
    }
    logging::init(&config.log.level);

    let context = LedgerContext::from_config(config)?;

    let batch_config = if matches!(args.strategy, cli::StrategyType::Async) {
        Some(args.to_batch_config())
    } else {
        None
    };
    let strategy = strategy::create_strategy(args.strategy.clone(), batch_config, context.mutator);

    let mut output = std::io::stdout();
    strategy.process(&args.input_file, &mut output)
}

fn main() {
    let args = cli::parse_args();

    if let Err(e) = run(args) {
        // The subscriber may not be installed yet if configuration failed
        logging::init("info");
        error!(error = %e, "replay failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
