//! Layered application configuration
//!
//! Settings are resolved from built-in defaults, then an optional TOML/YAML
//! file, then `LEDGER_*` environment variables using `__` between nested
//! keys (e.g. `LEDGER_LOCK__LEASE_MS=5000`, `LEDGER_STORE__BACKEND=sled`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::core::cache::MAX_TTL;
use crate::core::lock_coordinator::{LockConfig, LockScope};
use crate::types::LedgerError;

/// Which implementation backs a storage port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process-local DashMap backend
    #[default]
    Memory,
    /// Embedded sled database at `store.path`
    Sled,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LockSettings {
    pub backend: BackendKind,
    pub lease_ms: u64,
    pub scope: LockScope,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheSettings {
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreSettings {
    pub backend: BackendKind,
    /// sled database directory, shared by every sled-backed port
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogSettings {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppConfig {
    pub lock: LockSettings,
    pub cache: CacheSettings,
    pub store: StoreSettings,
    pub log: LogSettings,
}

impl AppConfig {
    /// Load configuration, reading `file` if given
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Config` if the file is missing or malformed, a
    /// value has the wrong type, or a duration is zero or out of range.
    pub fn load(file: Option<&Path>) -> Result<Self, LedgerError> {
        let mut builder = Config::builder()
            .set_default("lock.backend", "memory")?
            .set_default("lock.lease_ms", 10_000i64)?
            .set_default("lock.scope", "unified")?
            .set_default("cache.ttl_secs", 3_600i64)?
            .set_default("store.backend", "memory")?
            .set_default("store.path", "data/ledger.sled")?
            .set_default("log.level", "info")?;

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config: AppConfig = builder
            .add_source(
                Environment::with_prefix("LEDGER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), LedgerError> {
        self.lock_config()?;
        if self.cache.ttl_secs == 0 {
            return Err(LedgerError::config("cache.ttl_secs must be positive"));
        }
        if self.cache.ttl_secs > MAX_TTL.as_secs() {
            return Err(LedgerError::config(format!(
                "cache.ttl_secs must not exceed {}",
                MAX_TTL.as_secs()
            )));
        }
        Ok(())
    }

    /// Lock coordinator settings
    pub fn lock_config(&self) -> Result<LockConfig, LedgerError> {
        LockConfig::new(Duration::from_millis(self.lock.lease_ms), self.lock.scope)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    /// Whether any port needs the sled database
    pub fn uses_sled(&self) -> bool {
        self.lock.backend == BackendKind::Sled || self.store.backend == BackendKind::Sled
    }
}
