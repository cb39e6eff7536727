//! Proof-directory configuration (`trellis.toml`).
//!
//! Every key is optional. A missing file means defaults.

use crate::core::error::TrellisError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "trellis.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub ledger: LedgerConfig,
    pub lease: LeaseConfig,
    pub snapshot: SnapshotConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub lock_retries: u32,
    pub lock_backoff_ms: u64,
    pub lock_backoff_max_ms: u64,
    /// Lock files older than this were left behind by a crashed writer.
    pub stale_lock_secs: u64,
    /// Times the facade re-validates and re-appends after losing the tail to
    /// another writer before returning `ConcurrencyConflict`. 0 disables.
    pub commit_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_retries: 50,
            lock_backoff_ms: 10,
            lock_backoff_max_ms: 500,
            stale_lock_secs: 30,
            commit_retries: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    pub default_ttl_secs: u64,
    pub max_ttl_secs: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            max_ttl_secs: 86_400,
        }
    }
}

impl LeaseConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn max_ttl(&self) -> Duration {
        Duration::from_secs(self.max_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub enabled: bool,
    pub every_events: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            every_events: 64,
        }
    }
}

impl Config {
    /// Load `trellis.toml` from the proof directory root.
    pub fn load(proof_root: &Path) -> Result<Config, TrellisError> {
        let path = proof_root.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(&path).map_err(TrellisError::IoError)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TrellisError> {
        if self.ledger.lock_retries == 0 {
            return Err(TrellisError::ConfigError(
                "ledger.lock_retries must be at least 1".to_string(),
            ));
        }
        if self.ledger.lock_backoff_max_ms < self.ledger.lock_backoff_ms {
            return Err(TrellisError::ConfigError(
                "ledger.lock_backoff_max_ms must be >= ledger.lock_backoff_ms".to_string(),
            ));
        }
        if self.lease.max_ttl_secs == 0 {
            return Err(TrellisError::ConfigError(
                "lease.max_ttl_secs must be positive".to_string(),
            ));
        }
        if self.lease.default_ttl_secs == 0 || self.lease.default_ttl_secs > self.lease.max_ttl_secs
        {
            return Err(TrellisError::ConfigError(format!(
                "lease.default_ttl_secs must be in 1..={}",
                self.lease.max_ttl_secs
            )));
        }
        if self.snapshot.every_events == 0 {
            return Err(TrellisError::ConfigError(
                "snapshot.every_events must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
