//! Proof directory layout.
//!
//! A proof directory is the only thing agents share. Everything under it is
//! either the ledger (authoritative) or derived and safe to delete.
//!
//! ```text
//! <root>/
//!   trellis.toml          optional configuration
//!   ledger/               append-only event files + .lock
//!   blobs/<kind>/         content-addressed JSON blobs
//!   cache/projection.db   SQLite projection snapshots (derived)
//! ```

use crate::core::error::TrellisError;
use std::fs;
use std::path::{Path, PathBuf};

pub const LEDGER_DIR_NAME: &str = "ledger";
pub const BLOBS_DIR_NAME: &str = "blobs";
pub const CACHE_DIR_NAME: &str = "cache";
pub const SNAPSHOT_DB_NAME: &str = "projection.db";

/// Handle to one proof directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Store {
    /// Absolute or caller-relative path to the proof directory root
    pub root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.root.join(LEDGER_DIR_NAME)
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join(BLOBS_DIR_NAME)
    }

    pub fn snapshot_db_path(&self) -> PathBuf {
        self.root.join(CACHE_DIR_NAME).join(SNAPSHOT_DB_NAME)
    }

    /// Create the directory skeleton. Idempotent.
    pub fn ensure_layout(&self) -> Result<(), TrellisError> {
        for dir in [
            self.ledger_dir(),
            self.blobs_dir(),
            self.root.join(CACHE_DIR_NAME),
        ] {
            fs::create_dir_all(&dir).map_err(TrellisError::IoError)?;
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.ledger_dir().is_dir()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
