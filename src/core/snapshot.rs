//! Projection snapshots in SQLite.
//!
//! A snapshot is derived data: the serialized state after folding events
//! `1..=seq`, tagged with the digest of the raw event stored at `seq`. A
//! snapshot whose digest no longer matches the ledger is ignored, and the
//! whole database may be deleted at any time.

use crate::core::error::TrellisError;
use rusqlite::{Connection, OptionalExtension, params};
use std::fs;
use std::path::{Path, PathBuf};

const SNAPSHOT_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS snapshots (
        seq INTEGER PRIMARY KEY,
        event_digest TEXT NOT NULL,
        state_json TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
";

/// Snapshots older than the newest few are pruned on save.
const KEEP_SNAPSHOTS: i64 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub seq: u64,
    pub event_digest: String,
    pub state_json: String,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

fn connect(path: &Path) -> Result<Connection, TrellisError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    Ok(conn)
}

fn to_sql_seq(seq: u64) -> Result<i64, TrellisError> {
    i64::try_from(seq).map_err(|_| TrellisError::InvalidInput(format!("seq {} out of range", seq)))
}

impl SnapshotStore {
    pub fn open(path: &Path) -> Result<Self, TrellisError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(TrellisError::IoError)?;
        }
        let conn = connect(path)?;
        conn.execute_batch(SNAPSHOT_SCHEMA)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn save(&self, snapshot: &Snapshot) -> Result<(), TrellisError> {
        let seq = to_sql_seq(snapshot.seq)?;
        let mut conn = connect(&self.path)?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO snapshots(seq, event_digest, state_json, created_at)
             VALUES(?1, ?2, ?3, ?4)",
            params![
                seq,
                snapshot.event_digest,
                snapshot.state_json,
                chrono::Utc::now().to_rfc3339()
            ],
        )?;
        tx.execute(
            "DELETE FROM snapshots WHERE seq NOT IN
             (SELECT seq FROM snapshots ORDER BY seq DESC LIMIT ?1)",
            params![KEEP_SNAPSHOTS],
        )?;
        tx.commit()?;
        tracing::debug!(seq = snapshot.seq, "projection snapshot saved");
        Ok(())
    }

    /// Newest snapshot at or below `max_seq`.
    pub fn load_latest(&self, max_seq: u64) -> Result<Option<Snapshot>, TrellisError> {
        let conn = connect(&self.path)?;
        let row = conn
            .query_row(
                "SELECT seq, event_digest, state_json FROM snapshots
                 WHERE seq <= ?1 ORDER BY seq DESC LIMIT 1",
                params![to_sql_seq(max_seq)?],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.map(|(seq, event_digest, state_json)| Snapshot {
            seq: u64::try_from(seq).unwrap_or(0),
            event_digest,
            state_json,
        }))
    }

    pub fn clear(&self) -> Result<(), TrellisError> {
        let conn = connect(&self.path)?;
        conn.execute("DELETE FROM snapshots", [])?;
        Ok(())
    }

    pub fn count(&self) -> Result<u64, TrellisError> {
        let conn = connect(&self.path)?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?;
        Ok(u64::try_from(n).unwrap_or(0))
    }
}
