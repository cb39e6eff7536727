//! Append-only, totally ordered event log on a shared directory.
//!
//! Each event is one file, `ledger/<seq:012>.json`. The ledger is opaque to
//! payloads: callers hand it an encoder that receives the assigned sequence
//! number and returns the bytes to persist.
//!
//! # Concurrency
//!
//! Appends from any number of processes serialize on `ledger/.lock`, taken
//! with `create_new` (single winner per path). While holding it, the writer
//! reads the current tail, writes a temp file, fsyncs it, and hard-links it to
//! its final name. A hard link never replaces an existing file, so even a
//! wrongly broken lock cannot overwrite history.
//!
//! A writer that crashes while holding the lock leaves the file behind; once
//! it is older than `stale_lock_secs` the next writer removes it.

use crate::core::config::LedgerConfig;
use crate::core::error::TrellisError;
use regex::Regex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use ulid::Ulid;

const LOCK_FILE_NAME: &str = ".lock";
const TMP_PREFIX: &str = ".tmp-";
const SEQ_WIDTH: usize = 12;

fn event_file_pattern() -> Result<&'static Regex, TrellisError> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(\d{12})\.json$"))
        .as_ref()
        .map_err(|e| TrellisError::ConfigError(format!("event file pattern: {}", e)))
}

/// The on-disk ledger. Cheap to construct; holds no open handles.
#[derive(Debug, Clone)]
pub struct Ledger {
    dir: PathBuf,
    config: LedgerConfig,
}

impl Ledger {
    /// Open (creating if needed) the ledger directory.
    pub fn open(dir: &Path, config: LedgerConfig) -> Result<Self, TrellisError> {
        fs::create_dir_all(dir).map_err(TrellisError::IoError)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            config,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn event_path(&self, seq: u64) -> PathBuf {
        self.dir.join(format!("{:0width$}.json", seq, width = SEQ_WIDTH))
    }

    /// Append unconditionally. Returns the assigned sequence number.
    pub fn append<F>(&self, encode: F) -> Result<u64, TrellisError>
    where
        F: FnOnce(u64) -> Result<Vec<u8>, TrellisError>,
    {
        self.append_inner(None, encode)
    }

    /// Append only if the last committed seq is still `expected_last`.
    ///
    /// This is the commit point for optimistic concurrency: a caller that
    /// validated against a projection at `expected_last` loses with
    /// `ConcurrencyConflict` if anyone appended in between.
    pub fn append_if_sequence<F>(&self, expected_last: u64, encode: F) -> Result<u64, TrellisError>
    where
        F: FnOnce(u64) -> Result<Vec<u8>, TrellisError>,
    {
        self.append_inner(Some(expected_last), encode)
    }

    fn append_inner<F>(&self, expected_last: Option<u64>, encode: F) -> Result<u64, TrellisError>
    where
        F: FnOnce(u64) -> Result<Vec<u8>, TrellisError>,
    {
        let _lock = self.acquire_lock()?;

        let last = self.count()?;
        if let Some(expected) = expected_last
            && expected != last
        {
            return Err(TrellisError::ConcurrencyConflict {
                expected,
                actual: last,
            });
        }

        let seq = last + 1;
        let bytes = encode(seq)?;
        self.write_event_file(seq, &bytes)?;
        tracing::debug!(seq, bytes = bytes.len(), "ledger append");
        Ok(seq)
    }

    fn write_event_file(&self, seq: u64, bytes: &[u8]) -> Result<(), TrellisError> {
        let tmp_path = self.dir.join(format!("{}{}", TMP_PREFIX, Ulid::new()));
        let final_path = self.event_path(seq);

        let write_result = (|| -> Result<(), TrellisError> {
            let mut f = OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&tmp_path)
                .map_err(TrellisError::IoError)?;
            f.write_all(bytes).map_err(TrellisError::IoError)?;
            f.sync_all().map_err(TrellisError::IoError)?;
            Ok(())
        })();

        let link_result = write_result.and_then(|_| match fs::hard_link(&tmp_path, &final_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                Err(TrellisError::ConcurrencyConflict {
                    expected: seq - 1,
                    actual: seq,
                })
            }
            Err(err) => Err(TrellisError::IoError(err)),
        });

        let _ = fs::remove_file(&tmp_path);
        link_result
    }

    /// Highest committed sequence number; 0 for an empty ledger.
    pub fn count(&self) -> Result<u64, TrellisError> {
        Ok(self.list_seqs()?.last().copied().unwrap_or(0))
    }

    fn list_seqs(&self) -> Result<Vec<u64>, TrellisError> {
        let pattern = event_file_pattern()?;
        let mut seqs = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(TrellisError::IoError)? {
            let entry = entry.map_err(TrellisError::IoError)?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(caps) = pattern.captures(name)
                && let Ok(seq) = caps[1].parse::<u64>()
            {
                seqs.push(seq);
            }
        }
        seqs.sort_unstable();
        Ok(seqs)
    }

    /// Visit every event in sequence order.
    ///
    /// An unreadable or empty entry is skipped with a warning so a damaged
    /// file never hides the rest of history. An error from `visit` stops the
    /// scan and is returned.
    ///
    /// Returns the highest seq scanned, skipped entries included.
    pub fn scan<F>(&self, visit: F) -> Result<u64, TrellisError>
    where
        F: FnMut(u64, &[u8]) -> Result<(), TrellisError>,
    {
        self.scan_after(0, visit)
    }

    /// Like [`Ledger::scan`], restricted to events with `seq > after`.
    /// Returns `after` when nothing newer exists.
    pub fn scan_after<F>(&self, after: u64, mut visit: F) -> Result<u64, TrellisError>
    where
        F: FnMut(u64, &[u8]) -> Result<(), TrellisError>,
    {
        let mut last = after;
        for seq in self.list_seqs()?.into_iter().filter(|s| *s > after) {
            match fs::read(self.event_path(seq)) {
                Ok(bytes) if !bytes.is_empty() => visit(seq, &bytes)?,
                Ok(_) => tracing::warn!(seq, "skipping empty ledger entry"),
                Err(err) => tracing::warn!(seq, error = %err, "skipping unreadable ledger entry"),
            }
            last = seq;
        }
        Ok(last)
    }

    /// Sequence numbers missing below the tail. Empty for a healthy ledger.
    pub fn gaps(&self) -> Result<Vec<u64>, TrellisError> {
        let seqs = self.list_seqs()?;
        let mut gaps = Vec::new();
        let mut expected = 1u64;
        for seq in seqs {
            while expected < seq {
                gaps.push(expected);
                expected += 1;
            }
            expected = seq + 1;
        }
        Ok(gaps)
    }

    /// Raw bytes of one event, if present.
    pub fn read(&self, seq: u64) -> Result<Option<Vec<u8>>, TrellisError> {
        match fs::read(self.event_path(seq)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(TrellisError::IoError(err)),
        }
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE_NAME)
    }

    fn acquire_lock(&self) -> Result<LedgerLock, TrellisError> {
        let lock_path = self.lock_path();
        let mut attempt = 0u32;
        loop {
            match try_acquire_lock(&lock_path)? {
                Some(lock) => return Ok(lock),
                None => {
                    attempt += 1;
                    if self.break_stale_lock(&lock_path) {
                        continue;
                    }
                    if attempt >= self.config.lock_retries {
                        return Err(TrellisError::LockTimeout { attempts: attempt });
                    }
                    let delay = backoff_ms(&self.config, attempt);
                    tracing::trace!(attempt, delay_ms = delay, "ledger lock busy");
                    thread::sleep(Duration::from_millis(delay));
                }
            }
        }
    }

    fn break_stale_lock(&self, lock_path: &Path) -> bool {
        let Ok(meta) = fs::metadata(lock_path) else {
            return false;
        };
        let age = meta
            .modified()
            .ok()
            .and_then(|m| SystemTime::now().duration_since(m).ok())
            .unwrap_or_default();
        if age < Duration::from_secs(self.config.stale_lock_secs) {
            return false;
        }
        tracing::warn!(
            path = %lock_path.display(),
            age_secs = age.as_secs(),
            "breaking stale ledger lock"
        );
        fs::remove_file(lock_path).is_ok()
    }
}

fn try_acquire_lock(lock_path: &Path) -> Result<Option<LedgerLock>, TrellisError> {
    let mut file = match OpenOptions::new()
        .create_new(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(lock_path)
    {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(None),
        Err(err) => return Err(TrellisError::IoError(err)),
    };
    let token = Ulid::new().to_string();
    // The pid is for operators inspecting a stuck lock.
    let _ = writeln!(file, "token={}\npid={}", token, std::process::id());

    Ok(Some(LedgerLock {
        path: lock_path.to_path_buf(),
        token,
        _file: file,
    }))
}

fn backoff_ms(config: &LedgerConfig, attempt: u32) -> u64 {
    let exp = attempt.saturating_sub(1).min(16);
    let base = config
        .lock_backoff_ms
        .saturating_mul(1u64 << exp)
        .min(config.lock_backoff_max_ms);
    base + jitter_ms(config.lock_backoff_ms.max(2))
}

fn jitter_ms(max_exclusive: u64) -> u64 {
    if max_exclusive <= 1 {
        return 0;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    nanos % max_exclusive
}

struct LedgerLock {
    path: PathBuf,
    token: String,
    _file: File,
}

impl LedgerLock {
    /// False once the lock was broken as stale and taken by someone else.
    fn still_held(&self) -> bool {
        fs::read_to_string(&self.path)
            .map(|raw| {
                raw.lines()
                    .any(|l| l.strip_prefix("token=") == Some(self.token.as_str()))
            })
            .unwrap_or(false)
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        if self.still_held() {
            let _ = fs::remove_file(&self.path);
        } else {
            tracing::warn!(path = %self.path.display(), "ledger lock was taken over; leaving it");
        }
    }
}
