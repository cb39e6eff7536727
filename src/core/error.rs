use std::io;
use thiserror::Error;

/// Coarse failure classes. Callers use these to decide between reporting,
/// reloading and retrying, or escalating to an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rejected before anything was appended; no state changed.
    Precondition,
    /// Another process won the race; reload state and retry.
    Conflict,
    /// The ledger or a derived invariant is damaged; operator action needed.
    Integrity,
    /// I/O, lock contention, storage or configuration trouble.
    Resource,
}

#[derive(Error, Debug)]
pub enum TrellisError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Node {node} is owned by '{owner}', not '{caller}'")]
    NotOwner {
        node: String,
        owner: String,
        caller: String,
    },
    #[error("Node {node} is already claimed by '{owner}'")]
    AlreadyClaimed { node: String, owner: String },
    #[error("Node {node} is blocked by open local assumption {scope}")]
    Blocked { node: String, scope: String },
    #[error("Illegal {axis} transition for node {node}: {from} -> {to}")]
    IllegalTransition {
        node: String,
        axis: &'static str,
        from: String,
        to: String,
    },
    #[error("Node {node} is not independent: depends on open local assumption(s) {scopes:?}")]
    NotIndependent { node: String, scopes: Vec<String> },
    #[error("Node {node} has {count} open challenge(s)")]
    OpenChallenges { node: String, count: usize },
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Concurrent modification: expected ledger at seq {expected}, found {actual}")]
    ConcurrencyConflict { expected: u64, actual: u64 },
    #[error("Content hash mismatch for node {node}: recorded {recorded}, computed {computed}")]
    HashMismatch {
        node: String,
        recorded: String,
        computed: String,
    },
    #[error("Corrupt ledger at seq {seq}: {reason}")]
    CorruptLedger { seq: u64, reason: String },
    #[error("Event at seq {seq} cannot be applied: {source}")]
    InvalidEvent {
        seq: u64,
        #[source]
        source: Box<TrellisError>,
    },
    #[error("Dependency cycle through node {0}")]
    TaintCycle(String),
    #[error("Timed out acquiring ledger lock after {attempts} attempts")]
    LockTimeout { attempts: u32 },
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("Config error: {0}")]
    ConfigError(String),
}

impl From<toml::de::Error> for TrellisError {
    fn from(err: toml::de::Error) -> Self {
        TrellisError::ConfigError(err.to_string())
    }
}

impl TrellisError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            TrellisError::NotFound(_)
            | TrellisError::NotOwner { .. }
            | TrellisError::AlreadyClaimed { .. }
            | TrellisError::Blocked { .. }
            | TrellisError::IllegalTransition { .. }
            | TrellisError::NotIndependent { .. }
            | TrellisError::OpenChallenges { .. }
            | TrellisError::InvalidInput(_) => ErrorCategory::Precondition,
            TrellisError::ConcurrencyConflict { .. } => ErrorCategory::Conflict,
            TrellisError::HashMismatch { .. }
            | TrellisError::CorruptLedger { .. }
            | TrellisError::InvalidEvent { .. }
            | TrellisError::TaintCycle(_) => ErrorCategory::Integrity,
            TrellisError::LockTimeout { .. }
            | TrellisError::IoError(_)
            | TrellisError::JsonError(_)
            | TrellisError::RusqliteError(_)
            | TrellisError::ConfigError(_) => ErrorCategory::Resource,
        }
    }

    /// True when the same call may succeed after reloading state.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TrellisError::ConcurrencyConflict { .. } | TrellisError::LockTimeout { .. }
        )
    }
}
