//! Timestamp source and id helpers.
//!
//! Timestamps are taken once, when an event is appended, and travel inside
//! the event. Replay never reads a clock, so any process folding the same
//! ledger prefix sees the same times.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;
use ulid::Ulid;

/// Source of "now" for appends and lazy lease checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for deterministic lease tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        let mut guard = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *guard = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Prefixed, sortable identifier (`LEM-01J...`, `CH-01J...`).
pub fn prefixed_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Ulid::new())
}
