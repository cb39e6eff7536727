//! Replay and incremental projection.
//!
//! `replay` folds the whole ledger from an empty state. `Projection` keeps a
//! folded state around and only folds what was appended since, optionally
//! starting from a SQLite snapshot. Both paths end in the same `State` for the
//! same ledger prefix.

use crate::core::error::{ErrorCategory, TrellisError};
use crate::core::hash::sha256_hex;
use crate::core::ledger::Ledger;
use crate::core::snapshot::{Snapshot, SnapshotStore};
use crate::proof::event::{self, Event, EventPayload};
use crate::proof::node::NodeId;
use crate::proof::state::State;
use rayon::prelude::*;

/// Apply an event read back from the ledger. Appends are validated first, so
/// an event that does not apply means the ledger itself is damaged.
fn apply_recorded(state: &mut State, event: &Event) -> Result<(), TrellisError> {
    state.apply(event).map_err(|err| match err.category() {
        ErrorCategory::Integrity => err,
        _ => TrellisError::InvalidEvent {
            seq: event.seq,
            source: Box::new(err),
        },
    })
}

fn fold_recorded(mut state: State, events: &[Event]) -> Result<State, TrellisError> {
    for event in events {
        apply_recorded(&mut state, event)?;
    }
    state.derive()?;
    Ok(state)
}

/// `Replay(ledger)`: fold every readable event from the start.
pub fn replay(ledger: &Ledger) -> Result<State, TrellisError> {
    let events = event::read_events(ledger)?;
    fold_recorded(State::default(), &events)
}

/// `ReplayWithVerify(ledger)`: strict read, and every node's content hash is
/// recomputed and compared against the hash its event recorded, both as
/// written and in the final state.
pub fn replay_with_verify(ledger: &Ledger) -> Result<State, TrellisError> {
    let events = event::read_events_strict(ledger)?;
    let mut state = State::default();
    for event in &events {
        if let EventPayload::NodeCreated { node } = &event.payload {
            node.verify_content_hash()?;
        }
        apply_recorded(&mut state, event)?;
        match &event.payload {
            EventPayload::ProofInitialized { .. } => {
                state.node(&NodeId::root())?.verify_content_hash()?;
            }
            EventPayload::StatementAmended { node_id, .. } => {
                state.node(node_id)?.verify_content_hash()?;
            }
            _ => {}
        }
    }
    state.derive()?;

    state
        .nodes
        .par_iter()
        .try_for_each(|(_, node)| node.verify_content_hash())?;
    Ok(state)
}

/// A folded state plus the position it was folded to.
#[derive(Debug, Clone, Default)]
pub struct Projection {
    state: State,
    /// Highest seq scanned, including entries skipped as malformed.
    scanned_seq: u64,
}

impl Projection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: State) -> Self {
        let scanned_seq = state.last_seq;
        Self { state, scanned_seq }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Seq of the last event folded into the state.
    pub fn last_seq(&self) -> u64 {
        self.state.last_seq
    }

    /// Ledger tail this projection has seen. Past `last_seq` when trailing
    /// entries were skipped; this is what the next append must follow.
    pub fn tail_seq(&self) -> u64 {
        self.scanned_seq.max(self.state.last_seq)
    }

    /// Fold events appended since the last scan. Returns how many were
    /// applied.
    ///
    /// On failure the projection is left untouched.
    pub fn catch_up(&mut self, ledger: &Ledger) -> Result<usize, TrellisError> {
        let (events, scanned) = event::read_events_tail(ledger, self.tail_seq())?;
        if !events.is_empty() {
            self.state = fold_recorded(self.state.clone(), &events)?;
        }
        self.scanned_seq = scanned;
        Ok(events.len())
    }

    /// Start from the newest snapshot whose digest still matches the ledger,
    /// then catch up. Falls back to a full fold if no snapshot is usable.
    pub fn load(ledger: &Ledger, snapshots: Option<&SnapshotStore>) -> Result<Self, TrellisError> {
        let mut projection = match snapshots {
            Some(store) => Self::from_snapshot(ledger, store).unwrap_or_else(|err| {
                tracing::warn!(error = %err, "ignoring unusable projection snapshot");
                None
            }),
            None => None,
        }
        .unwrap_or_default();
        projection.catch_up(ledger)?;
        Ok(projection)
    }

    fn from_snapshot(ledger: &Ledger, store: &SnapshotStore) -> Result<Option<Self>, TrellisError> {
        let tail = ledger.count()?;
        let Some(snapshot) = store.load_latest(tail)? else {
            return Ok(None);
        };
        let Some(raw) = ledger.read(snapshot.seq)? else {
            return Ok(None);
        };
        if sha256_hex(&raw) != snapshot.event_digest {
            tracing::warn!(seq = snapshot.seq, "snapshot digest does not match ledger");
            return Ok(None);
        }
        let state: State = serde_json::from_str(&snapshot.state_json)?;
        if state.last_seq != snapshot.seq {
            return Ok(None);
        }
        tracing::debug!(seq = snapshot.seq, "projection seeded from snapshot");
        Ok(Some(Self::from_state(state)))
    }

    /// Persist the current state, tagged with the digest of its last event.
    pub fn save_snapshot(
        &self,
        ledger: &Ledger,
        store: &SnapshotStore,
    ) -> Result<bool, TrellisError> {
        let seq = self.state.last_seq;
        let Some(raw) = ledger.read(seq)? else {
            return Ok(false);
        };
        store.save(&Snapshot {
            seq,
            event_digest: sha256_hex(&raw),
            state_json: serde_json::to_string(&self.state)?,
        })?;
        Ok(true)
    }
}
