//! Ledger events for the proof domain.
//!
//! On disk an event is one JSON object: the envelope fields `seq` and
//! `timestamp` next to the payload's `type` tag and its fields, e.g.
//!
//! ```json
//! {"seq":3,"timestamp":"2026-01-01T00:00:00Z","type":"NodeReleased","node_id":"1","owner":"prover"}
//! ```
//!
//! The payload is a closed enum; [`crate::proof::state::State::apply`]
//! matches it exhaustively.

use crate::core::error::TrellisError;
use crate::core::ledger::Ledger;
use crate::proof::node::{ChallengeTarget, Definition, External, Lemma, Node, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventPayload {
    ProofInitialized {
        conjecture: String,
        author: String,
        /// Content hash of the root node built from `conjecture`.
        content_hash: String,
    },
    NodeCreated {
        node: Node,
    },
    NodesClaimed {
        node_ids: Vec<NodeId>,
        owner: String,
        ttl_ms: u64,
    },
    ClaimExtended {
        node_id: NodeId,
        owner: String,
        ttl_ms: u64,
    },
    NodeReleased {
        node_id: NodeId,
        owner: String,
    },
    NodeAccepted {
        node_id: NodeId,
    },
    NodeRefuted {
        node_id: NodeId,
        #[serde(default)]
        reason: Option<String>,
    },
    NodeAdmitted {
        node_id: NodeId,
    },
    NodeArchived {
        node_id: NodeId,
    },
    ChallengeRaised {
        challenge_id: String,
        node_id: NodeId,
        target: ChallengeTarget,
        reason: String,
    },
    ChallengeResolved {
        challenge_id: String,
    },
    DefRequested {
        request_id: String,
        term: String,
        node_id: NodeId,
        requested_by: String,
    },
    DefAdded {
        definition: Definition,
    },
    LemmaExtracted {
        lemma: Lemma,
    },
    ExternalAdded {
        external: External,
    },
    StatementAmended {
        node_id: NodeId,
        owner: String,
        new_statement: String,
        /// Content hash of the node after the amendment.
        content_hash: String,
    },
}

impl EventPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::ProofInitialized { .. } => "ProofInitialized",
            EventPayload::NodeCreated { .. } => "NodeCreated",
            EventPayload::NodesClaimed { .. } => "NodesClaimed",
            EventPayload::ClaimExtended { .. } => "ClaimExtended",
            EventPayload::NodeReleased { .. } => "NodeReleased",
            EventPayload::NodeAccepted { .. } => "NodeAccepted",
            EventPayload::NodeRefuted { .. } => "NodeRefuted",
            EventPayload::NodeAdmitted { .. } => "NodeAdmitted",
            EventPayload::NodeArchived { .. } => "NodeArchived",
            EventPayload::ChallengeRaised { .. } => "ChallengeRaised",
            EventPayload::ChallengeResolved { .. } => "ChallengeResolved",
            EventPayload::DefRequested { .. } => "DefRequested",
            EventPayload::DefAdded { .. } => "DefAdded",
            EventPayload::LemmaExtracted { .. } => "LemmaExtracted",
            EventPayload::ExternalAdded { .. } => "ExternalAdded",
            EventPayload::StatementAmended { .. } => "StatementAmended",
        }
    }
}

impl Event {
    pub fn encode(&self) -> Result<Vec<u8>, TrellisError> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Decode the file stored at `seq`. The embedded seq must agree with it.
    pub fn decode(seq: u64, raw: &[u8]) -> Result<Event, TrellisError> {
        let event: Event =
            serde_json::from_slice(raw).map_err(|e| TrellisError::CorruptLedger {
                seq,
                reason: format!("undecodable event: {}", e),
            })?;
        if event.seq != seq {
            return Err(TrellisError::CorruptLedger {
                seq,
                reason: format!("event records seq {}", event.seq),
            });
        }
        Ok(event)
    }
}

/// Append `payload` as the next event, whatever the tail is.
pub fn append_event(
    ledger: &Ledger,
    timestamp: DateTime<Utc>,
    payload: &EventPayload,
) -> Result<u64, TrellisError> {
    let seq = ledger.append(|seq| encode_at(seq, timestamp, payload))?;
    tracing::debug!(seq, kind = payload.kind(), "event appended");
    Ok(seq)
}

/// Append `payload` only if the ledger tail is still `expected_last`.
pub fn append_event_if(
    ledger: &Ledger,
    expected_last: u64,
    timestamp: DateTime<Utc>,
    payload: &EventPayload,
) -> Result<u64, TrellisError> {
    let seq = ledger.append_if_sequence(expected_last, |seq| {
        encode_at(seq, timestamp, payload)
    })?;
    tracing::debug!(seq, kind = payload.kind(), "event appended");
    Ok(seq)
}

fn encode_at(
    seq: u64,
    timestamp: DateTime<Utc>,
    payload: &EventPayload,
) -> Result<Vec<u8>, TrellisError> {
    Event {
        seq,
        timestamp,
        payload: payload.clone(),
    }
    .encode()
}

/// Every decodable event in order. Undecodable entries are skipped with a
/// warning.
pub fn read_events(ledger: &Ledger) -> Result<Vec<Event>, TrellisError> {
    read_events_after(ledger, 0)
}

pub fn read_events_after(ledger: &Ledger, after: u64) -> Result<Vec<Event>, TrellisError> {
    Ok(read_events_tail(ledger, after)?.0)
}

/// Decodable events after `after`, plus the highest seq scanned. A skipped
/// entry still advances that seq, so it is the tail to append behind.
pub fn read_events_tail(ledger: &Ledger, after: u64) -> Result<(Vec<Event>, u64), TrellisError> {
    let mut events = Vec::new();
    let scanned = ledger.scan_after(after, |seq, raw| {
        match Event::decode(seq, raw) {
            Ok(event) => events.push(event),
            Err(err) => tracing::warn!(seq, error = %err, "skipping malformed event"),
        }
        Ok(())
    })?;
    Ok((events, scanned))
}

/// Every event in order, failing on the first malformed entry or gap.
pub fn read_events_strict(ledger: &Ledger) -> Result<Vec<Event>, TrellisError> {
    if let Some(missing) = ledger.gaps()?.first() {
        return Err(TrellisError::CorruptLedger {
            seq: *missing,
            reason: "missing event".to_string(),
        });
    }
    let mut events: Vec<Event> = Vec::new();
    let last = ledger.scan(|seq, raw| {
        let expected = events.last().map_or(1, |e| e.seq + 1);
        if seq != expected {
            return Err(TrellisError::CorruptLedger {
                seq: expected,
                reason: "unreadable event".to_string(),
            });
        }
        events.push(Event::decode(seq, raw)?);
        Ok(())
    })?;
    let applied = events.last().map_or(0, |e| e.seq);
    if last != applied {
        return Err(TrellisError::CorruptLedger {
            seq: applied + 1,
            reason: "unreadable event".to_string(),
        });
    }
    Ok(events)
}
