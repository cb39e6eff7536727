//! Claim leases.
//!
//! A lease is nothing more than the most recent unexpired claim recorded on a
//! node. Expiry is evaluated lazily against whatever "now" the caller passes:
//! the facade passes the clock, replay passes the event's own timestamp.

use crate::core::error::TrellisError;
use crate::proof::node::{Node, NodeId, WorkflowState};
use crate::proof::scope;
use crate::proof::state::State;
use chrono::{DateTime, Duration, Utc};

/// The claim currently recorded on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease<'a> {
    pub owner: &'a str,
    pub claimed_at: DateTime<Utc>,
    pub ttl_ms: u64,
}

impl Lease<'_> {
    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = i64::try_from(self.ttl_ms).unwrap_or(i64::MAX);
        self.claimed_at
            .checked_add_signed(Duration::milliseconds(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Expired once `now > claimed_at + ttl`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }
}

pub fn lease_of(node: &Node) -> Option<Lease<'_>> {
    if node.workflow_state != WorkflowState::Claimed {
        return None;
    }
    match (&node.claimed_by, node.claimed_at, node.claim_ttl_ms) {
        (Some(owner), Some(claimed_at), Some(ttl_ms)) => Some(Lease {
            owner,
            claimed_at,
            ttl_ms,
        }),
        _ => None,
    }
}

/// The owner of an unexpired claim, if any.
pub fn active_owner(node: &Node, now: DateTime<Utc>) -> Option<&str> {
    lease_of(node)
        .filter(|lease| !lease.is_expired(now))
        .map(|lease| lease.owner)
}

/// Workflow state as a reader at `now` should see it.
pub fn effective_workflow(state: &State, node: &Node, now: DateTime<Utc>) -> WorkflowState {
    if active_owner(node, now).is_some() {
        return WorkflowState::Claimed;
    }
    if scope::blocking_scope(state, &node.id).is_some() {
        WorkflowState::Blocked
    } else {
        WorkflowState::Available
    }
}

/// Why a node cannot be claimed right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimRefusal {
    Held { owner: String },
    Blocked { scope: NodeId },
}

/// Whether `node` may be claimed at `at`, with expired leases treated as
/// released.
pub fn check_claimable(state: &State, node: &Node, at: DateTime<Utc>) -> Result<(), ClaimRefusal> {
    if let Some(owner) = active_owner(node, at) {
        return Err(ClaimRefusal::Held {
            owner: owner.to_string(),
        });
    }
    if let Some(scope) = scope::blocking_scope(state, &node.id) {
        return Err(ClaimRefusal::Blocked { scope });
    }
    Ok(())
}

impl ClaimRefusal {
    /// Facade-facing error.
    pub fn into_error(self, node: &NodeId) -> TrellisError {
        match self {
            ClaimRefusal::Held { owner } => TrellisError::AlreadyClaimed {
                node: node.to_string(),
                owner,
            },
            ClaimRefusal::Blocked { scope } => TrellisError::Blocked {
                node: node.to_string(),
                scope: scope.to_string(),
            },
        }
    }

    /// Replay-facing error: the ledger recorded a claim that was not legal.
    pub fn into_transition_error(self, node: &NodeId) -> TrellisError {
        let from = match self {
            ClaimRefusal::Held { .. } => WorkflowState::Claimed,
            ClaimRefusal::Blocked { .. } => WorkflowState::Blocked,
        };
        TrellisError::IllegalTransition {
            node: node.to_string(),
            axis: "workflow",
            from: from.as_str().to_string(),
            to: WorkflowState::Claimed.as_str().to_string(),
        }
    }
}

/// Require an unexpired claim on `node` held by `owner`.
pub fn require_owner(node: &Node, owner: &str, now: DateTime<Utc>) -> Result<(), TrellisError> {
    match active_owner(node, now) {
        Some(holder) if holder == owner => Ok(()),
        Some(holder) => Err(TrellisError::NotOwner {
            node: node.id.to_string(),
            owner: holder.to_string(),
            caller: owner.to_string(),
        }),
        None => Err(TrellisError::IllegalTransition {
            node: node.id.to_string(),
            axis: "workflow",
            from: WorkflowState::Available.as_str().to_string(),
            to: "owned".to_string(),
        }),
    }
}

/// Release needs the recorded owner, expired or not.
pub fn check_release(node: &Node, owner: &str) -> Result<(), TrellisError> {
    match lease_of(node) {
        Some(lease) if lease.owner == owner => Ok(()),
        Some(lease) => Err(TrellisError::NotOwner {
            node: node.id.to_string(),
            owner: lease.owner.to_string(),
            caller: owner.to_string(),
        }),
        None => Err(TrellisError::IllegalTransition {
            node: node.id.to_string(),
            axis: "workflow",
            from: node.workflow_state.as_str().to_string(),
            to: WorkflowState::Available.as_str().to_string(),
        }),
    }
}

/// Validate a requested TTL against the configured ceiling.
pub fn ttl_millis(ttl: std::time::Duration, max: std::time::Duration) -> Result<u64, TrellisError> {
    if ttl.is_zero() {
        return Err(TrellisError::InvalidInput(
            "claim ttl must be positive".to_string(),
        ));
    }
    if ttl > max {
        return Err(TrellisError::InvalidInput(format!(
            "claim ttl {:?} exceeds maximum {:?}",
            ttl, max
        )));
    }
    Ok(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1))
}

pub fn validate_owner(owner: &str) -> Result<(), TrellisError> {
    if owner.trim().is_empty() {
        return Err(TrellisError::InvalidInput(
            "owner must not be empty".to_string(),
        ));
    }
    Ok(())
}
