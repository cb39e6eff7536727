//! Projected proof state and the fold that builds it.
//!
//! `State::apply` is one step of the fold. It validates the event against the
//! state so far and fails on a missing target or an illegal transition; such
//! an event means the ledger was written around the facade. `State::derive`
//! recomputes the derived views (blocked workflow, taint) and runs once after
//! a batch of applies.

use crate::core::error::TrellisError;
use crate::proof::event::{Event, EventPayload};
use crate::proof::lease;
use crate::proof::node::{
    Amendment, Challenge, ChallengeStatus, Definition, EpistemicState, External, Lemma, Node,
    NodeId, NodeType, PendingDef, PendingDefStatus, WorkflowState,
};
use crate::proof::scope;
use crate::proof::taint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub conjecture: Option<String>,
    pub author: Option<String>,
    pub nodes: BTreeMap<NodeId, Node>,
    pub challenges: BTreeMap<String, Challenge>,
    pub definitions: BTreeMap<String, Definition>,
    pub pending_defs: BTreeMap<String, PendingDef>,
    pub lemmas: BTreeMap<String, Lemma>,
    pub externals: BTreeMap<String, External>,
    /// Seq of the last applied event; 0 before any.
    pub last_seq: u64,
    pub last_timestamp: Option<DateTime<Utc>>,
}

fn missing(what: &str, id: impl std::fmt::Display) -> TrellisError {
    TrellisError::NotFound(format!("{} {}", what, id))
}

fn epistemic_error(node: &Node, to: EpistemicState) -> TrellisError {
    TrellisError::IllegalTransition {
        node: node.id.to_string(),
        axis: "epistemic",
        from: node.epistemic_state.as_str().to_string(),
        to: to.as_str().to_string(),
    }
}

impl State {
    pub fn is_initialized(&self) -> bool {
        self.conjecture.is_some()
    }

    pub fn node(&self, id: &NodeId) -> Result<&Node, TrellisError> {
        self.nodes.get(id).ok_or_else(|| missing("node", id))
    }

    fn node_mut(&mut self, id: &NodeId) -> Result<&mut Node, TrellisError> {
        self.nodes.get_mut(id).ok_or_else(|| missing("node", id))
    }

    pub fn children(&self, id: &NodeId) -> impl Iterator<Item = &Node> {
        let depth = id.depth() + 1;
        self.nodes
            .range(id.clone()..)
            .take_while(move |(k, _)| id.is_ancestor_or_self_of(k))
            .filter(move |(k, _)| k.depth() == depth)
            .map(|(_, n)| n)
    }

    /// Index for the next child of `id`.
    pub fn next_child_index(&self, id: &NodeId) -> u32 {
        self.children(id)
            .map(|n| n.id.last_segment())
            .max()
            .map_or(1, |m| m + 1)
    }

    pub fn open_challenges_on(&self, id: &NodeId) -> Vec<&Challenge> {
        self.challenges
            .values()
            .filter(|c| &c.node_id == id && c.status == ChallengeStatus::Open)
            .collect()
    }

    /// One fold step.
    pub fn apply(&mut self, event: &Event) -> Result<(), TrellisError> {
        if event.seq <= self.last_seq {
            return Err(TrellisError::CorruptLedger {
                seq: event.seq,
                reason: format!("out of order after seq {}", self.last_seq),
            });
        }
        let ts = event.timestamp;

        match &event.payload {
            EventPayload::ProofInitialized {
                conjecture,
                author,
                content_hash,
            } => {
                if self.is_initialized() || !self.nodes.is_empty() {
                    return Err(TrellisError::IllegalTransition {
                        node: NodeId::root().to_string(),
                        axis: "proof",
                        from: "initialized".to_string(),
                        to: "initialized".to_string(),
                    });
                }
                let mut root = Node::root(conjecture.clone(), ts);
                root.content_hash = content_hash.clone();
                self.nodes.insert(root.id.clone(), root);
                self.conjecture = Some(conjecture.clone());
                self.author = Some(author.clone());
            }
            EventPayload::NodeCreated { node } => {
                if self.nodes.contains_key(&node.id) {
                    return Err(TrellisError::InvalidInput(format!(
                        "node {} already exists",
                        node.id
                    )));
                }
                let parent = node
                    .id
                    .parent()
                    .ok_or_else(|| TrellisError::InvalidInput("root is created by init".into()))?;
                if !self.nodes.contains_key(&parent) {
                    return Err(missing("parent", parent));
                }
                // Only earlier nodes may be depended on, which keeps the graph acyclic.
                for dep in node.dependencies.iter().chain(node.validation_deps.iter()) {
                    if !self.nodes.contains_key(dep) {
                        return Err(missing("dependency", dep));
                    }
                }
                if let Some(assume) = &node.discharges {
                    let target = self.node(assume)?;
                    if target.node_type != NodeType::LocalAssume
                        || !assume.is_ancestor_or_self_of(&parent)
                        || !scope::is_open(self, target)
                    {
                        return Err(TrellisError::InvalidInput(format!(
                            "node {} cannot discharge {}",
                            node.id, assume
                        )));
                    }
                }
                let mut fresh = node.clone();
                fresh.workflow_state = WorkflowState::Available;
                fresh.epistemic_state = EpistemicState::Pending;
                fresh.claimed_by = None;
                fresh.claimed_at = None;
                fresh.claim_ttl_ms = None;
                fresh.taint_source = false;
                fresh.amendments.clear();
                self.nodes.insert(fresh.id.clone(), fresh);
            }
            EventPayload::NodesClaimed {
                node_ids,
                owner,
                ttl_ms,
            } => {
                for id in node_ids {
                    let node = self.node(id)?;
                    lease::check_claimable(self, node, ts)
                        .map_err(|refusal| refusal.into_transition_error(id))?;
                }
                for id in node_ids {
                    let node = self.node_mut(id)?;
                    node.workflow_state = WorkflowState::Claimed;
                    node.claimed_by = Some(owner.clone());
                    node.claimed_at = Some(ts);
                    node.claim_ttl_ms = Some(*ttl_ms);
                }
            }
            EventPayload::ClaimExtended {
                node_id,
                owner,
                ttl_ms,
            } => {
                let node = self.node_mut(node_id)?;
                lease::require_owner(node, owner, ts)?;
                node.claimed_at = Some(ts);
                node.claim_ttl_ms = Some(*ttl_ms);
            }
            EventPayload::NodeReleased { node_id, owner } => {
                let node = self.node_mut(node_id)?;
                lease::check_release(node, owner)?;
                node.workflow_state = WorkflowState::Available;
                node.claimed_by = None;
                node.claimed_at = None;
                node.claim_ttl_ms = None;
            }
            EventPayload::NodeAccepted { node_id } => {
                self.transition_epistemic(node_id, EpistemicState::Validated)?;
            }
            EventPayload::NodeRefuted { node_id, .. } => {
                self.transition_epistemic(node_id, EpistemicState::Refuted)?;
            }
            EventPayload::NodeAdmitted { node_id } => {
                self.transition_epistemic(node_id, EpistemicState::Admitted)?;
                self.node_mut(node_id)?.taint_source = true;
            }
            EventPayload::NodeArchived { node_id } => {
                self.transition_epistemic(node_id, EpistemicState::Archived)?;
            }
            EventPayload::ChallengeRaised {
                challenge_id,
                node_id,
                target,
                reason,
            } => {
                self.node(node_id)?;
                if self.challenges.contains_key(challenge_id) {
                    return Err(TrellisError::InvalidInput(format!(
                        "challenge {} already exists",
                        challenge_id
                    )));
                }
                self.challenges.insert(
                    challenge_id.clone(),
                    Challenge {
                        id: challenge_id.clone(),
                        node_id: node_id.clone(),
                        target: *target,
                        reason: reason.clone(),
                        status: ChallengeStatus::Open,
                        raised: ts,
                        resolved: None,
                    },
                );
            }
            EventPayload::ChallengeResolved { challenge_id } => {
                let challenge = self
                    .challenges
                    .get_mut(challenge_id)
                    .ok_or_else(|| missing("challenge", challenge_id))?;
                if challenge.status != ChallengeStatus::Open {
                    return Err(TrellisError::IllegalTransition {
                        node: challenge.node_id.to_string(),
                        axis: "challenge",
                        from: "resolved".to_string(),
                        to: "resolved".to_string(),
                    });
                }
                challenge.status = ChallengeStatus::Resolved;
                challenge.resolved = Some(ts);
            }
            EventPayload::DefRequested {
                request_id,
                term,
                node_id,
                requested_by,
            } => {
                self.node(node_id)?;
                if self.pending_defs.contains_key(request_id) {
                    return Err(TrellisError::InvalidInput(format!(
                        "definition request {} already exists",
                        request_id
                    )));
                }
                self.pending_defs.insert(
                    request_id.clone(),
                    PendingDef {
                        id: request_id.clone(),
                        term: term.clone(),
                        node_id: node_id.clone(),
                        requested_by: requested_by.clone(),
                        status: PendingDefStatus::Pending,
                        created: ts,
                        fulfilled_by: None,
                    },
                );
            }
            EventPayload::DefAdded { definition } => {
                if self.definitions.contains_key(&definition.id) {
                    return Err(TrellisError::InvalidInput(format!(
                        "definition {} already exists",
                        definition.id
                    )));
                }
                for request in self.pending_defs.values_mut() {
                    if request.term == definition.term
                        && request.status == PendingDefStatus::Pending
                    {
                        request.status = PendingDefStatus::Fulfilled;
                        request.fulfilled_by = Some(definition.id.clone());
                    }
                }
                self.definitions
                    .insert(definition.id.clone(), definition.clone());
            }
            EventPayload::LemmaExtracted { lemma } => {
                self.node(&lemma.source_node_id)?;
                if self.lemmas.contains_key(&lemma.id) {
                    return Err(TrellisError::InvalidInput(format!(
                        "lemma {} already exists",
                        lemma.id
                    )));
                }
                self.lemmas.insert(lemma.id.clone(), lemma.clone());
            }
            EventPayload::ExternalAdded { external } => {
                if self.externals.contains_key(&external.id) {
                    return Err(TrellisError::InvalidInput(format!(
                        "external {} already exists",
                        external.id
                    )));
                }
                self.externals.insert(external.id.clone(), external.clone());
            }
            EventPayload::StatementAmended {
                node_id,
                owner,
                new_statement,
                content_hash,
            } => {
                let node = self.node_mut(node_id)?;
                if node.epistemic_state != EpistemicState::Pending {
                    return Err(TrellisError::IllegalTransition {
                        node: node_id.to_string(),
                        axis: "statement",
                        from: node.epistemic_state.as_str().to_string(),
                        to: "amended".to_string(),
                    });
                }
                let previous = std::mem::replace(&mut node.statement, new_statement.clone());
                node.amendments.push(Amendment {
                    timestamp: ts,
                    previous_statement: previous,
                    new_statement: new_statement.clone(),
                    owner: owner.clone(),
                });
                node.content_hash = content_hash.clone();
            }
        }

        self.last_seq = event.seq;
        self.last_timestamp = Some(ts);
        Ok(())
    }

    fn transition_epistemic(
        &mut self,
        id: &NodeId,
        to: EpistemicState,
    ) -> Result<(), TrellisError> {
        let node = self.node_mut(id)?;
        if !node.epistemic_state.can_transition_to(to) {
            return Err(epistemic_error(node, to));
        }
        node.epistemic_state = to;
        Ok(())
    }

    /// Recompute derived views: blocked workflow and taint.
    pub fn derive(&mut self) -> Result<(), TrellisError> {
        let blocked = scope::blocked_nodes(self);
        for (id, node) in self.nodes.iter_mut() {
            if node.workflow_state == WorkflowState::Claimed {
                continue;
            }
            node.workflow_state = if blocked.contains(id) {
                WorkflowState::Blocked
            } else {
                WorkflowState::Available
            };
        }
        taint::apply_taint(self)
    }

    /// Fold `events` into a copy of this state and derive.
    pub fn fold<'a>(
        mut self,
        events: impl IntoIterator<Item = &'a Event>,
    ) -> Result<State, TrellisError> {
        for event in events {
            self.apply(event)?;
        }
        self.derive()?;
        Ok(self)
    }
}
