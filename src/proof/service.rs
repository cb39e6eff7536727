//! Service facade: the only write path callers use.
//!
//! Every mutating operation follows the same shape:
//!
//! 1. catch the projection up with the ledger,
//! 2. check preconditions against that state at the event's timestamp,
//! 3. append exactly one event, conditional on the ledger tail not having
//!    moved (`ConcurrencyConflict` otherwise),
//! 4. fold the new event in.
//!
//! A failed precondition appends nothing. A conflict is returned to the
//! caller, who reloads and decides whether to retry.

use crate::core::blobs::BlobStore;
use crate::core::config::Config;
use crate::core::error::TrellisError;
use crate::core::hash::sha256_hex;
use crate::core::ledger::Ledger;
use crate::core::snapshot::SnapshotStore;
use crate::core::store::Store;
use crate::core::time::{Clock, SystemClock, prefixed_id};
use crate::proof::event::{self, Event, EventPayload};
use crate::proof::lease;
use crate::proof::node::{
    Amendment, Challenge, ChallengeStatus, ChallengeTarget, Definition, EpistemicState, External,
    InferenceType, Lemma, Node, NodeId, NodeType, PendingDef, PendingDefStatus, TaintState,
    WorkflowState,
};
use crate::proof::replay::{self, Projection};
use crate::proof::scope::{self, ScopeInfo};
use crate::proof::state::State;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const NODE_BLOB_KIND: &str = "nodes";
const DEFINITION_BLOB_KIND: &str = "definitions";
const EXTERNAL_BLOB_KIND: &str = "externals";
const LEMMA_BLOB_KIND: &str = "lemmas";

/// What a prover supplies to refine a node with one new child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildSpec {
    pub node_type: NodeType,
    pub statement: String,
    pub inference: InferenceType,
    #[serde(default)]
    pub dependencies: Vec<NodeId>,
    #[serde(default)]
    pub validation_deps: Vec<NodeId>,
}

impl ChildSpec {
    pub fn claim(statement: impl Into<String>, inference: InferenceType) -> Self {
        Self {
            node_type: NodeType::Claim,
            statement: statement.into(),
            inference,
            dependencies: Vec::new(),
            validation_deps: Vec::new(),
        }
    }

    pub fn local_assume(statement: impl Into<String>) -> Self {
        Self {
            node_type: NodeType::LocalAssume,
            statement: statement.into(),
            inference: InferenceType::LocalAssume,
            dependencies: Vec::new(),
            validation_deps: Vec::new(),
        }
    }

    pub fn local_discharge(statement: impl Into<String>) -> Self {
        Self {
            node_type: NodeType::LocalDischarge,
            statement: statement.into(),
            inference: InferenceType::LocalDischarge,
            dependencies: Vec::new(),
            validation_deps: Vec::new(),
        }
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = NodeId>) -> Self {
        self.dependencies.extend(deps);
        self
    }

    pub fn with_validation_deps(mut self, deps: impl IntoIterator<Item = NodeId>) -> Self {
        self.validation_deps.extend(deps);
        self
    }
}

/// Counts for a quick overview of a proof.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStatus {
    pub initialized: bool,
    pub conjecture: Option<String>,
    pub last_seq: u64,
    pub nodes: usize,
    pub workflow: BTreeMap<String, usize>,
    pub epistemic: BTreeMap<String, usize>,
    pub taint: BTreeMap<String, usize>,
    pub open_challenges: usize,
    pub pending_definitions: usize,
    pub definitions: usize,
    pub lemmas: usize,
    pub externals: usize,
}

pub struct ProofService {
    store: Store,
    config: Config,
    ledger: Ledger,
    blobs: BlobStore,
    snapshots: Option<SnapshotStore>,
    clock: Arc<dyn Clock>,
    projection: Mutex<Projection>,
}

fn require_text(field: &str, value: &str) -> Result<(), TrellisError> {
    if value.trim().is_empty() {
        return Err(TrellisError::InvalidInput(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(())
}

fn require_pending(node: &Node, to: &str) -> Result<(), TrellisError> {
    if node.epistemic_state != EpistemicState::Pending {
        return Err(TrellisError::IllegalTransition {
            node: node.id.to_string(),
            axis: "epistemic",
            from: node.epistemic_state.as_str().to_string(),
            to: to.to_string(),
        });
    }
    Ok(())
}

fn check_coupling(spec: &ChildSpec) -> Result<(), TrellisError> {
    let pairs = [
        (NodeType::LocalAssume, InferenceType::LocalAssume),
        (NodeType::LocalDischarge, InferenceType::LocalDischarge),
    ];
    for (node_type, inference) in pairs {
        if (spec.node_type == node_type) != (spec.inference == inference) {
            return Err(TrellisError::InvalidInput(format!(
                "node type {} requires inference {} and vice versa",
                node_type.as_str(),
                inference.as_str()
            )));
        }
    }
    Ok(())
}

impl ProofService {
    /// Open the proof directory at `root`, creating its layout if missing.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, TrellisError> {
        Self::open_with_clock(root, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        root: impl AsRef<Path>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TrellisError> {
        let store = Store::new(root.as_ref());
        store.ensure_layout()?;
        let config = Config::load(store.root())?;
        let ledger = Ledger::open(&store.ledger_dir(), config.ledger.clone())?;
        let blobs = BlobStore::new(&store.blobs_dir());

        let snapshots = if config.snapshot.enabled {
            match SnapshotStore::open(&store.snapshot_db_path()) {
                Ok(snapshots) => Some(snapshots),
                Err(err) => {
                    tracing::warn!(error = %err, "projection snapshots unavailable");
                    None
                }
            }
        } else {
            None
        };

        let projection = Projection::load(&ledger, snapshots.as_ref())?;
        tracing::debug!(
            root = %store.root().display(),
            seq = projection.last_seq(),
            "proof service opened"
        );

        Ok(Self {
            store,
            config,
            ledger,
            blobs,
            snapshots,
            clock,
            projection: Mutex::new(projection),
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    fn lock_projection(&self) -> MutexGuard<'_, Projection> {
        self.projection.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Timestamp for the next event: the clock, but never earlier than the
    /// last recorded event.
    fn event_time(&self, state: &State) -> DateTime<Utc> {
        let now = self.clock.now();
        match state.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        }
    }

    /// Validate against fresh state and append one event.
    ///
    /// With `ledger.commit_retries` set, a lost tail is caught up and `build`
    /// runs again against the newer state, so its preconditions are
    /// re-checked before every attempt.
    fn commit<T, F>(&self, mut build: F) -> Result<T, TrellisError>
    where
        F: FnMut(&State, DateTime<Utc>) -> Result<(EventPayload, T), TrellisError>,
    {
        let mut projection = self.lock_projection();
        let mut attempt = 0u32;
        loop {
            projection.catch_up(&self.ledger)?;

            let at = self.event_time(projection.state());
            let (payload, out) = build(projection.state(), at)?;
            match event::append_event_if(&self.ledger, projection.tail_seq(), at, &payload) {
                Ok(seq) => {
                    projection.catch_up(&self.ledger)?;
                    self.maybe_snapshot(&projection, seq);
                    return Ok(out);
                }
                Err(TrellisError::ConcurrencyConflict { expected, actual })
                    if attempt < self.config.ledger.commit_retries =>
                {
                    attempt += 1;
                    tracing::debug!(
                        attempt,
                        expected,
                        actual,
                        kind = payload.kind(),
                        "ledger tail moved; re-validating"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn maybe_snapshot(&self, projection: &Projection, seq: u64) {
        let Some(snapshots) = &self.snapshots else {
            return;
        };
        let every = self.config.snapshot.every_events.max(1);
        if seq % every != 0 {
            return;
        }
        match projection.save_snapshot(&self.ledger, snapshots) {
            Ok(_) => tracing::info!(seq, "projection snapshot written"),
            Err(err) => tracing::warn!(seq, error = %err, "projection snapshot failed"),
        }
    }

    /// Blobs mirror committed records; the ledger stays authoritative.
    fn mirror_blob<T: Serialize>(&self, kind: &str, value: &T) {
        if let Err(err) = self.blobs.put(kind, value) {
            tracing::warn!(kind, error = %err, "blob write failed");
        }
    }

    fn require_initialized(state: &State) -> Result<(), TrellisError> {
        if !state.is_initialized() {
            return Err(TrellisError::NotFound("proof not initialized".to_string()));
        }
        Ok(())
    }

    /// Create the proof with root node `1` holding the conjecture.
    pub fn init(&self, conjecture: &str, author: &str) -> Result<(), TrellisError> {
        require_text("conjecture", conjecture)?;
        require_text("author", author)?;
        self.commit(|state, at| {
            if state.is_initialized() {
                return Err(TrellisError::IllegalTransition {
                    node: NodeId::root().to_string(),
                    axis: "proof",
                    from: "initialized".to_string(),
                    to: "initialized".to_string(),
                });
            }
            Ok((
                EventPayload::ProofInitialized {
                    conjecture: conjecture.to_string(),
                    author: author.to_string(),
                    content_hash: Node::root(conjecture, at).content_hash,
                },
                (),
            ))
        })?;
        tracing::info!(author, "proof initialized");
        if let Ok(root) = self.get_node(&NodeId::root()) {
            self.mirror_blob(NODE_BLOB_KIND, &root);
        }
        Ok(())
    }

    pub fn claim(
        &self,
        id: &NodeId,
        owner: &str,
        ttl: Option<Duration>,
    ) -> Result<(), TrellisError> {
        self.claim_many(std::slice::from_ref(id), owner, ttl)
    }

    /// Claim every node in `ids` for `owner`, or none of them.
    pub fn claim_many(
        &self,
        ids: &[NodeId],
        owner: &str,
        ttl: Option<Duration>,
    ) -> Result<(), TrellisError> {
        lease::validate_owner(owner)?;
        if ids.is_empty() {
            return Err(TrellisError::InvalidInput(
                "at least one node id is required".to_string(),
            ));
        }
        let unique: BTreeSet<&NodeId> = ids.iter().collect();
        if unique.len() != ids.len() {
            return Err(TrellisError::InvalidInput(
                "duplicate node id in claim".to_string(),
            ));
        }
        let ttl_ms = lease::ttl_millis(
            ttl.unwrap_or_else(|| self.config.lease.default_ttl()),
            self.config.lease.max_ttl(),
        )?;

        self.commit(|state, at| {
            Self::require_initialized(state)?;
            for id in ids {
                let node = state.node(id)?;
                require_pending(node, WorkflowState::Claimed.as_str())?;
                lease::check_claimable(state, node, at).map_err(|r| r.into_error(id))?;
            }
            Ok((
                EventPayload::NodesClaimed {
                    node_ids: ids.to_vec(),
                    owner: owner.to_string(),
                    ttl_ms,
                },
                (),
            ))
        })
    }

    /// Restart `owner`'s unexpired lease on `id` from now with a new TTL.
    pub fn extend_claim(
        &self,
        id: &NodeId,
        owner: &str,
        ttl: Option<Duration>,
    ) -> Result<(), TrellisError> {
        lease::validate_owner(owner)?;
        let ttl_ms = lease::ttl_millis(
            ttl.unwrap_or_else(|| self.config.lease.default_ttl()),
            self.config.lease.max_ttl(),
        )?;
        self.commit(|state, at| {
            lease::require_owner(state.node(id)?, owner, at)?;
            Ok((
                EventPayload::ClaimExtended {
                    node_id: id.clone(),
                    owner: owner.to_string(),
                    ttl_ms,
                },
                (),
            ))
        })
    }

    pub fn release(&self, id: &NodeId, owner: &str) -> Result<(), TrellisError> {
        lease::validate_owner(owner)?;
        self.commit(|state, _| {
            lease::check_release(state.node(id)?, owner)?;
            Ok((
                EventPayload::NodeReleased {
                    node_id: id.clone(),
                    owner: owner.to_string(),
                },
                (),
            ))
        })
    }

    /// Add one child under `parent`, which `owner` must hold.
    pub fn refine(
        &self,
        parent: &NodeId,
        owner: &str,
        spec: ChildSpec,
    ) -> Result<NodeId, TrellisError> {
        lease::validate_owner(owner)?;
        require_text("statement", &spec.statement)?;
        check_coupling(&spec)?;

        let node = self.commit(|state, at| {
            let parent_node = state.node(parent)?;
            require_pending(parent_node, "refined")?;
            lease::require_owner(parent_node, owner, at)?;

            let child_id = parent.child(state.next_child_index(parent));
            let dependencies: BTreeSet<NodeId> = spec.dependencies.iter().cloned().collect();
            let validation_deps: BTreeSet<NodeId> = spec.validation_deps.iter().cloned().collect();
            scope::check_dependency_visibility(state, &child_id, &dependencies)?;
            for dep in &validation_deps {
                state
                    .nodes
                    .get(dep)
                    .ok_or_else(|| TrellisError::NotFound(format!("validation dependency {}", dep)))?;
            }
            let (scope, discharges) = scope::child_scope(state, parent, &child_id, spec.node_type)?;

            let mut node = Node::new(
                child_id,
                spec.node_type,
                spec.statement.clone(),
                spec.inference,
                at,
            );
            node.dependencies = dependencies;
            node.validation_deps = validation_deps;
            node.scope = scope;
            node.discharges = discharges;
            node.content_hash = node.compute_content_hash();

            Ok((EventPayload::NodeCreated { node: node.clone() }, node))
        })?;

        self.mirror_blob(NODE_BLOB_KIND, &node);
        Ok(node.id)
    }

    /// Mark `id` validated. Refused while challenges on it are open.
    pub fn accept(&self, id: &NodeId) -> Result<(), TrellisError> {
        self.commit(|state, _| {
            let node = state.node(id)?;
            let open = state.open_challenges_on(id).len();
            if open > 0 {
                return Err(TrellisError::OpenChallenges {
                    node: id.to_string(),
                    count: open,
                });
            }
            Self::check_epistemic(node, EpistemicState::Validated)?;
            Ok((EventPayload::NodeAccepted { node_id: id.clone() }, ()))
        })
    }

    pub fn refute(&self, id: &NodeId, reason: Option<&str>) -> Result<(), TrellisError> {
        self.commit(|state, _| {
            Self::check_epistemic(state.node(id)?, EpistemicState::Refuted)?;
            Ok((
                EventPayload::NodeRefuted {
                    node_id: id.clone(),
                    reason: reason.map(str::to_string),
                },
                (),
            ))
        })
    }

    /// Accept `id` without proof. Taints everything resting on it.
    pub fn admit(&self, id: &NodeId) -> Result<(), TrellisError> {
        self.commit(|state, _| {
            Self::check_epistemic(state.node(id)?, EpistemicState::Admitted)?;
            Ok((EventPayload::NodeAdmitted { node_id: id.clone() }, ()))
        })
    }

    pub fn archive(&self, id: &NodeId) -> Result<(), TrellisError> {
        self.commit(|state, _| {
            Self::check_epistemic(state.node(id)?, EpistemicState::Archived)?;
            Ok((EventPayload::NodeArchived { node_id: id.clone() }, ()))
        })
    }

    fn check_epistemic(node: &Node, to: EpistemicState) -> Result<(), TrellisError> {
        if !node.epistemic_state.can_transition_to(to) {
            return Err(TrellisError::IllegalTransition {
                node: node.id.to_string(),
                axis: "epistemic",
                from: node.epistemic_state.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        Ok(())
    }

    pub fn raise_challenge(
        &self,
        id: &NodeId,
        target: ChallengeTarget,
        reason: &str,
    ) -> Result<String, TrellisError> {
        require_text("reason", reason)?;
        self.commit(|state, _| {
            state.node(id)?;
            let challenge_id = prefixed_id("CH");
            Ok((
                EventPayload::ChallengeRaised {
                    challenge_id: challenge_id.clone(),
                    node_id: id.clone(),
                    target,
                    reason: reason.to_string(),
                },
                challenge_id,
            ))
        })
    }

    pub fn resolve_challenge(&self, challenge_id: &str) -> Result<(), TrellisError> {
        self.commit(|state, _| {
            let challenge = state
                .challenges
                .get(challenge_id)
                .ok_or_else(|| TrellisError::NotFound(format!("challenge {}", challenge_id)))?;
            if challenge.status != ChallengeStatus::Open {
                return Err(TrellisError::IllegalTransition {
                    node: challenge.node_id.to_string(),
                    axis: "challenge",
                    from: "resolved".to_string(),
                    to: "resolved".to_string(),
                });
            }
            Ok((
                EventPayload::ChallengeResolved {
                    challenge_id: challenge_id.to_string(),
                },
                (),
            ))
        })
    }

    /// Replace the statement of a pending node nobody else holds.
    pub fn amend_statement(
        &self,
        id: &NodeId,
        owner: &str,
        new_statement: &str,
    ) -> Result<(), TrellisError> {
        lease::validate_owner(owner)?;
        require_text("statement", new_statement)?;
        self.commit(|state, at| {
            let node = state.node(id)?;
            require_pending(node, "amended")?;
            if let Some(holder) = lease::active_owner(node, at)
                && holder != owner
            {
                return Err(TrellisError::NotOwner {
                    node: id.to_string(),
                    owner: holder.to_string(),
                    caller: owner.to_string(),
                });
            }
            Ok((
                EventPayload::StatementAmended {
                    node_id: id.clone(),
                    owner: owner.to_string(),
                    new_statement: new_statement.to_string(),
                    content_hash: node.hash_with_statement(new_statement),
                },
                (),
            ))
        })
    }

    /// Promote a validated, scope-free node to a reusable lemma.
    pub fn extract_lemma(
        &self,
        id: &NodeId,
        statement: Option<&str>,
    ) -> Result<String, TrellisError> {
        if let Some(statement) = statement {
            require_text("statement", statement)?;
        }
        let lemma = self.commit(|state, at| {
            let node = state.node(id)?;
            if node.epistemic_state != EpistemicState::Validated {
                return Err(TrellisError::IllegalTransition {
                    node: id.to_string(),
                    axis: "lemma",
                    from: node.epistemic_state.as_str().to_string(),
                    to: "extracted".to_string(),
                });
            }
            scope::check_independent(node)?;
            let statement = statement.unwrap_or(node.statement.as_str()).to_string();
            let lemma = Lemma {
                id: prefixed_id("LEM"),
                content_hash: sha256_hex(statement.as_bytes()),
                statement,
                source_node_id: id.clone(),
                created: at,
            };
            Ok((
                EventPayload::LemmaExtracted {
                    lemma: lemma.clone(),
                },
                lemma,
            ))
        })?;
        self.mirror_blob(LEMMA_BLOB_KIND, &lemma);
        Ok(lemma.id)
    }

    pub fn add_definition(&self, term: &str, content: &str) -> Result<String, TrellisError> {
        require_text("term", term)?;
        require_text("content", content)?;
        let definition = self.commit(|state, at| {
            if state.definitions.values().any(|d| d.term == term) {
                return Err(TrellisError::InvalidInput(format!(
                    "term '{}' is already defined",
                    term
                )));
            }
            let definition = Definition {
                id: prefixed_id("DEF"),
                term: term.to_string(),
                content: content.to_string(),
                content_hash: sha256_hex(content.as_bytes()),
                created: at,
            };
            Ok((
                EventPayload::DefAdded {
                    definition: definition.clone(),
                },
                definition,
            ))
        })?;
        self.mirror_blob(DEFINITION_BLOB_KIND, &definition);
        Ok(definition.id)
    }

    /// Ask for a definition of `term`, noting the node that needs it.
    pub fn request_definition(
        &self,
        term: &str,
        node_id: &NodeId,
        requested_by: &str,
    ) -> Result<PendingDef, TrellisError> {
        require_text("term", term)?;
        lease::validate_owner(requested_by)?;
        let request_id = self.commit(|state, _| {
            state.node(node_id)?;
            if state.definitions.values().any(|d| d.term == term) {
                return Err(TrellisError::InvalidInput(format!(
                    "term '{}' is already defined",
                    term
                )));
            }
            let request_id = prefixed_id("REQ");
            Ok((
                EventPayload::DefRequested {
                    request_id: request_id.clone(),
                    term: term.to_string(),
                    node_id: node_id.clone(),
                    requested_by: requested_by.to_string(),
                },
                request_id,
            ))
        })?;
        self.lock_projection()
            .state()
            .pending_defs
            .get(&request_id)
            .cloned()
            .ok_or_else(|| TrellisError::NotFound(format!("definition request {}", request_id)))
    }

    pub fn add_external(&self, name: &str, source: &str) -> Result<String, TrellisError> {
        require_text("name", name)?;
        require_text("source", source)?;
        let external = self.commit(|_, at| {
            let external = External {
                id: prefixed_id("EXT"),
                name: name.to_string(),
                source: source.to_string(),
                content_hash: sha256_hex(source.as_bytes()),
                created: at,
            };
            Ok((
                EventPayload::ExternalAdded {
                    external: external.clone(),
                },
                external,
            ))
        })?;
        self.mirror_blob(EXTERNAL_BLOB_KIND, &external);
        Ok(external.id)
    }

    // Read-only accessors. Each catches up with the ledger first.

    fn read<T>(&self, f: impl FnOnce(&State, DateTime<Utc>) -> T) -> Result<T, TrellisError> {
        let mut projection = self.lock_projection();
        projection.catch_up(&self.ledger)?;
        let now = self.clock.now();
        Ok(f(projection.state(), now))
    }

    /// Copy of `node` with its workflow as seen at `now`.
    fn observed(state: &State, node: &Node, now: DateTime<Utc>) -> Node {
        let mut node = node.clone();
        node.workflow_state = lease::effective_workflow(state, &node, now);
        node
    }

    /// The folded state, with claim leases as recorded.
    pub fn state(&self) -> Result<State, TrellisError> {
        self.read(|state, _| state.clone())
    }

    pub fn get_node(&self, id: &NodeId) -> Result<Node, TrellisError> {
        self.read(|state, now| {
            state
                .node(id)
                .map(|node| Self::observed(state, node, now))
        })?
    }

    pub fn all_nodes(&self) -> Result<Vec<Node>, TrellisError> {
        self.read(|state, now| {
            state
                .nodes
                .values()
                .map(|node| Self::observed(state, node, now))
                .collect()
        })
    }

    pub fn all_challenges(&self) -> Result<Vec<Challenge>, TrellisError> {
        self.read(|state, _| state.challenges.values().cloned().collect())
    }

    pub fn all_lemmas(&self) -> Result<Vec<Lemma>, TrellisError> {
        self.read(|state, _| state.lemmas.values().cloned().collect())
    }

    pub fn all_definitions(&self) -> Result<Vec<Definition>, TrellisError> {
        self.read(|state, _| state.definitions.values().cloned().collect())
    }

    pub fn all_externals(&self) -> Result<Vec<External>, TrellisError> {
        self.read(|state, _| state.externals.values().cloned().collect())
    }

    /// Definition requests not yet fulfilled.
    pub fn pending_definitions(&self) -> Result<Vec<PendingDef>, TrellisError> {
        self.read(|state, _| {
            state
                .pending_defs
                .values()
                .filter(|p| p.status == PendingDefStatus::Pending)
                .cloned()
                .collect()
        })
    }

    pub fn get_scope_info(&self, id: &NodeId) -> Result<ScopeInfo, TrellisError> {
        self.read(|state, _| scope::get_scope_info(state, id))?
    }

    pub fn get_amendment_history(&self, id: &NodeId) -> Result<Vec<Amendment>, TrellisError> {
        self.read(|state, _| state.node(id).map(|n| n.amendments.clone()))?
    }

    pub fn status(&self) -> Result<ProofStatus, TrellisError> {
        self.read(|state, now| {
            let mut status = ProofStatus {
                initialized: state.is_initialized(),
                conjecture: state.conjecture.clone(),
                last_seq: state.last_seq,
                nodes: state.nodes.len(),
                open_challenges: state
                    .challenges
                    .values()
                    .filter(|c| c.status == ChallengeStatus::Open)
                    .count(),
                pending_definitions: state
                    .pending_defs
                    .values()
                    .filter(|p| p.status == PendingDefStatus::Pending)
                    .count(),
                definitions: state.definitions.len(),
                lemmas: state.lemmas.len(),
                externals: state.externals.len(),
                ..ProofStatus::default()
            };
            for node in state.nodes.values() {
                let workflow = lease::effective_workflow(state, node, now);
                *status.workflow.entry(workflow.as_str().to_string()).or_default() += 1;
                *status
                    .epistemic
                    .entry(node.epistemic_state.as_str().to_string())
                    .or_default() += 1;
                *status
                    .taint
                    .entry(node.taint_state.as_str().to_string())
                    .or_default() += 1;
            }
            status
        })
    }

    /// Nodes whose taint is not clean.
    pub fn tainted_nodes(&self) -> Result<Vec<NodeId>, TrellisError> {
        self.read(|state, _| {
            state
                .nodes
                .values()
                .filter(|n| n.taint_state != TaintState::Clean)
                .map(|n| n.id.clone())
                .collect()
        })
    }

    pub fn events(&self) -> Result<Vec<Event>, TrellisError> {
        event::read_events(&self.ledger)
    }

    /// Full strict replay with hash checks. Does not touch the cached projection.
    pub fn verify(&self) -> Result<State, TrellisError> {
        replay::replay_with_verify(&self.ledger)
    }

    /// Drop all snapshots, refold from scratch and write a fresh snapshot.
    pub fn rebuild_snapshot(&self) -> Result<u64, TrellisError> {
        let snapshots = self.snapshots.as_ref().ok_or_else(|| {
            TrellisError::ConfigError("snapshots are disabled".to_string())
        })?;
        snapshots.clear()?;
        let fresh = Projection::from_state(replay::replay(&self.ledger)?);
        let seq = fresh.last_seq();
        if seq > 0 {
            fresh.save_snapshot(&self.ledger, snapshots)?;
        }
        *self.lock_projection() = fresh;
        tracing::info!(seq, "projection snapshot rebuilt");
        Ok(seq)
    }
}
