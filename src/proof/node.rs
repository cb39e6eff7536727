//! Proof nodes and the records that hang off them.
//!
//! A node carries three independent state axes:
//!
//! - **Workflow** (`available`, `claimed`, `blocked`): who may act on it now.
//! - **Epistemic** (`pending`, `validated`, `admitted`, `refuted`,
//!   `archived`): what is known about it.
//! - **Taint** (`unresolved`, `clean`, `self_admitted`, `tainted`): derived
//!   from the dependency graph, never set directly.

use crate::core::error::TrellisError;
use crate::core::hash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Hierarchical node address: `1`, `1.2`, `1.2.3`.
///
/// Ordering compares segments left to right; a prefix sorts before its
/// extensions, so `1 < 1.1 < 1.1.1 < 1.2 < 1.10`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(Vec<u32>);

impl NodeId {
    pub fn root() -> Self {
        NodeId(vec![1])
    }

    pub fn parse(s: &str) -> Result<Self, TrellisError> {
        let invalid = || TrellisError::InvalidInput(format!("invalid node id '{}'", s));
        if s.is_empty() {
            return Err(invalid());
        }
        let mut segments = Vec::new();
        for part in s.split('.') {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) || part.starts_with('0')
            {
                return Err(invalid());
            }
            segments.push(part.parse::<u32>().map_err(|_| invalid())?);
        }
        if segments[0] != 1 {
            return Err(invalid());
        }
        Ok(NodeId(segments))
    }

    pub fn is_root(&self) -> bool {
        self.0.len() == 1
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn parent(&self) -> Option<NodeId> {
        if self.is_root() {
            None
        } else {
            Some(NodeId(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    pub fn child(&self, index: u32) -> NodeId {
        let mut segments = self.0.clone();
        segments.push(index);
        NodeId(segments)
    }

    pub fn last_segment(&self) -> u32 {
        self.0.last().copied().unwrap_or(1)
    }

    /// Proper ancestors, root first.
    pub fn ancestors(&self) -> Vec<NodeId> {
        (1..self.0.len())
            .map(|len| NodeId(self.0[..len].to_vec()))
            .collect()
    }

    /// True if `self` is `other` or one of its ancestors.
    pub fn is_ancestor_or_self_of(&self, other: &NodeId) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl FromStr for NodeId {
    type Err = TrellisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeId::parse(s)
    }
}

impl TryFrom<String> for NodeId {
    type Error = TrellisError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        NodeId::parse(&value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Claim,
    LocalAssume,
    LocalDischarge,
    Case,
    Qed,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Claim => "claim",
            NodeType::LocalAssume => "local_assume",
            NodeType::LocalDischarge => "local_discharge",
            NodeType::Case => "case",
            NodeType::Qed => "qed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceType {
    ModusPonens,
    ModusTollens,
    UniversalInstantiation,
    ExistentialInstantiation,
    UniversalGeneralization,
    ExistentialGeneralization,
    ByDefinition,
    Assumption,
    LocalAssume,
    LocalDischarge,
    Contradiction,
}

impl InferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InferenceType::ModusPonens => "modus_ponens",
            InferenceType::ModusTollens => "modus_tollens",
            InferenceType::UniversalInstantiation => "universal_instantiation",
            InferenceType::ExistentialInstantiation => "existential_instantiation",
            InferenceType::UniversalGeneralization => "universal_generalization",
            InferenceType::ExistentialGeneralization => "existential_generalization",
            InferenceType::ByDefinition => "by_definition",
            InferenceType::Assumption => "assumption",
            InferenceType::LocalAssume => "local_assume",
            InferenceType::LocalDischarge => "local_discharge",
            InferenceType::Contradiction => "contradiction",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Available,
    Claimed,
    Blocked,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Available => "available",
            WorkflowState::Claimed => "claimed",
            WorkflowState::Blocked => "blocked",
        }
    }

    pub fn can_transition_to(&self, to: WorkflowState) -> bool {
        matches!(
            (self, to),
            (WorkflowState::Available, WorkflowState::Claimed)
                | (WorkflowState::Available, WorkflowState::Blocked)
                | (WorkflowState::Claimed, WorkflowState::Available)
                | (WorkflowState::Claimed, WorkflowState::Blocked)
                | (WorkflowState::Blocked, WorkflowState::Available)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpistemicState {
    Pending,
    Validated,
    Admitted,
    Refuted,
    Archived,
}

impl EpistemicState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EpistemicState::Pending => "pending",
            EpistemicState::Validated => "validated",
            EpistemicState::Admitted => "admitted",
            EpistemicState::Refuted => "refuted",
            EpistemicState::Archived => "archived",
        }
    }

    pub fn can_transition_to(&self, to: EpistemicState) -> bool {
        use EpistemicState::*;
        matches!(
            (self, to),
            (Pending, Validated)
                | (Pending, Admitted)
                | (Pending, Refuted)
                | (Validated, Archived)
                | (Admitted, Archived)
                | (Refuted, Archived)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaintState {
    Unresolved,
    Clean,
    SelfAdmitted,
    Tainted,
}

impl TaintState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaintState::Unresolved => "unresolved",
            TaintState::Clean => "clean",
            TaintState::SelfAdmitted => "self_admitted",
            TaintState::Tainted => "tainted",
        }
    }

    /// Whether a node in this state passes taint on to its dependents.
    pub fn propagates(&self) -> bool {
        matches!(self, TaintState::SelfAdmitted | TaintState::Tainted)
    }
}

/// One recorded change of a node's statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amendment {
    pub timestamp: DateTime<Utc>,
    pub previous_statement: String,
    pub new_statement: String,
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub statement: String,
    pub inference: InferenceType,
    pub workflow_state: WorkflowState,
    pub epistemic_state: EpistemicState,
    pub taint_state: TaintState,
    #[serde(default)]
    pub dependencies: BTreeSet<NodeId>,
    #[serde(default)]
    pub validation_deps: BTreeSet<NodeId>,
    /// Open local assumptions in force when the node was created, outermost first.
    #[serde(default)]
    pub scope: Vec<NodeId>,
    /// For a `local_discharge`, the `local_assume` whose scope it closes.
    #[serde(default)]
    pub discharges: Option<NodeId>,
    #[serde(default)]
    pub claimed_by: Option<String>,
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub claim_ttl_ms: Option<u64>,
    /// Set once by admission; never cleared, even by archival.
    #[serde(default)]
    pub taint_source: bool,
    pub content_hash: String,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub amendments: Vec<Amendment>,
}

impl Node {
    /// A fresh, unclaimed, pending node with its hash filled in.
    pub fn new(
        id: NodeId,
        node_type: NodeType,
        statement: impl Into<String>,
        inference: InferenceType,
        created: DateTime<Utc>,
    ) -> Self {
        let mut node = Node {
            id,
            node_type,
            statement: statement.into(),
            inference,
            workflow_state: WorkflowState::Available,
            epistemic_state: EpistemicState::Pending,
            taint_state: TaintState::Unresolved,
            dependencies: BTreeSet::new(),
            validation_deps: BTreeSet::new(),
            scope: Vec::new(),
            discharges: None,
            claimed_by: None,
            claimed_at: None,
            claim_ttl_ms: None,
            taint_source: false,
            content_hash: String::new(),
            created,
            amendments: Vec::new(),
        };
        node.content_hash = node.compute_content_hash();
        node
    }

    /// Root node `1` holding the conjecture.
    pub fn root(conjecture: impl Into<String>, created: DateTime<Utc>) -> Self {
        Node::new(
            NodeId::root(),
            NodeType::Claim,
            conjecture,
            InferenceType::Assumption,
            created,
        )
    }

    /// The hash this node would carry with `statement` in place of its own.
    pub fn hash_with_statement(&self, statement: &str) -> String {
        let mut amended = self.clone();
        amended.statement = statement.to_string();
        amended.compute_content_hash()
    }

    pub fn compute_content_hash(&self) -> String {
        let deps: Vec<String> = self.dependencies.iter().map(|d| d.to_string()).collect();
        hash::content_hash(
            self.node_type.as_str(),
            &self.statement,
            self.inference.as_str(),
            &deps,
        )
    }

    pub fn verify_content_hash(&self) -> Result<(), TrellisError> {
        let computed = self.compute_content_hash();
        if computed != self.content_hash {
            return Err(TrellisError::HashMismatch {
                node: self.id.to_string(),
                recorded: self.content_hash.clone(),
                computed,
            });
        }
        Ok(())
    }

    /// Every node this one's soundness rests on: ancestors plus both dependency sets.
    pub fn taint_sources(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.id
            .ancestors()
            .into_iter()
            .chain(self.dependencies.iter().cloned())
            .chain(self.validation_deps.iter().cloned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeTarget {
    Statement,
    Inference,
    Context,
    Dependencies,
    Scope,
    Gap,
    TypeError,
    Domain,
    Completeness,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    Open,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: String,
    pub node_id: NodeId,
    pub target: ChallengeTarget,
    pub reason: String,
    pub status: ChallengeStatus,
    pub raised: DateTime<Utc>,
    #[serde(default)]
    pub resolved: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lemma {
    pub id: String,
    pub statement: String,
    pub source_node_id: NodeId,
    pub content_hash: String,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub id: String,
    pub term: String,
    pub content: String,
    pub content_hash: String,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingDefStatus {
    Pending,
    Fulfilled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDef {
    pub id: String,
    pub term: String,
    pub node_id: NodeId,
    pub requested_by: String,
    pub status: PendingDefStatus,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub fulfilled_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct External {
    pub id: String,
    pub name: String,
    pub source: String,
    pub content_hash: String,
    pub created: DateTime<Utc>,
}
