//! Local-assumption scopes.
//!
//! A `local_assume` node opens a scope over its subtree. The scope stays
//! open until a `local_discharge` somewhere in that subtree closes it; each
//! discharge closes the innermost scope still open above it, so every scope
//! is closed at most once.
//!
//! Nothing here is persisted. Scope information is derived from node types,
//! ancestry and the `discharges` link recorded on discharge nodes.

use crate::core::error::TrellisError;
use crate::proof::node::{Node, NodeId, NodeType};
use crate::proof::state::State;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeEntry {
    pub node_id: NodeId,
    pub statement: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeInfo {
    /// Number of still-open scopes enclosing the node.
    pub depth: usize,
    /// Every local assumption on the path from the root to the node
    /// (inclusive), outermost first.
    pub containing_scopes: Vec<ScopeEntry>,
}

/// Assumptions already closed by a discharge.
pub fn closed_scopes(state: &State) -> BTreeSet<NodeId> {
    state
        .nodes
        .values()
        .filter_map(|n| n.discharges.clone())
        .collect()
}

pub fn is_open(state: &State, assume: &Node) -> bool {
    assume.node_type == NodeType::LocalAssume
        && !state
            .nodes
            .values()
            .any(|n| n.discharges.as_ref() == Some(&assume.id))
}

pub fn get_scope_info(state: &State, id: &NodeId) -> Result<ScopeInfo, TrellisError> {
    if !state.nodes.contains_key(id) {
        return Err(TrellisError::NotFound(format!("node {}", id)));
    }
    let closed = closed_scopes(state);
    let containing_scopes: Vec<ScopeEntry> = id
        .ancestors()
        .into_iter()
        .chain(std::iter::once(id.clone()))
        .filter_map(|a| state.nodes.get(&a))
        .filter(|n| n.node_type == NodeType::LocalAssume)
        .map(|n| ScopeEntry {
            node_id: n.id.clone(),
            statement: n.statement.clone(),
            active: !closed.contains(&n.id),
        })
        .collect();
    Ok(ScopeInfo {
        depth: containing_scopes.iter().filter(|s| s.active).count(),
        containing_scopes,
    })
}

/// Open scopes on the path root..=`id`, outermost first.
fn open_scopes_through(state: &State, id: &NodeId, closed: &BTreeSet<NodeId>) -> Vec<NodeId> {
    id.ancestors()
        .into_iter()
        .chain(std::iter::once(id.clone()))
        .filter(|a| {
            state
                .nodes
                .get(a)
                .is_some_and(|n| n.node_type == NodeType::LocalAssume)
                && !closed.contains(a)
        })
        .collect()
}

/// Scope snapshot for a new child of `parent`, and the scope it discharges.
///
/// A `local_assume` child is inside its own scope. A `local_discharge` child
/// closes the innermost open scope above it and is outside that scope.
pub fn child_scope(
    state: &State,
    parent: &NodeId,
    child_id: &NodeId,
    child_type: NodeType,
) -> Result<(Vec<NodeId>, Option<NodeId>), TrellisError> {
    let closed = closed_scopes(state);
    let mut open = open_scopes_through(state, parent, &closed);
    match child_type {
        NodeType::LocalAssume => {
            open.push(child_id.clone());
            Ok((open, None))
        }
        NodeType::LocalDischarge => match open.pop() {
            Some(innermost) => Ok((open, Some(innermost))),
            None => Err(TrellisError::InvalidInput(format!(
                "local_discharge under {} has no open local assumption to close",
                parent
            ))),
        },
        _ => Ok((open, None)),
    }
}

/// A node may depend on another only if it sits inside every scope the
/// other was created under.
pub fn check_dependency_visibility(
    state: &State,
    new_id: &NodeId,
    deps: &BTreeSet<NodeId>,
) -> Result<(), TrellisError> {
    for dep in deps {
        let node = state
            .nodes
            .get(dep)
            .ok_or_else(|| TrellisError::NotFound(format!("dependency {}", dep)))?;
        let hidden: Vec<String> = node
            .scope
            .iter()
            .filter(|s| !s.is_ancestor_or_self_of(new_id))
            .map(|s| s.to_string())
            .collect();
        if !hidden.is_empty() {
            return Err(TrellisError::InvalidInput(format!(
                "{} cannot depend on {}: outside local assumption(s) {}",
                new_id,
                dep,
                hidden.join(", ")
            )));
        }
    }
    Ok(())
}

/// An open assumption strictly below `id`, which keeps `id` blocked.
pub fn blocking_scope(state: &State, id: &NodeId) -> Option<NodeId> {
    let closed = closed_scopes(state);
    state
        .nodes
        .range(id.clone()..)
        .take_while(|(k, _)| id.is_ancestor_or_self_of(k))
        .filter(|(k, _)| *k != id)
        .find(|(k, n)| n.node_type == NodeType::LocalAssume && !closed.contains(*k))
        .map(|(k, _)| k.clone())
}

/// Every node with an open assumption strictly below it.
pub fn blocked_nodes(state: &State) -> BTreeSet<NodeId> {
    let closed = closed_scopes(state);
    let mut blocked = BTreeSet::new();
    for (id, node) in &state.nodes {
        if node.node_type == NodeType::LocalAssume && !closed.contains(id) {
            blocked.extend(id.ancestors());
        }
    }
    blocked
}

/// Lemma gate: the node's scope snapshot must be empty.
pub fn check_independent(node: &Node) -> Result<(), TrellisError> {
    if node.scope.is_empty() {
        Ok(())
    } else {
        Err(TrellisError::NotIndependent {
            node: node.id.to_string(),
            scopes: node.scope.iter().map(|s| s.to_string()).collect(),
        })
    }
}
