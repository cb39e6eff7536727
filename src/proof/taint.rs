//! Taint propagation.
//!
//! A node's soundness rests on its ancestors, its `dependencies` and its
//! `validation_deps`. Admission introduces taint; it then flows forward along
//! those edges:
//!
//! - `self_admitted`: the node itself was admitted without proof.
//! - `tainted`: some source is `self_admitted` or `tainted`.
//! - `clean`: neither of the above.
//!
//! The graph is kept in an index arena and walked in topological order
//! (Kahn), so a cycle shows up as nodes that never become ready.

use crate::core::error::TrellisError;
use crate::proof::node::{NodeId, TaintState};
use crate::proof::state::State;
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, VecDeque};

struct DepGraph<'a> {
    ids: Vec<&'a NodeId>,
    /// Edges into each node (what it rests on).
    sources: Vec<Vec<usize>>,
    /// Edges out of each node (what rests on it).
    dependents: Vec<Vec<usize>>,
}

impl<'a> DepGraph<'a> {
    fn build(state: &'a State) -> Self {
        let ids: Vec<&NodeId> = state.nodes.keys().collect();
        let index: FxHashMap<&NodeId, usize> =
            ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut sources = vec![Vec::new(); ids.len()];
        let mut dependents = vec![Vec::new(); ids.len()];
        for (i, node) in state.nodes.values().enumerate() {
            for source in node.taint_sources() {
                // Missing targets are rejected at apply time.
                if let Some(&j) = index.get(&source)
                    && !sources[i].contains(&j)
                {
                    sources[i].push(j);
                    dependents[j].push(i);
                }
            }
        }
        Self {
            ids,
            sources,
            dependents,
        }
    }

    fn topo_order(&self) -> Result<Vec<usize>, TrellisError> {
        let mut pending: Vec<usize> = self.sources.iter().map(Vec::len).collect();
        let mut ready: VecDeque<usize> = (0..self.ids.len()).filter(|i| pending[*i] == 0).collect();
        let mut order = Vec::with_capacity(self.ids.len());

        while let Some(i) = ready.pop_front() {
            order.push(i);
            for &d in &self.dependents[i] {
                pending[d] -= 1;
                if pending[d] == 0 {
                    ready.push_back(d);
                }
            }
        }

        if order.len() != self.ids.len() {
            let stuck = (0..self.ids.len())
                .find(|i| pending[*i] > 0)
                .map(|i| self.ids[i].to_string())
                .unwrap_or_default();
            return Err(TrellisError::TaintCycle(stuck));
        }
        Ok(order)
    }
}

/// Taint for every node, without touching `state`.
pub fn compute_taint(state: &State) -> Result<BTreeMap<NodeId, TaintState>, TrellisError> {
    let graph = DepGraph::build(state);
    let order = graph.topo_order()?;
    let nodes: Vec<_> = state.nodes.values().collect();

    let mut taint = vec![TaintState::Unresolved; nodes.len()];
    for i in order {
        taint[i] = if nodes[i].taint_source {
            TaintState::SelfAdmitted
        } else if graph.sources[i].iter().any(|&j| taint[j].propagates()) {
            TaintState::Tainted
        } else {
            TaintState::Clean
        };
    }

    Ok(graph
        .ids
        .iter()
        .zip(taint)
        .map(|(id, t)| ((*id).clone(), t))
        .collect())
}

/// Write freshly computed taint into `state`.
pub fn apply_taint(state: &mut State) -> Result<(), TrellisError> {
    let computed = compute_taint(state)?;
    for (id, taint) in computed {
        if let Some(node) = state.nodes.get_mut(&id) {
            node.taint_state = taint;
        }
    }
    Ok(())
}

/// `RecomputeTaint(state) -> state'`.
pub fn recompute_taint(mut state: State) -> Result<State, TrellisError> {
    apply_taint(&mut state)?;
    Ok(state)
}
