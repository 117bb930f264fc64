//! Graph validation: unreachable nodes, dead ends, no-path-to-end.
//!
//! Mirrors the teacher's `CompiledGraph::validate()` contract exercised by
//! its `executor::tests::validation_tests` suite: a graph is valid when
//! every node is reachable from the entry point, every node has a path
//! back to [`super::END`], and no non-terminal node is missing an outgoing
//! edge.

use super::END;
use crate::node::Node;
use crate::state::MergeableState;
use petgraph::algo::has_path_connecting;
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::{Dfs, Walker};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Default, Clone)]
pub struct GraphValidation {
    unreachable: Vec<String>,
    dead_ends: Vec<String>,
    no_path_to_end: Vec<String>,
}

impl GraphValidation {
    pub fn is_valid(&self) -> bool {
        self.unreachable.is_empty() && self.dead_ends.is_empty() && self.no_path_to_end.is_empty()
    }

    pub fn warning_count(&self) -> usize {
        self.unreachable.len() + self.dead_ends.len() + self.no_path_to_end.len()
    }

    pub fn has_unreachable_nodes(&self) -> bool {
        !self.unreachable.is_empty()
    }

    pub fn has_dead_end_nodes(&self) -> bool {
        !self.dead_ends.is_empty()
    }

    pub fn has_no_path_to_end(&self) -> bool {
        !self.no_path_to_end.is_empty()
    }

    pub fn unreachable_nodes(&self) -> &[String] {
        &self.unreachable
    }

    pub fn dead_end_nodes(&self) -> &[String] {
        &self.dead_ends
    }

    pub fn describe(&self) -> String {
        format!(
            "unreachable={:?} dead_ends={:?} no_path_to_end={:?}",
            self.unreachable, self.dead_ends, self.no_path_to_end
        )
    }
}

pub(super) fn validate<S: MergeableState>(
    nodes: &HashMap<String, Arc<dyn Node<S>>>,
    graph: &DiGraphMap<&str, ()>,
    entry_point: &str,
) -> GraphValidation {
    let reachable: HashSet<&str> = Dfs::new(graph, entry_point).iter(graph).collect();

    let unreachable = nodes
        .keys()
        .filter(|n| !reachable.contains(n.as_str()))
        .cloned()
        .collect();

    let dead_ends = nodes
        .keys()
        .filter(|n| graph.neighbors(n.as_str()).count() == 0)
        .cloned()
        .collect();

    let no_path_to_end = nodes
        .keys()
        .filter(|n| !has_path_connecting(graph, n.as_str(), END, None))
        .cloned()
        .collect();

    GraphValidation {
        unreachable,
        dead_ends,
        no_path_to_end,
    }
}
