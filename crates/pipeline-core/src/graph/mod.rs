//! A small `StateGraph`-style executor.
//!
//! This is a deliberately narrow reimplementation of the teacher's graph
//! engine: a directed graph of named [`Node`] implementations, a single
//! entry point, unconditional edges, and conditional edges driven by a
//! routing predicate over the current state. It supports exactly what the
//! pipeline orchestrator needs (one back-edge, bounded loops via state
//! counters) rather than the teacher's full feature set (streaming,
//! checkpointing, multi-writer channel merges).

mod validate;

pub use validate::GraphValidation;

use crate::error::{Error, Result};
use crate::node::Node;
use crate::state::MergeableState;
use petgraph::graphmap::DiGraphMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Sentinel target name for the terminal state of the graph.
pub const END: &str = "__end__";

type Router<S> = Arc<dyn Fn(&S) -> &'static str + Send + Sync>;

enum Edge<S> {
    Direct(String),
    Conditional { router: Router<S>, targets: Vec<String> },
}

/// A graph under construction. Mirrors `StateGraph::new()` /
/// `add_node` / `add_edge` / `add_conditional_edges` / `set_entry_point` /
/// `compile()` on the teacher's executor.
pub struct StateGraph<S: MergeableState> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    edges: HashMap<String, Edge<S>>,
    entry_point: Option<String>,
}

impl<S: MergeableState> Default for StateGraph<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MergeableState> StateGraph<S> {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            entry_point: None,
        }
    }

    pub fn add_node(&mut self, name: impl Into<String>, node: impl Node<S> + 'static) -> &mut Self {
        self.nodes.insert(name.into(), Arc::new(node));
        self
    }

    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.insert(from.into(), Edge::Direct(to.into()));
        self
    }

    /// `router` returns the name of the next node (or [`END`]); `targets` is
    /// the set of names `router` may return, used only for validation.
    pub fn add_conditional_edges(
        &mut self,
        from: impl Into<String>,
        router: impl Fn(&S) -> &'static str + Send + Sync + 'static,
        targets: Vec<&'static str>,
    ) -> &mut Self {
        self.edges.insert(
            from.into(),
            Edge::Conditional {
                router: Arc::new(router),
                targets: targets.into_iter().map(String::from).collect(),
            },
        );
        self
    }

    pub fn set_entry_point(&mut self, name: impl Into<String>) -> &mut Self {
        self.entry_point = Some(name.into());
        self
    }

    pub fn compile(self) -> Result<CompiledGraph<S>> {
        let compiled = self.compile_without_validation()?;
        let validation = compiled.validate();
        if !validation.is_valid() {
            return Err(Error::GraphError(validation.describe()));
        }
        Ok(compiled)
    }

    /// Compile without the reachability/dead-end pass, so callers can
    /// inspect [`CompiledGraph::validate`] themselves (used by tests that
    /// exercise the validator directly).
    pub fn compile_without_validation(self) -> Result<CompiledGraph<S>> {
        let entry_point = self
            .entry_point
            .ok_or_else(|| Error::GraphError("no entry point set".into()))?;
        if !self.nodes.contains_key(&entry_point) {
            return Err(Error::GraphError(format!(
                "entry point '{entry_point}' is not a registered node"
            )));
        }
        Ok(CompiledGraph {
            nodes: self.nodes,
            edges: self.edges,
            entry_point,
        })
    }
}

/// A validated, executable graph.
pub struct CompiledGraph<S: MergeableState> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    edges: HashMap<String, Edge<S>>,
    entry_point: String,
}

impl<S: MergeableState> CompiledGraph<S> {
    /// Run the graph to completion (until a node routes to [`END`]).
    ///
    /// Cooperative cancellation: if `cancel` fires, the next node boundary
    /// returns [`Error::Cancelled`] instead of starting another node.
    pub async fn invoke(&self, mut state: S, cancel: &CancellationToken) -> Result<S> {
        let mut current = self.entry_point.clone();
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| Error::GraphError(format!("unknown node '{current}'")))?;
            let span = tracing::info_span!("node", name = %current);
            state = node.execute(state).instrument(span).await?;

            current = match self.edges.get(&current) {
                Some(Edge::Direct(to)) => to.clone(),
                Some(Edge::Conditional { router, .. }) => router(&state).to_string(),
                None => END.to_string(),
            };
            if current == END {
                return Ok(state);
            }
        }
    }

    pub fn validate(&self) -> GraphValidation {
        validate::validate(&self.nodes, &self.edges_graph(), &self.entry_point)
    }

    fn edges_graph(&self) -> DiGraphMap<&str, ()> {
        let mut g = DiGraphMap::new();
        for name in self.nodes.keys() {
            g.add_node(name.as_str());
        }
        g.add_node(END);
        for (from, edge) in &self.edges {
            match edge {
                Edge::Direct(to) => {
                    g.add_edge(from.as_str(), to.as_str(), ());
                }
                Edge::Conditional { targets, .. } => {
                    for t in targets {
                        g.add_edge(from.as_str(), t.as_str(), ());
                    }
                }
            }
        }
        g
    }
}
