//! Data model shared by every subgraph: issues, subtasks, the deployment
//! document, generated files, review results and the transient per-issue
//! pipeline state. See `SPEC_FULL.md` §4.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A unit of work read from the external work tracker. Immutable through
/// the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Issue {
    pub key: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub issue_type: String,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A planner-produced decomposition of an issue's work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subtask {
    pub id: u32,
    pub description: String,
    /// 1..=5
    pub priority: u8,
    pub requirements_covered: Vec<u32>,
    pub reasoning: String,
    /// 0.0..=10.0
    pub score: f64,
    pub score_reasoning: String,
}

impl Subtask {
    pub fn clamp_score(&mut self) {
        self.score = self.score.clamp(0.0, 10.0);
    }
}

/// Dependency/ordering edges for graph-of-thought planning. For linear
/// planning the graph degenerates to a chain.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SubtaskGraph {
    pub nodes: Vec<Subtask>,
    /// `(from_id, to_id)` pairs. Invariant: every endpoint is a known node
    /// id; no self-loops. A cycle does not block scoring — merging treats
    /// the graph as a DAG by iterating nodes in id order instead of
    /// topological order.
    pub edges: Vec<(u32, u32)>,
}

impl SubtaskGraph {
    /// Build a simple chain over `nodes` ordered by id, used when the model
    /// does not supply an explicit edge set.
    pub fn chain_from_nodes(mut nodes: Vec<Subtask>) -> Self {
        nodes.sort_by_key(|s| s.id);
        let edges = nodes
            .windows(2)
            .map(|pair| (pair[0].id, pair[1].id))
            .collect();
        Self { nodes, edges }
    }

    pub fn node(&self, id: u32) -> Option<&Subtask> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Edges whose endpoints are not known nodes are dropped silently, and
    /// self-loops are dropped: both are invariant violations a well-formed
    /// model response should never produce, but a malformed one might.
    pub fn sanitize_edges(&mut self) {
        let ids: std::collections::HashSet<u32> = self.nodes.iter().map(|n| n.id).collect();
        self.edges
            .retain(|(from, to)| from != to && ids.contains(from) && ids.contains(to));
    }
}

/// One file entry in a deployment document's file structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileEntry {
    pub filename: String,
    #[serde(rename = "type")]
    pub file_type: String,
    pub description: String,
}

/// One phase of the implementation plan.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Phase {
    pub name: String,
    pub tasks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Metadata {
    pub issue_key: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProjectOverview {
    pub title: String,
    pub description: String,
    pub project_type: String,
    pub architecture: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FileStructure {
    pub files: Vec<FileEntry>,
    pub file_types: Vec<String>,
}

/// A structured deployment record consumed by the developer subgraph. See
/// `SPEC_FULL.md` §4 for the invariants (non-empty `file_structure.files`;
/// every `technical_specifications` key names a file in `file_structure`).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DeploymentDocument {
    pub metadata: Metadata,
    pub project_overview: ProjectOverview,
    pub implementation_plan: Vec<Phase>,
    pub file_structure: FileStructure,
    #[serde(default)]
    pub technical_specifications: BTreeMap<String, String>,
    #[serde(default)]
    pub deployment_instructions: Vec<String>,
}

impl DeploymentDocument {
    /// Keys in `technical_specifications` with no matching file are
    /// invariant violations the assembler must never produce; surfaced so
    /// callers can assert on it in tests without reaching into internals.
    pub fn orphaned_spec_keys(&self) -> Vec<&str> {
        let filenames: std::collections::HashSet<&str> = self
            .file_structure
            .files
            .iter()
            .map(|f| f.filename.as_str())
            .collect();
        self.technical_specifications
            .keys()
            .filter(|k| !filenames.contains(k.as_str()))
            .map(|k| k.as_str())
            .collect()
    }
}

/// `filename -> source text`. Unique by filename; the developer owns
/// creation/replacement, the reviewer is read-only.
pub type GeneratedFileSet = BTreeMap<String, String>;

/// An entry of prior art the developer can reuse across issues.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MemoryFileEntry {
    pub content: String,
    pub file_type: String,
    pub issue_key: String,
}

/// Soft cache of prior generated files, relationships, and feedback
/// outcomes, scoped to one planner/developer instance (process-wide;
/// never implicitly shared across pipelines). See [`crate::memory`] for the
/// owned, mutex-guarded wrapper around this struct.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProjectMemory {
    pub all_generated_files: BTreeMap<String, MemoryFileEntry>,
    pub file_relationships: BTreeMap<String, Vec<String>>,
    pub cumulative_mistakes: Vec<String>,
    pub resolved_mistakes: Vec<String>,
    pub issue_history: Vec<String>,
}

/// Per-dimension review result.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DimensionResult {
    pub score: f64,
    pub mistakes: Vec<String>,
    pub reasoning: String,
}

/// Aggregate review verdict. `overall = 0.4*completeness + 0.4*security +
/// 0.2*standards`; lint is reported but not weighted by default.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ReviewResult {
    pub completeness: DimensionResult,
    pub security: DimensionResult,
    pub standards: DimensionResult,
    pub lint: DimensionResult,
    pub overall: f64,
    pub approved: bool,
    pub mistakes: Vec<String>,
    pub tokens_used: u64,
    pub iteration: u32,
}

impl ReviewResult {
    pub fn aggregate(&mut self, threshold: f64) {
        self.overall = round1(
            0.4 * self.completeness.score + 0.4 * self.security.score + 0.2 * self.standards.score,
        );
        self.approved = self.overall >= threshold;

        let mut seen = std::collections::HashSet::new();
        let mut mistakes = Vec::new();
        for m in self
            .completeness
            .mistakes
            .iter()
            .chain(self.security.mistakes.iter())
            .chain(self.standards.mistakes.iter())
        {
            if seen.insert(m.clone()) {
                mistakes.push(m.clone());
            }
        }
        self.mistakes = mistakes;
    }
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Transient per-issue pipeline state threaded through the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuePipelineState {
    pub thread_id: String,
    pub issue: Issue,
    pub rebuild_attempts: u32,
    pub subtasks: Vec<Subtask>,
    pub planner_score: f64,
    pub needs_human: bool,
    /// Set by the HITL gate when a human rejects the plan and the rebuild
    /// cap isn't yet exhausted; consumed by the routing edge out of
    /// `hitl_gate` to send the state back to `planner`, then cleared.
    pub hitl_rejected: bool,
    pub deployment_document: Option<DeploymentDocument>,
    pub generated_files: GeneratedFileSet,
    pub review: Option<ReviewResult>,
    pub pr_url: Option<String>,
    pub tokens_used: u64,
    pub agent_tokens: HashMap<String, u64>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
}

impl IssuePipelineState {
    pub fn new(issue: Issue) -> Self {
        Self {
            thread_id: uuid::Uuid::new_v4().to_string(),
            issue,
            rebuild_attempts: 0,
            subtasks: Vec::new(),
            planner_score: 0.0,
            needs_human: false,
            hitl_rejected: false,
            deployment_document: None,
            generated_files: GeneratedFileSet::new(),
            review: None,
            pr_url: None,
            tokens_used: 0,
            agent_tokens: HashMap::new(),
            error: None,
            error_kind: None,
        }
    }

    /// Token-conservation invariant: `tokens_used == sum(agent_tokens)`.
    pub fn add_tokens(&mut self, agent: &str, tokens: u64) {
        self.tokens_used += tokens;
        *self.agent_tokens.entry(agent.to_string()).or_insert(0) += tokens;
    }

    pub fn tokens_conserved(&self) -> bool {
        self.agent_tokens.values().sum::<u64>() == self.tokens_used
    }

    pub fn fail(&mut self, err: &crate::error::Error) {
        self.error_kind = Some(err.kind().to_string());
        self.error = Some(err.to_string());
    }
}

impl crate::state::MergeableState for IssuePipelineState {
    fn merge(&mut self, other: &Self) {
        *self = other.clone();
    }
}

/// Status of an activity event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Info,
    Starting,
    Success,
    Warning,
    Error,
}

/// One record in the bounded, newest-first activity ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    pub action: String,
    pub details: String,
    pub status: ActivityStatus,
    pub issue_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ActivityEvent {
    pub fn new(
        agent: impl Into<String>,
        action: impl Into<String>,
        details: impl Into<String>,
        status: ActivityStatus,
        issue_id: impl Into<String>,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            agent: agent.into(),
            action: action.into(),
            details: details.into(),
            status,
            issue_id: issue_id.into(),
            payload: serde_json::Value::Null,
        }
    }
}

/// Per-agent counters folded into a [`DailyMetrics`] document.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AgentActivity {
    pub task_completed: u64,
    pub llm_model_used: String,
    pub tokens_used: u64,
}

/// Per-calendar-day aggregate. Quality score is tracked as running
/// sum/count so `upsert_daily` averaging is exact and idempotent against
/// zero deltas.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DailyMetrics {
    pub date: String,
    pub tasks_completed: u64,
    pub pull_requests_created: u64,
    pub tokens_consumed: u64,
    pub total_quality_score: f64,
    pub num_scores: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub agent_activities: BTreeMap<String, AgentActivity>,
    pub last_updated: DateTime<Utc>,
}

impl DailyMetrics {
    pub fn new(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            last_updated: Utc::now(),
            ..Default::default()
        }
    }

    pub fn code_quality_mean(&self) -> f64 {
        if self.num_scores == 0 {
            0.0
        } else {
            self.total_quality_score / self.num_scores as f64
        }
    }
}

/// An additive delta applied to a [`DailyMetrics`] document by
/// `upsert_daily`. All fields default to zero/empty so applying a
/// zero-delta is a strict no-op beyond bumping `last_updated`.
#[derive(Debug, Clone, Default)]
pub struct DailyMetricsDelta {
    pub tasks_completed: u64,
    pub pull_requests_created: u64,
    pub tokens_consumed: u64,
    pub quality_score: Option<f64>,
    pub success_count: u64,
    pub failure_count: u64,
    pub agent: Option<(String, AgentActivity)>,
}

impl DailyMetrics {
    pub fn apply(&mut self, delta: &DailyMetricsDelta) {
        self.tasks_completed += delta.tasks_completed;
        self.pull_requests_created += delta.pull_requests_created;
        self.tokens_consumed += delta.tokens_consumed;
        if let Some(score) = delta.quality_score {
            self.total_quality_score += score;
            self.num_scores += 1;
        }
        self.success_count += delta.success_count;
        self.failure_count += delta.failure_count;
        if let Some((agent, activity)) = &delta.agent {
            let entry = self.agent_activities.entry(agent.clone()).or_default();
            entry.task_completed += activity.task_completed;
            entry.tokens_used += activity.tokens_used;
            if !activity.llm_model_used.is_empty() {
                entry.llm_model_used = activity.llm_model_used.clone();
            }
        }
        self.last_updated = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_from_nodes_orders_by_id_and_links_adjacent() {
        let nodes = vec![
            Subtask {
                id: 2,
                description: "b".into(),
                priority: 1,
                requirements_covered: vec![],
                reasoning: String::new(),
                score: 5.0,
                score_reasoning: String::new(),
            },
            Subtask {
                id: 1,
                description: "a".into(),
                priority: 1,
                requirements_covered: vec![],
                reasoning: String::new(),
                score: 5.0,
                score_reasoning: String::new(),
            },
        ];
        let graph = SubtaskGraph::chain_from_nodes(nodes);
        assert_eq!(graph.nodes[0].id, 1);
        assert_eq!(graph.edges, vec![(1, 2)]);
    }

    #[test]
    fn sanitize_edges_drops_self_loops_and_unknown_endpoints() {
        let mut graph = SubtaskGraph {
            nodes: vec![Subtask {
                id: 1,
                description: String::new(),
                priority: 1,
                requirements_covered: vec![],
                reasoning: String::new(),
                score: 0.0,
                score_reasoning: String::new(),
            }],
            edges: vec![(1, 1), (1, 99)],
        };
        graph.sanitize_edges();
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn review_aggregate_matches_weight_formula() {
        let mut review = ReviewResult {
            completeness: DimensionResult {
                score: 90.0,
                ..Default::default()
            },
            security: DimensionResult {
                score: 80.0,
                ..Default::default()
            },
            standards: DimensionResult {
                score: 70.0,
                ..Default::default()
            },
            ..Default::default()
        };
        review.aggregate(70.0);
        assert_eq!(review.overall, 82.0);
        assert!(review.approved);
    }

    #[test]
    fn daily_metrics_zero_delta_is_noop_besides_timestamp() {
        let mut metrics = DailyMetrics::new("2026-08-01");
        metrics.tasks_completed = 3;
        let before = metrics.clone();
        metrics.apply(&DailyMetricsDelta::default());
        assert_eq!(metrics.tasks_completed, before.tasks_completed);
        assert_eq!(metrics.pull_requests_created, before.pull_requests_created);
        assert_eq!(metrics.tokens_consumed, before.tokens_consumed);
        assert_eq!(metrics.num_scores, before.num_scores);
    }
}
