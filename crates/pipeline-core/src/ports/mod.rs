//! Capability interfaces for every external collaborator named in the
//! spec's external-interfaces section. `pipeline-anthropic`, `pipeline-jira`
//! and `pipeline-github` provide the adapters for [`crate::llm::LlmPort`],
//! [`WorkTrackerPort`] and [`SourceRepoPort`] respectively; the remaining
//! ports (static lint, code quality, metrics, doc rendering) are pure
//! capability interfaces with a default in-tree implementation since the
//! spec names no mandated external product for them.

pub mod fs_metrics;
pub mod markdown;
pub mod noop_lint;
pub mod noop_quality;

use crate::domain::{DailyMetrics, DailyMetricsDelta, Issue, ReviewResult};
use crate::error::Result;
use async_trait::async_trait;

/// `list_todo(project) -> [Issue]`; `transition(key, transition_name) ->
/// ok|err`.
#[async_trait]
pub trait WorkTrackerPort: Send + Sync {
    async fn list_todo(&self, project: &str) -> Result<Vec<Issue>>;
    async fn transition(&self, key: &str, transition_name: &str) -> Result<()>;
}

/// `ensure_branch(name)`, `put_file(branch, path, content)`,
/// `upsert_pr(branch, base, title, body) -> url`.
#[async_trait]
pub trait SourceRepoPort: Send + Sync {
    async fn ensure_branch(&self, name: &str) -> Result<()>;
    async fn put_file(&self, branch: &str, path: &str, content: &str) -> Result<()>;
    async fn upsert_pr(&self, branch: &str, base: &str, title: &str, body: &str) -> Result<String>;
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct LintFinding {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub severity: String,
    pub message: String,
    pub symbol: String,
    pub message_id: String,
}

/// `lint(files) -> [finding]`.
#[async_trait]
pub trait StaticLintPort: Send + Sync {
    async fn lint(&self, files: &crate::domain::GeneratedFileSet) -> Result<Vec<LintFinding>>;
}

#[derive(Debug, Clone, Default)]
pub struct PrSummary {
    pub key: String,
    pub title: String,
    pub branch: String,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct QualityMeasures {
    pub sqale_rating: f64,
    pub reliability_rating: f64,
    pub security_rating: f64,
    pub gate_status: String,
    pub coverage: f64,
    pub bugs: f64,
    pub vulnerabilities: f64,
    pub code_smells: f64,
    pub security_hotspots: f64,
    pub duplicated_lines_density: f64,
}

/// `latest_pr()`, `issues(pr_key)`, `measures(project, metric_keys)`,
/// `pr_files(pr_key)`.
#[async_trait]
pub trait CodeQualityPort: Send + Sync {
    async fn latest_pr(&self) -> Result<Option<PrSummary>>;
    async fn measures(&self, project: &str) -> Result<QualityMeasures>;
}

/// Per-agent roll-up surfaced by the control API's agents summary endpoint.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AgentSummary {
    pub agent: String,
    pub tasks: u64,
    pub tokens: u64,
    pub success_rate: f64,
    pub model: String,
}

/// `record_review(document)`; `upsert_daily(date, deltas)`;
/// `get_last_7_days()`; `get_agents_summary()`.
#[async_trait]
pub trait MetricsPort: Send + Sync {
    async fn record_review(&self, review: &ReviewResult) -> Result<()>;
    async fn upsert_daily(&self, date: &str, delta: DailyMetricsDelta) -> Result<DailyMetrics>;
    async fn get_last_7_days(&self) -> Result<Vec<DailyMetrics>>;
    async fn get_agents_summary(&self) -> Result<Vec<AgentSummary>>;
}

/// Renders a [`crate::domain::DeploymentDocument`] to markdown. A pure
/// function wrapped in a trait so the assembler can treat "second LLM call"
/// and "deterministic formatter" (spec §4.5) as interchangeable strategies.
pub trait DocRendererPort: Send + Sync {
    fn render_markdown(&self, document: &crate::domain::DeploymentDocument) -> String;
}
