//! In-memory port implementations and fixture builders shared by the unit
//! and integration test suites. Not compiled into release builds.

use crate::domain::{
    DeploymentDocument, FileEntry, FileStructure, Issue, Metadata, Phase, ProjectOverview, Subtask,
    SubtaskGraph,
};
use crate::error::{Error, Result};
use crate::llm::{LlmCallOptions, LlmPort, LlmResponse};
use crate::ports::{CodeQualityPort, LintFinding, PrSummary, QualityMeasures, SourceRepoPort, StaticLintPort, WorkTrackerPort};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};

/// Replays a fixed queue of responses per agent name, falling back to a
/// default response when the queue for that agent is empty. Records every
/// call for assertions.
#[derive(Default)]
pub struct InMemoryLlmPort {
    queued: Mutex<BTreeMap<String, VecDeque<LlmResponse>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl InMemoryLlmPort {
    pub fn queue(&self, agent: impl Into<String>, text: impl Into<String>, tokens_used: u64) {
        self.queued
            .lock()
            .entry(agent.into())
            .or_default()
            .push_back(LlmResponse {
                text: text.into(),
                tokens_used,
            });
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl LlmPort for InMemoryLlmPort {
    async fn call(
        &self,
        prompt: &str,
        agent_name: &str,
        _options: LlmCallOptions,
    ) -> Result<LlmResponse> {
        self.calls
            .lock()
            .push((agent_name.to_string(), prompt.to_string()));
        if let Some(response) = self
            .queued
            .lock()
            .get_mut(agent_name)
            .and_then(|q| q.pop_front())
        {
            return Ok(response);
        }
        Ok(LlmResponse {
            text: "{}".to_string(),
            tokens_used: crate::llm::heuristic_token_count(prompt, "{}"),
        })
    }
}

#[derive(Default)]
pub struct InMemoryTrackerPort {
    pub todo: Mutex<Vec<Issue>>,
    pub transitions: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl WorkTrackerPort for InMemoryTrackerPort {
    async fn list_todo(&self, _project: &str) -> Result<Vec<Issue>> {
        Ok(self.todo.lock().clone())
    }

    async fn transition(&self, key: &str, transition_name: &str) -> Result<()> {
        self.transitions
            .lock()
            .push((key.to_string(), transition_name.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRepoPort {
    pub branches: Mutex<Vec<String>>,
    pub files: Mutex<BTreeMap<(String, String), String>>,
    pub prs: Mutex<Vec<(String, String, String, String)>>,
    pub fail_prs: bool,
}

#[async_trait]
impl SourceRepoPort for InMemoryRepoPort {
    async fn ensure_branch(&self, name: &str) -> Result<()> {
        let mut branches = self.branches.lock();
        if !branches.iter().any(|b| b == name) {
            branches.push(name.to_string());
        }
        Ok(())
    }

    async fn put_file(&self, branch: &str, path: &str, content: &str) -> Result<()> {
        self.files
            .lock()
            .insert((branch.to_string(), path.to_string()), content.to_string());
        Ok(())
    }

    async fn upsert_pr(&self, branch: &str, base: &str, title: &str, body: &str) -> Result<String> {
        if self.fail_prs {
            return Err(Error::RepoUnavailable("simulated PR failure".into()));
        }
        self.prs.lock().push((
            branch.to_string(),
            base.to_string(),
            title.to_string(),
            body.to_string(),
        ));
        Ok(format!("https://example.invalid/pr/{branch}"))
    }
}

/// A [`StaticLintPort`] that returns a fixed set of findings regardless of
/// which files are passed in.
#[derive(Default)]
pub struct InMemoryLintPort {
    pub findings: Mutex<Vec<LintFinding>>,
}

#[async_trait]
impl StaticLintPort for InMemoryLintPort {
    async fn lint(&self, _files: &crate::domain::GeneratedFileSet) -> Result<Vec<LintFinding>> {
        Ok(self.findings.lock().clone())
    }
}

/// A [`CodeQualityPort`] that returns fixed measures regardless of project.
pub struct InMemoryQualityPort {
    pub measures: QualityMeasures,
}

impl Default for InMemoryQualityPort {
    fn default() -> Self {
        Self {
            measures: QualityMeasures {
                sqale_rating: 1.0,
                reliability_rating: 1.0,
                security_rating: 1.0,
                gate_status: "OK".to_string(),
                coverage: 90.0,
                bugs: 0.0,
                vulnerabilities: 0.0,
                code_smells: 0.0,
                security_hotspots: 0.0,
                duplicated_lines_density: 0.0,
            },
        }
    }
}

#[async_trait]
impl CodeQualityPort for InMemoryQualityPort {
    async fn latest_pr(&self) -> Result<Option<PrSummary>> {
        Ok(None)
    }

    async fn measures(&self, _project: &str) -> Result<QualityMeasures> {
        Ok(self.measures.clone())
    }
}

pub fn sample_issue(key: &str) -> Issue {
    let now = chrono::Utc::now();
    Issue {
        key: key.to_string(),
        title: "Add CLI --version flag".to_string(),
        description: "Print the program version when --version is passed".to_string(),
        status: "todo".to_string(),
        priority: "medium".to_string(),
        issue_type: "task".to_string(),
        components: vec![],
        labels: vec![],
        created_at: now,
        updated_at: now,
    }
}

pub fn sample_subtask_graph() -> SubtaskGraph {
    SubtaskGraph::chain_from_nodes(vec![
        Subtask {
            id: 1,
            description: "Parse --version flag in the argument loop".to_string(),
            priority: 3,
            requirements_covered: vec![1],
            reasoning: "entry point for the flag".to_string(),
            score: 8.0,
            score_reasoning: "clear and scoped".to_string(),
        },
        Subtask {
            id: 2,
            description: "Print the crate version and exit".to_string(),
            priority: 3,
            requirements_covered: vec![1],
            reasoning: "satisfies the observable behavior".to_string(),
            score: 8.5,
            score_reasoning: "clear and scoped".to_string(),
        },
    ])
}

pub fn sample_deployment_document(issue_key: &str) -> DeploymentDocument {
    DeploymentDocument {
        metadata: Metadata {
            issue_key: issue_key.to_string(),
            version: "1".to_string(),
            timestamp: chrono::Utc::now(),
        },
        project_overview: ProjectOverview {
            title: "Add CLI --version flag".to_string(),
            description: "Print the program version when --version is passed".to_string(),
            project_type: "cli".to_string(),
            architecture: "single binary".to_string(),
        },
        implementation_plan: vec![Phase {
            name: "Implementation".to_string(),
            tasks: vec!["Parse flag".to_string(), "Print version".to_string()],
        }],
        file_structure: FileStructure {
            files: vec![FileEntry {
                filename: "src/cli.rs".to_string(),
                file_type: "rust".to_string(),
                description: "argument parsing and dispatch".to_string(),
            }],
            file_types: vec!["rust".to_string()],
        },
        technical_specifications: BTreeMap::from([(
            "src/cli.rs".to_string(),
            "Add a `--version` flag that prints `CARGO_PKG_VERSION` and exits 0.".to_string(),
        )]),
        deployment_instructions: vec!["cargo build --release".to_string()],
    }
}
