//! End-to-end scenarios driving [`Orchestrator`] and [`Developer`] through
//! the fakes in `test_support`, one test per scenario this system is meant
//! to handle end to end.

use async_trait::async_trait;
use pipeline_core::config::Config;
use pipeline_core::developer::Developer;
use pipeline_core::domain::{DeploymentDocument, FileEntry, FileStructure, Metadata, ProjectOverview};
use pipeline_core::error::Result;
use pipeline_core::llm::{LlmCallOptions, LlmPort, LlmResponse};
use pipeline_core::memory::Memory;
use pipeline_core::orchestrator::{Orchestrator, OrchestratorPorts};
use pipeline_core::ports::fs_metrics::FsMetricsStore;
use pipeline_core::ports::markdown::MarkdownRenderer;
use pipeline_core::ports::noop_lint::NoopLint;
use pipeline_core::ports::{CodeQualityPort, PrSummary, QualityMeasures};
use pipeline_core::prompt::PromptRegistry;
use pipeline_core::test_support::{
    sample_issue, InMemoryLlmPort, InMemoryRepoPort, InMemoryTrackerPort,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct StubQuality;

#[async_trait]
impl CodeQualityPort for StubQuality {
    async fn latest_pr(&self) -> Result<Option<PrSummary>> {
        Ok(None)
    }
    async fn measures(&self, _project: &str) -> Result<QualityMeasures> {
        Ok(QualityMeasures {
            sqale_rating: 1.0,
            reliability_rating: 1.0,
            security_rating: 1.0,
            gate_status: "OK".to_string(),
            coverage: 85.0,
            bugs: 0.0,
            vulnerabilities: 0.0,
            code_smells: 0.0,
            security_hotspots: 0.0,
            duplicated_lines_density: 0.0,
        })
    }
}

/// Minimal set of templates every path exercised below reaches; bodies are
/// never read back as mock output, only staged `InMemoryLlmPort` responses
/// are.
fn registry() -> PromptRegistry {
    let mut r = PromptRegistry::new();
    r.register("planner.method_choice", "choose a method for {{issue_key}}");
    r.register("planner.linear", "plan {{issue_key}} linearly");
    r.register("planner.graph_generate", "decompose {{issue_key}}");
    r.register("planner.graph_score", "score {{subtasks_json}}");
    r.register("planner.graph_merge", "merge {{scored_subtasks_json}}");
    r.register("assembler.generate", "assemble {{issue_key}}");
    r.register("developer.generate", "write {{filename}}");
    r.register("developer.correct", "fix {{filename}}: {{mistakes}}");
    r.register("reviewer.completeness", "review completeness");
    r.register("reviewer.security", "review security");
    r.register("reviewer.standards", "review standards");
    r
}

fn single_file_plan_and_assemble(llm: &InMemoryLlmPort) {
    llm.queue("planner", r#"{"method": "linear"}"#, 5);
    llm.queue(
        "planner",
        r#"[{"id":1,"description":"parse flag","priority":3,"requirements_covered":[1],"reasoning":"r"}]"#,
        10,
    );
    llm.queue(
        "assembler",
        r#"{"project_overview":{"title":"t","description":"d","project_type":"cli","architecture":"a"},
            "implementation_plan":[],
            "file_structure":{"files":[{"filename":"src/cli.rs","type":"rust","description":"d"}],"file_types":["rust"]},
            "technical_specifications":{},"deployment_instructions":[]}"#,
        15,
    );
}

fn queue_approval(llm: &InMemoryLlmPort) {
    llm.queue("reviewer", r#"{"score": 90, "mistakes": [], "reasoning": "ok"}"#, 5);
    llm.queue("reviewer", r#"{"score": 85, "mistakes": [], "reasoning": "ok"}"#, 5);
    llm.queue("reviewer", r#"{"score": 80, "mistakes": [], "reasoning": "ok"}"#, 5);
}

fn build_orchestrator(
    dir: &std::path::Path,
    llm: Arc<InMemoryLlmPort>,
    tracker: Arc<InMemoryTrackerPort>,
    repo: Arc<InMemoryRepoPort>,
    config: Config,
) -> (Orchestrator, pipeline_core::hitl::HitlHandler) {
    let ports = OrchestratorPorts {
        llm,
        tracker,
        repo,
        lint: Arc::new(NoopLint),
        quality: Arc::new(StubQuality),
        metrics: Arc::new(FsMetricsStore::new(dir)),
        renderer: Arc::new(MarkdownRenderer),
    };
    Orchestrator::new(ports, registry(), config)
}

/// Scenario 1: a single simple issue, approved on the first review pass.
#[tokio::test]
async fn single_issue_approved_on_first_try() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(InMemoryLlmPort::default());
    single_file_plan_and_assemble(&llm);
    llm.queue("developer", "fn main() {}", 8);
    queue_approval(&llm);

    let tracker = Arc::new(InMemoryTrackerPort::default());
    tracker.todo.lock().push(sample_issue("DEMO-1"));
    let repo = Arc::new(InMemoryRepoPort::default());

    let mut config = Config::default();
    config.hitl_timeout = std::time::Duration::from_millis(50);
    let (orchestrator, _handler) =
        build_orchestrator(dir.path(), llm, tracker.clone(), repo.clone(), config);

    let cancel = CancellationToken::new();
    let results = orchestrator.run_all("DEMO", &cancel).await.unwrap();

    assert_eq!(results.len(), 1);
    assert!(results[0].error.is_none());
    assert!(results[0].pr_url.is_some());
    assert_eq!(repo.prs.lock().len(), 1);
    assert_eq!(tracker.transitions.lock().len(), 1);

    let counters = orchestrator.telemetry().counters();
    assert_eq!(counters.issues_processed, 1);
    assert_eq!(counters.code_prs_created, 1);
    assert_eq!(counters.rebuild_cycles, 0);
}

/// Scenario 2: two issues, the second needs exactly one rebuild cycle
/// before its review passes.
#[tokio::test]
async fn second_issue_needs_one_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(InMemoryLlmPort::default());

    // Issue 1: clean pass.
    single_file_plan_and_assemble(&llm);
    llm.queue("developer", "fn main() {}", 8);
    queue_approval(&llm);

    // Issue 2: first review rejects (62), rebuild corrects the file, second
    // review approves (82).
    single_file_plan_and_assemble(&llm);
    llm.queue("developer", "fn broken() {}", 8);
    llm.queue("reviewer", r#"{"score": 62, "mistakes": ["missing docs"], "reasoning": "weak"}"#, 5);
    llm.queue("reviewer", r#"{"score": 60, "mistakes": ["missing docs"], "reasoning": "weak"}"#, 5);
    llm.queue("reviewer", r#"{"score": 65, "mistakes": ["missing docs"], "reasoning": "weak"}"#, 5);
    llm.queue("developer", "fn fixed() {}", 6);
    llm.queue("reviewer", r#"{"score": 88, "mistakes": [], "reasoning": "ok"}"#, 5);
    llm.queue("reviewer", r#"{"score": 80, "mistakes": [], "reasoning": "ok"}"#, 5);
    llm.queue("reviewer", r#"{"score": 78, "mistakes": [], "reasoning": "ok"}"#, 5);

    let tracker = Arc::new(InMemoryTrackerPort::default());
    tracker.todo.lock().push(sample_issue("DEMO-1"));
    tracker.todo.lock().push(sample_issue("DEMO-2"));
    let repo = Arc::new(InMemoryRepoPort::default());

    let mut config = Config::default();
    config.hitl_timeout = std::time::Duration::from_millis(50);
    let (orchestrator, _handler) =
        build_orchestrator(dir.path(), llm, tracker.clone(), repo.clone(), config);

    let cancel = CancellationToken::new();
    let results = orchestrator.run_all("DEMO", &cancel).await.unwrap();

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.error.is_none()));
    assert!(results.iter().all(|r| r.pr_url.is_some()));
    assert_eq!(results[0].rebuild_attempts, 0);
    assert_eq!(results[1].rebuild_attempts, 1);

    let counters = orchestrator.telemetry().counters();
    assert_eq!(counters.rebuild_cycles, 1);
    assert_eq!(counters.code_prs_created, 2);
}

/// Scenario 3: the planner's score lands below the human-review threshold
/// and nobody answers the HITL gate in time — the pipeline fails open and
/// records the decision on the activity feed.
#[tokio::test]
async fn hitl_timeout_fails_open_and_is_logged() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(InMemoryLlmPort::default());
    llm.queue("planner", r#"{"method": "graph"}"#, 5);
    llm.queue(
        "planner",
        r#"[{"id":1,"description":"a","priority":3,"requirements_covered":[],"reasoning":"r"},
            {"id":2,"description":"b","priority":3,"requirements_covered":[],"reasoning":"r"}]"#,
        10,
    );
    llm.queue(
        "planner",
        r#"[{"id":1,"score":6.0,"reasoning":"shaky","requirements_covered":[]},
            {"id":2,"score":6.4,"reasoning":"shaky","requirements_covered":[]}]"#,
        10,
    );
    llm.queue(
        "planner",
        r#"[{"id":1,"description":"a+b","priority":3,"requirements_covered":[],"reasoning":"m","covered_subtasks":[1,2]}]"#,
        10,
    );
    llm.queue(
        "assembler",
        r#"{"project_overview":{"title":"t","description":"d","project_type":"cli","architecture":"a"},
            "implementation_plan":[],
            "file_structure":{"files":[{"filename":"src/cli.rs","type":"rust","description":"d"}],"file_types":["rust"]},
            "technical_specifications":{},"deployment_instructions":[]}"#,
        15,
    );
    llm.queue("developer", "fn main() {}", 8);
    queue_approval(&llm);

    let tracker = Arc::new(InMemoryTrackerPort::default());
    let repo = Arc::new(InMemoryRepoPort::default());
    let mut config = Config::default();
    config.hitl_timeout = std::time::Duration::from_millis(30);
    // `_handler` is dropped without calling `recv`, so nobody ever answers.
    let (orchestrator, _handler) = build_orchestrator(dir.path(), llm, tracker, repo, config);

    let cancel = CancellationToken::new();
    let state = orchestrator
        .run_issue(sample_issue("DEMO-1"), &cancel)
        .await
        .unwrap();

    assert!(state.needs_human);
    assert!(state.error.is_none());
    assert!(state.pr_url.is_some());

    let activity = orchestrator.telemetry().activity();
    assert!(activity.iter().any(|e| e.action == "HITL auto-approve"));
}

/// Scenario 4: the reviewer rejects every rebuild attempt until the bound
/// is exhausted — the issue ends in error, with no PR opened.
#[tokio::test]
async fn rebuild_exhaustion_ends_in_error() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(InMemoryLlmPort::default());
    single_file_plan_and_assemble(&llm);
    llm.queue("developer", "fn main() {}", 8);
    // Three review rounds (initial + two rebuilds), every one rejects.
    for _ in 0..3 {
        llm.queue("reviewer", r#"{"score": 20, "mistakes": ["broken"], "reasoning": "no"}"#, 5);
        llm.queue("reviewer", r#"{"score": 20, "mistakes": ["broken"], "reasoning": "no"}"#, 5);
        llm.queue("reviewer", r#"{"score": 20, "mistakes": ["broken"], "reasoning": "no"}"#, 5);
    }
    llm.queue("developer", "fn still_broken() {}", 6);
    llm.queue("developer", "fn still_broken_again() {}", 6);

    let tracker = Arc::new(InMemoryTrackerPort::default());
    let repo = Arc::new(InMemoryRepoPort::default());
    let mut config = Config::default();
    config.max_rebuild_attempts = 2;
    config.hitl_timeout = std::time::Duration::from_millis(50);
    let (orchestrator, _handler) = build_orchestrator(dir.path(), llm, tracker.clone(), repo.clone(), config);

    let cancel = CancellationToken::new();
    let state = orchestrator
        .run_issue(sample_issue("DEMO-1"), &cancel)
        .await
        .unwrap();

    assert_eq!(state.error_kind.as_deref(), Some("RebuildExhausted"));
    assert_eq!(state.rebuild_attempts, 2);
    assert!(state.pr_url.is_none());
    assert!(repo.prs.lock().is_empty());
    assert!(tracker.transitions.lock().is_empty());

    let counters = orchestrator.telemetry().counters();
    assert_eq!(counters.tasks_failed, 1);
}

/// Scenario 5: the scoring stage's model output is unrecoverably malformed.
/// The planner never fails outright — every node falls back to the
/// default score and planning still produces a usable result.
#[tokio::test]
async fn malformed_scoring_output_falls_back_to_default_scores() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(InMemoryLlmPort::default());
    llm.queue("planner", r#"{"method": "graph"}"#, 5);
    llm.queue(
        "planner",
        r#"[{"id":1,"description":"a","priority":3,"requirements_covered":[],"reasoning":"r"},
            {"id":2,"description":"b","priority":3,"requirements_covered":[],"reasoning":"r"}]"#,
        10,
    );
    // Scoring output is truncated mid-object and unrecoverable even after
    // the extractor's repair pass.
    llm.queue("planner", r#"{"id": 1, "score": truncated-garbage-not-json"#, 8);
    llm.queue(
        "planner",
        r#"[{"id":1,"description":"a+b","priority":3,"requirements_covered":[],"reasoning":"m","covered_subtasks":[1,2]}]"#,
        10,
    );

    let prompts = registry();
    let planner = pipeline_core::planner::Planner {
        llm: llm.as_ref(),
        prompts: &prompts,
        model: "test-model".to_string(),
    };
    let output = planner.plan(&sample_issue("DEMO-1")).await.unwrap();

    // Both nodes missed scoring entirely, so both default to 7.5 and the
    // merged subtask's score is exactly that default.
    assert_eq!(output.subtasks[0].score, 7.5);
    assert!(output.overall_score >= Config::default().score_threshold);
}

/// Scenario 6: generating six files at once, bounded to three concurrent
/// calls, still produces exactly six files with conserved token totals.
#[tokio::test]
async fn concurrent_file_generation_respects_parallelism_bound() {
    struct ConcurrencyTrackingLlm {
        in_flight: AtomicUsize,
        max_observed: AtomicUsize,
    }

    #[async_trait]
    impl LlmPort for ConcurrencyTrackingLlm {
        async fn call(
            &self,
            _prompt: &str,
            _agent_name: &str,
            _options: LlmCallOptions,
        ) -> Result<LlmResponse> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_observed.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(LlmResponse {
                text: "fn generated() {}".to_string(),
                tokens_used: 10,
            })
        }
    }

    let llm = ConcurrencyTrackingLlm {
        in_flight: AtomicUsize::new(0),
        max_observed: AtomicUsize::new(0),
    };
    let prompts = registry();
    let memory = Memory::new();

    let files = (1..=6)
        .map(|i| FileEntry {
            filename: format!("src/file_{i}.rs"),
            file_type: "rust".to_string(),
            description: format!("file {i}"),
        })
        .collect();
    let document = DeploymentDocument {
        metadata: Metadata {
            issue_key: "DEMO-1".to_string(),
            version: "1".to_string(),
            timestamp: chrono::Utc::now(),
        },
        project_overview: ProjectOverview {
            title: "t".to_string(),
            description: "d".to_string(),
            project_type: "cli".to_string(),
            architecture: "a".to_string(),
        },
        implementation_plan: vec![],
        file_structure: FileStructure {
            files,
            file_types: vec!["rust".to_string()],
        },
        technical_specifications: BTreeMap::new(),
        deployment_instructions: vec![],
    };

    let developer = Developer {
        llm: &llm,
        prompts: &prompts,
        memory: &memory,
        parallelism: 3,
        model: "test-model".to_string(),
    };
    let output = developer.generate("DEMO-1", "title", &document).await.unwrap();

    assert_eq!(output.files.len(), 6);
    assert_eq!(output.tokens_used, 60);
    assert!(llm.max_observed.load(Ordering::SeqCst) <= 3);
}
