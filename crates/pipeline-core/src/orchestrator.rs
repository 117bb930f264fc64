//! Wires the planner/assembler/developer/reviewer subgraphs into one
//! per-issue [`StateGraph`], and drives the outer fetch/iterate/quality-scan
//! loop around it. See `SPEC_FULL.md` §4.8.

use crate::assembler::Assembler;
use crate::config::Config;
use crate::developer::Developer;
use crate::domain::{
    ActivityEvent, ActivityStatus, DailyMetricsDelta, Issue, IssuePipelineState,
};
use crate::error::{Error, Result};
use crate::graph::{CompiledGraph, StateGraph, END};
use crate::hitl::{HitlGate, HitlHandler, HitlOutcome, PlanApprovalRequest, PlanDecision};
use crate::memory::Memory;
use crate::node::NamedFn;
use crate::planner::Planner;
use crate::ports::{CodeQualityPort, DocRendererPort, MetricsPort, SourceRepoPort, StaticLintPort, WorkTrackerPort};
use crate::prompt::PromptRegistry;
use crate::reviewer::Reviewer;
use crate::telemetry::Telemetry;
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Every external collaborator and ambient service the per-issue graph's
/// nodes close over. Constructed once at startup and cloned (as `Arc`s)
/// into each node closure.
pub struct Orchestrator {
    llm: Arc<dyn crate::llm::LlmPort>,
    tracker: Arc<dyn WorkTrackerPort>,
    repo: Arc<dyn SourceRepoPort>,
    lint: Arc<dyn StaticLintPort>,
    quality: Arc<dyn CodeQualityPort>,
    metrics: Arc<dyn MetricsPort>,
    renderer: Arc<dyn DocRendererPort>,
    prompts: Arc<PromptRegistry>,
    memory: Arc<Memory>,
    telemetry: Arc<Telemetry>,
    config: Arc<Config>,
    hitl: HitlGate,
    /// HITL gate requests use this token rather than the per-`invoke` one
    /// passed by the caller, since [`CompiledGraph::invoke`] only checks
    /// cancellation at node boundaries and does not thread a token into
    /// node bodies. Cancelling it aborts any in-flight approval wait.
    hitl_cancel: CancellationToken,
}

#[allow(clippy::too_many_arguments)]
pub struct OrchestratorPorts {
    pub llm: Arc<dyn crate::llm::LlmPort>,
    pub tracker: Arc<dyn WorkTrackerPort>,
    pub repo: Arc<dyn SourceRepoPort>,
    pub lint: Arc<dyn StaticLintPort>,
    pub quality: Arc<dyn CodeQualityPort>,
    pub metrics: Arc<dyn MetricsPort>,
    pub renderer: Arc<dyn DocRendererPort>,
}

impl Orchestrator {
    pub fn new(
        ports: OrchestratorPorts,
        prompts: PromptRegistry,
        config: Config,
    ) -> (Self, HitlHandler) {
        let (hitl, handler) = HitlGate::new(config.hitl_timeout);
        let orchestrator = Self {
            llm: ports.llm,
            tracker: ports.tracker,
            repo: ports.repo,
            lint: ports.lint,
            quality: ports.quality,
            metrics: ports.metrics,
            renderer: ports.renderer,
            prompts: Arc::new(prompts),
            memory: Arc::new(Memory::new()),
            telemetry: Arc::new(Telemetry::new()),
            config: Arc::new(config),
            hitl,
            hitl_cancel: CancellationToken::new(),
        };
        (orchestrator, handler)
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn memory(&self) -> Arc<Memory> {
        self.memory.clone()
    }

    pub fn metrics(&self) -> Arc<dyn MetricsPort> {
        self.metrics.clone()
    }

    /// Cancels any HITL gate wait currently in flight. Routed predicates
    /// treat a cancelled wait the same as a timeout: fail-open.
    pub fn cancel_pending_approvals(&self) {
        self.hitl_cancel.cancel();
    }

    /// Fetches the tracker's todo list for `project`, runs each issue
    /// through the per-issue graph in order, then performs the single
    /// post-loop code quality scan.
    pub async fn run_all(&self, project: &str, cancel: &CancellationToken) -> Result<Vec<IssuePipelineState>> {
        let issues = self.tracker.list_todo(project).await?;
        let mut results = Vec::with_capacity(issues.len());

        for issue in issues {
            if cancel.is_cancelled() {
                break;
            }
            let key = issue.key.clone();
            self.telemetry.record(ActivityEvent::new(
                "orchestrator",
                "start_issue",
                format!("starting {key}"),
                ActivityStatus::Starting,
                &key,
            ));
            let state = self.run_issue(issue, cancel).await?;
            self.telemetry.issue_processed();
            if let Some(err_kind) = &state.error_kind {
                self.telemetry.record(ActivityEvent::new(
                    "orchestrator",
                    "issue_failed",
                    state.error.clone().unwrap_or_default(),
                    ActivityStatus::Error,
                    &key,
                ));
                tracing::warn!(issue = %key, kind = err_kind, "issue pipeline ended in error");
            } else {
                self.telemetry.record(ActivityEvent::new(
                    "orchestrator",
                    "issue_done",
                    state.pr_url.clone().unwrap_or_default(),
                    ActivityStatus::Success,
                    &key,
                ));
            }
            results.push(state);
        }

        self.telemetry.workflow_executed();
        if let Err(e) = self.run_quality_scan(project).await {
            tracing::warn!(error = %e, "post-run quality scan failed");
        }

        Ok(results)
    }

    pub async fn run_issue(&self, issue: Issue, cancel: &CancellationToken) -> Result<IssuePipelineState> {
        let graph = self.build_graph()?;
        let state = IssuePipelineState::new(issue);
        graph.invoke(state, cancel).await
    }

    fn build_graph(&self) -> Result<CompiledGraph<IssuePipelineState>> {
        let mut graph = StateGraph::new();

        graph.add_node("planner", self.planner_node());
        graph.add_node("hitl_gate", self.hitl_gate_node());
        graph.add_node("assembler", self.assembler_node());
        graph.add_node("developer", self.developer_node());
        graph.add_node("reviewer", self.reviewer_node());
        graph.add_node("rebuild_guard", self.rebuild_guard_node());
        graph.add_node("rebuilder", self.rebuilder_node());
        graph.add_node("open_pr", self.open_pr_node());
        graph.add_node("finalize_error", self.finalize_error_node());

        graph.set_entry_point("planner");

        graph.add_conditional_edges(
            "planner",
            |state: &IssuePipelineState| if state.error.is_some() { "finalize_error" } else { "hitl_gate" },
            vec!["finalize_error", "hitl_gate"],
        );
        graph.add_conditional_edges(
            "hitl_gate",
            |state: &IssuePipelineState| {
                if state.error.is_some() {
                    "finalize_error"
                } else if state.hitl_rejected {
                    "planner"
                } else {
                    "assembler"
                }
            },
            vec!["finalize_error", "planner", "assembler"],
        );
        graph.add_conditional_edges(
            "assembler",
            |state: &IssuePipelineState| if state.error.is_some() { "finalize_error" } else { "developer" },
            vec!["finalize_error", "developer"],
        );
        graph.add_conditional_edges(
            "developer",
            |state: &IssuePipelineState| if state.error.is_some() { "finalize_error" } else { "reviewer" },
            vec!["finalize_error", "reviewer"],
        );
        graph.add_edge("reviewer", "rebuild_guard");
        graph.add_conditional_edges(
            "rebuild_guard",
            |state: &IssuePipelineState| {
                if state.error.is_some() {
                    "finalize_error"
                } else if state.review.as_ref().is_some_and(|r| r.approved) {
                    "open_pr"
                } else {
                    "rebuilder"
                }
            },
            vec!["finalize_error", "open_pr", "rebuilder"],
        );
        graph.add_edge("rebuilder", "reviewer");
        graph.add_edge("open_pr", END);
        graph.add_edge("finalize_error", END);

        graph.compile()
    }

    fn planner_node(&self) -> NamedFn<impl Fn(IssuePipelineState) -> futures::future::BoxFuture<'static, Result<IssuePipelineState>>> {
        let llm = self.llm.clone();
        let prompts = self.prompts.clone();
        let model = self.config.planner_model.clone();
        let score_threshold = self.config.score_threshold;
        let telemetry = self.telemetry.clone();

        NamedFn::new("planner", move |mut state: IssuePipelineState| {
            let llm = llm.clone();
            let prompts = prompts.clone();
            let model = model.clone();
            let telemetry = telemetry.clone();
            Box::pin(async move {
                let planner = Planner {
                    llm: llm.as_ref(),
                    prompts: prompts.as_ref(),
                    model,
                };
                match planner.plan(&state.issue).await {
                    Ok(output) => {
                        state.add_tokens("planner", output.tokens_used);
                        telemetry.add_tokens("planner", output.tokens_used);
                        state.subtasks = output.subtasks;
                        state.planner_score = output.overall_score;
                        state.needs_human = output.overall_score < score_threshold;
                    }
                    Err(e) => state.fail(&e),
                }
                Ok(state)
            }) as futures::future::BoxFuture<'static, Result<IssuePipelineState>>
        })
    }

    fn hitl_gate_node(&self) -> NamedFn<impl Fn(IssuePipelineState) -> futures::future::BoxFuture<'static, Result<IssuePipelineState>>> {
        let hitl = self.hitl.clone();
        let hitl_cancel = self.hitl_cancel.clone();
        let telemetry = self.telemetry.clone();
        let max_rebuild_attempts = self.config.max_rebuild_attempts;

        NamedFn::new("hitl_gate", move |mut state: IssuePipelineState| {
            let hitl = hitl.clone();
            let hitl_cancel = hitl_cancel.clone();
            let telemetry = telemetry.clone();
            Box::pin(async move {
                state.hitl_rejected = false;
                // Only genuinely uncertain plans (below the score threshold)
                // are sent to a human; a confident plan proceeds straight
                // through, per the HITL design's "gate, don't bottleneck".
                if !state.needs_human {
                    return Ok(state);
                }
                let request = PlanApprovalRequest {
                    issue_key: state.issue.key.clone(),
                    subtasks: state.subtasks.clone(),
                    overall_score: state.planner_score,
                    request_id: uuid::Uuid::new_v4().to_string(),
                };
                match hitl.request(request, &hitl_cancel).await {
                    HitlOutcome::Decided(PlanDecision::Reject) => {
                        if state.rebuild_attempts >= max_rebuild_attempts {
                            state.fail(&Error::HumanRejected);
                        } else {
                            state.rebuild_attempts += 1;
                            state.hitl_rejected = true;
                            telemetry.rebuild_cycle();
                            telemetry.record(ActivityEvent::new(
                                "hitl_gate",
                                "plan_rejected",
                                format!(
                                    "human rejected the plan, replanning (attempt {} of {})",
                                    state.rebuild_attempts, max_rebuild_attempts
                                ),
                                ActivityStatus::Warning,
                                &state.issue.key,
                            ));
                        }
                    }
                    HitlOutcome::Decided(PlanDecision::Approve) => {}
                    HitlOutcome::TimedOut | HitlOutcome::Cancelled => {
                        tracing::info!(issue = %state.issue.key, "HITL gate fail-open: no decision received in time");
                        telemetry.record(ActivityEvent::new(
                            "hitl_gate",
                            "HITL auto-approve",
                            format!("no human decision within timeout, score {}", state.planner_score),
                            ActivityStatus::Info,
                            &state.issue.key,
                        ));
                    }
                }
                Ok(state)
            }) as futures::future::BoxFuture<'static, Result<IssuePipelineState>>
        })
    }

    fn assembler_node(&self) -> NamedFn<impl Fn(IssuePipelineState) -> futures::future::BoxFuture<'static, Result<IssuePipelineState>>> {
        let llm = self.llm.clone();
        let prompts = self.prompts.clone();
        let renderer = self.renderer.clone();
        let model = self.config.assembler_model.clone();
        let telemetry = self.telemetry.clone();

        NamedFn::new("assembler", move |mut state: IssuePipelineState| {
            let llm = llm.clone();
            let prompts = prompts.clone();
            let renderer = renderer.clone();
            let model = model.clone();
            let telemetry = telemetry.clone();
            Box::pin(async move {
                let assembler = Assembler {
                    llm: llm.as_ref(),
                    prompts: prompts.as_ref(),
                    renderer: renderer.as_ref(),
                    model,
                };
                match assembler.assemble(&state.issue, &state.subtasks).await {
                    Ok(output) => {
                        state.add_tokens("assembler", output.tokens_used);
                        telemetry.add_tokens("assembler", output.tokens_used);
                        state.deployment_document = Some(output.document);
                    }
                    Err(e) => state.fail(&e),
                }
                Ok(state)
            }) as futures::future::BoxFuture<'static, Result<IssuePipelineState>>
        })
    }

    fn developer_node(&self) -> NamedFn<impl Fn(IssuePipelineState) -> futures::future::BoxFuture<'static, Result<IssuePipelineState>>> {
        let llm = self.llm.clone();
        let prompts = self.prompts.clone();
        let memory = self.memory.clone();
        let model = self.config.developer_model.clone();
        let parallelism = self.config.dev_parallelism;
        let telemetry = self.telemetry.clone();

        NamedFn::new("developer", move |mut state: IssuePipelineState| {
            let llm = llm.clone();
            let prompts = prompts.clone();
            let memory = memory.clone();
            let model = model.clone();
            let telemetry = telemetry.clone();
            Box::pin(async move {
                let Some(document) = state.deployment_document.clone() else {
                    state.fail(&Error::GenerationFailed("no deployment document".to_string()));
                    return Ok(state);
                };
                let developer = Developer {
                    llm: llm.as_ref(),
                    prompts: prompts.as_ref(),
                    memory: memory.as_ref(),
                    parallelism,
                    model,
                };
                match developer.generate(&state.issue.key, &state.issue.title, &document).await {
                    Ok(output) => {
                        state.add_tokens("developer", output.tokens_used);
                        telemetry.add_tokens("developer", output.tokens_used);
                        state.generated_files = output.files;
                    }
                    Err(e) => state.fail(&e),
                }
                Ok(state)
            }) as futures::future::BoxFuture<'static, Result<IssuePipelineState>>
        })
    }

    fn reviewer_node(&self) -> NamedFn<impl Fn(IssuePipelineState) -> futures::future::BoxFuture<'static, Result<IssuePipelineState>>> {
        let llm = self.llm.clone();
        let prompts = self.prompts.clone();
        let lint = self.lint.clone();
        let metrics = self.metrics.clone();
        let model = self.config.reviewer_model.clone();
        let threshold = self.config.review_threshold;
        let telemetry = self.telemetry.clone();

        NamedFn::new("reviewer", move |mut state: IssuePipelineState| {
            let llm = llm.clone();
            let prompts = prompts.clone();
            let lint = lint.clone();
            let metrics = metrics.clone();
            let model = model.clone();
            let telemetry = telemetry.clone();
            Box::pin(async move {
                let reviewer = Reviewer {
                    llm: llm.as_ref(),
                    prompts: prompts.as_ref(),
                    lint: lint.as_ref(),
                    metrics: metrics.as_ref(),
                    threshold,
                    model,
                };
                let iteration = state.rebuild_attempts + 1;
                match reviewer.review(&state.issue.key, &state.generated_files, iteration).await {
                    Ok(review) => {
                        state.add_tokens("reviewer", review.tokens_used);
                        telemetry.add_tokens("reviewer", review.tokens_used);
                        if review.approved {
                            telemetry.review_succeeded();
                        }
                        state.review = Some(review);
                    }
                    Err(e) => state.fail(&e),
                }
                Ok(state)
            }) as futures::future::BoxFuture<'static, Result<IssuePipelineState>>
        })
    }

    fn rebuild_guard_node(&self) -> NamedFn<impl Fn(IssuePipelineState) -> futures::future::BoxFuture<'static, Result<IssuePipelineState>>> {
        let max_rebuild_attempts = self.config.max_rebuild_attempts;

        NamedFn::new("rebuild_guard", move |mut state: IssuePipelineState| {
            Box::pin(async move {
                let approved = state.review.as_ref().is_some_and(|r| r.approved);
                if !approved && state.rebuild_attempts >= max_rebuild_attempts {
                    state.fail(&Error::RebuildExhausted {
                        attempts: state.rebuild_attempts,
                    });
                }
                Ok(state)
            }) as futures::future::BoxFuture<'static, Result<IssuePipelineState>>
        })
    }

    fn rebuilder_node(&self) -> NamedFn<impl Fn(IssuePipelineState) -> futures::future::BoxFuture<'static, Result<IssuePipelineState>>> {
        let llm = self.llm.clone();
        let prompts = self.prompts.clone();
        let memory = self.memory.clone();
        let model = self.config.developer_model.clone();
        let parallelism = self.config.dev_parallelism;
        let telemetry = self.telemetry.clone();

        NamedFn::new("rebuilder", move |mut state: IssuePipelineState| {
            let llm = llm.clone();
            let prompts = prompts.clone();
            let memory = memory.clone();
            let model = model.clone();
            let telemetry = telemetry.clone();
            Box::pin(async move {
                let mistakes = state.review.as_ref().map(|r| r.mistakes.clone()).unwrap_or_default();
                let developer = Developer {
                    llm: llm.as_ref(),
                    prompts: prompts.as_ref(),
                    memory: memory.as_ref(),
                    parallelism,
                    model,
                };
                match developer.correct(&state.issue.key, &state.generated_files, &mistakes).await {
                    Ok(output) => {
                        state.add_tokens("rebuilder", output.tokens_used);
                        telemetry.add_tokens("rebuilder", output.tokens_used);
                        state.generated_files = output.files;
                        state.rebuild_attempts += 1;
                        telemetry.rebuild_cycle();
                    }
                    Err(e) => state.fail(&e),
                }
                Ok(state)
            }) as futures::future::BoxFuture<'static, Result<IssuePipelineState>>
        })
    }

    fn open_pr_node(&self) -> NamedFn<impl Fn(IssuePipelineState) -> futures::future::BoxFuture<'static, Result<IssuePipelineState>>> {
        let repo = self.repo.clone();
        let tracker = self.tracker.clone();
        let renderer = self.renderer.clone();
        let branch_name = self.config.review_branch_name.clone();
        let telemetry = self.telemetry.clone();

        NamedFn::new("open_pr", move |mut state: IssuePipelineState| {
            let repo = repo.clone();
            let tracker = tracker.clone();
            let renderer = renderer.clone();
            let branch_name = branch_name.clone();
            let telemetry = telemetry.clone();
            Box::pin(async move {
                // A failed PR is reported but never fails the issue's
                // pipeline outcome: the generated/reviewed code still
                // exists and is worth keeping even if the repo integration
                // hiccups.
                match open_pr(&*repo, &*renderer, &branch_name, &state).await {
                    Ok(url) => {
                        state.pr_url = Some(url);
                        telemetry.pr_created();
                        if let Err(e) = tracker.transition(&state.issue.key, "done").await {
                            tracing::warn!(issue = %state.issue.key, error = %e, "issue transition failed");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(issue = %state.issue.key, error = %e, "opening pull request failed");
                    }
                }
                Ok(state)
            }) as futures::future::BoxFuture<'static, Result<IssuePipelineState>>
        })
    }

    fn finalize_error_node(&self) -> NamedFn<impl Fn(IssuePipelineState) -> futures::future::BoxFuture<'static, Result<IssuePipelineState>>> {
        let telemetry = self.telemetry.clone();
        NamedFn::new("finalize_error", move |state: IssuePipelineState| {
            let telemetry = telemetry.clone();
            Box::pin(async move {
                telemetry.task_failed();
                Ok(state)
            }) as futures::future::BoxFuture<'static, Result<IssuePipelineState>>
        })
    }

    /// Reads aggregate measures from the configured [`CodeQualityPort`] and
    /// folds a single score into today's [`crate::domain::DailyMetrics`],
    /// run once after the last issue in a batch rather than per-issue.
    async fn run_quality_scan(&self, project: &str) -> Result<()> {
        let measures = self.quality.measures(project).await?;
        let rating_component = |r: f64| (6.0 - r).max(0.0) * 20.0;
        let mean_ratings = (rating_component(measures.sqale_rating)
            + rating_component(measures.reliability_rating)
            + rating_component(measures.security_rating))
            / 3.0;
        let gate_score = if measures.gate_status.eq_ignore_ascii_case("OK") {
            100.0
        } else if measures.gate_status.eq_ignore_ascii_case("WARN") {
            70.0
        } else {
            0.0
        };
        let coverage_component = measures.coverage.clamp(0.0, 100.0);
        let issue_penalty = (10.0 * measures.bugs
            + 15.0 * measures.vulnerabilities
            + 2.0 * measures.code_smells
            + 5.0 * measures.security_hotspots)
            .min(50.0);
        let duplication_penalty = measures.duplicated_lines_density.min(20.0);

        let raw = 0.5 * mean_ratings + 0.3 * gate_score + 0.2 * coverage_component
            - issue_penalty
            - duplication_penalty;
        let score = crate::domain::round1(raw.clamp(0.0, 100.0));

        self.telemetry.quality_score(score);
        let today = Utc::now().format("%Y-%m-%d").to_string();
        self.metrics
            .upsert_daily(
                &today,
                DailyMetricsDelta {
                    quality_score: Some(score),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }
}

fn pr_title(state: &IssuePipelineState) -> String {
    let files: Vec<&str> = state.generated_files.keys().map(|s| s.as_str()).collect();
    format!("Code for {}: {}", state.issue.key, files.join(", "))
}

async fn open_pr(
    repo: &dyn SourceRepoPort,
    renderer: &dyn DocRendererPort,
    branch_name: &str,
    state: &IssuePipelineState,
) -> Result<String> {
    let branch = format!("{branch_name}/{}", state.issue.key.to_lowercase());
    repo.ensure_branch(&branch).await?;
    for (path, content) in &state.generated_files {
        repo.put_file(&branch, path, content).await?;
    }
    if let Some(document) = &state.deployment_document {
        repo.put_file(&branch, "DEPLOYMENT.md", &renderer.render_markdown(document))
            .await?;
    }
    let title = pr_title(state);
    repo.upsert_pr(&branch, "main", &title, "automated pipeline run").await
}
