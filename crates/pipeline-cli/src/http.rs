//! Control surface: `axum` router exposing status, stats, activity and
//! automation start/stop over HTTP, all JSON, permissive CORS.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use pipeline_core::orchestrator::Orchestrator;
use pipeline_core::ports::MetricsPort;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub project: String,
    pub running: AtomicBool,
    pub cancel: Mutex<CancellationToken>,
    pub session: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, project: String) -> Self {
        Self {
            orchestrator,
            project,
            running: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
            session: Mutex::new(None),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/stats", get(stats))
        .route("/api/activity", get(activity))
        .route("/api/health", get(health))
        .route("/api/config", get(config))
        .route("/api/env", get(env))
        .route("/api/env/update", post(update_env))
        .route("/api/performance-data", get(performance_data))
        .route("/api/performance/realtime", get(performance_realtime))
        .route("/api/performance/agents", get(performance_agents))
        .route("/api/start-automation", post(start_automation))
        .route("/api/stop-automation", post(stop_automation))
        .route("/api/reset-stats", post(reset_stats))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "running": state.running.load(Ordering::SeqCst),
        "project": state.project,
    }))
}

async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let counters = state.orchestrator.telemetry().counters();
    Json(json!({
        "workflows_executed": counters.workflows_executed,
        "issues_processed": counters.issues_processed,
        "code_prs_created": counters.code_prs_created,
        "tokens_total": counters.tokens_total,
        "tokens_by_agent": counters.tokens_by_agent,
        "rebuild_cycles": counters.rebuild_cycles,
        "successful_reviews": counters.successful_reviews,
        "errors": counters.errors,
        "tasks_failed": counters.tasks_failed,
        "average_quality_score": counters.average_quality_score(),
    }))
}

async fn activity(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.orchestrator.telemetry().activity())
}

async fn config() -> impl IntoResponse {
    Json(pipeline_core::config::Config::from_env())
}

#[derive(Serialize)]
struct EnvVar {
    key: String,
    value: String,
}

const TRACKED_ENV_KEYS: &[&str] = &[
    "MAX_REBUILD_ATTEMPTS",
    "REVIEW_THRESHOLD",
    "SCORE_THRESHOLD",
    "HITL_TIMEOUT_SECONDS",
    "DEV_PARALLELISM",
    "REVIEW_BRANCH_NAME",
    "PLANNER_MODEL",
    "ASSEMBLER_MODEL",
    "DEVELOPER_MODEL",
    "REVIEWER_MODEL",
];

async fn env() -> impl IntoResponse {
    let vars: Vec<EnvVar> = TRACKED_ENV_KEYS
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|value| EnvVar { key: key.to_string(), value }))
        .collect();
    Json(vars)
}

/// Sets process environment variables for the tracked, non-secret config
/// keys. Only affects [`pipeline_core::config::Config`] instances built
/// after this call returns — the running orchestrator's config is fixed at
/// startup, matching the "config requires no locking" design.
async fn update_env(Json(updates): Json<std::collections::BTreeMap<String, String>>) -> impl IntoResponse {
    let mut applied = Vec::new();
    for (key, value) in updates {
        if TRACKED_ENV_KEYS.contains(&key.as_str()) {
            std::env::set_var(&key, &value);
            applied.push(key);
        }
    }
    Json(json!({"applied": applied}))
}

async fn performance_data(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.orchestrator.metrics().get_last_7_days().await {
        Ok(days) => Json(days).into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

async fn performance_realtime(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let counters = state.orchestrator.telemetry().counters();
    Json(json!({
        "tokens_total": counters.tokens_total,
        "errors": counters.errors,
        "average_quality_score": counters.average_quality_score(),
    }))
}

async fn performance_agents(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.orchestrator.metrics().get_agents_summary().await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

async fn start_automation(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state
        .running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Json(json!({"status": "already running"}));
    }

    let token = CancellationToken::new();
    *state.cancel.lock().await = token.clone();

    let orchestrator = state.orchestrator.clone();
    let project = state.project.clone();
    let running_flag = state.clone();
    let handle = tokio::spawn(async move {
        if let Err(e) = orchestrator.run_all(&project, &token).await {
            tracing::error!(error = %e, "automation session failed");
        }
        running_flag.running.store(false, Ordering::SeqCst);
    });
    *state.session.lock().await = Some(handle);

    Json(json!({"status": "started"}))
}

async fn stop_automation(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if !state.running.load(Ordering::SeqCst) {
        return Json(json!({"status": "not running"}));
    }

    state.cancel.lock().await.cancel();
    state.orchestrator.cancel_pending_approvals();

    let handle = state.session.lock().await.take();
    if let Some(handle) = handle {
        if tokio::time::timeout(STOP_GRACE_PERIOD, handle).await.is_err() {
            tracing::warn!("automation session did not stop within the grace period");
        }
    }
    state.running.store(false, Ordering::SeqCst);

    Json(json!({"status": "stopped"}))
}

async fn reset_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.orchestrator.telemetry().reset();
    Json(json!({"status": "reset"}))
}
