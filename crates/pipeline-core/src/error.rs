//! Error taxonomy for the pipeline core.
//!
//! Every node sets [`IssuePipelineState::error`](crate::domain::IssuePipelineState::error)
//! on failure instead of unwinding; this enum is what goes in that field and what
//! port adapters convert their own errors into at the trait boundary.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Taxonomy from the error handling design: external-port failures, LLM
/// failures, extractor failures, subgraph-level composites and the
/// orchestrator-level terminals (rebuild exhaustion, human rejection,
/// cancellation).
#[derive(Debug, Error, Clone)]
pub enum Error {
    #[error("work tracker unavailable: {0}")]
    TrackerUnavailable(String),

    #[error("source repository unavailable: {0}")]
    RepoUnavailable(String),

    #[error("code quality service unavailable: {0}")]
    QualityServiceUnavailable(String),

    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    #[error("malformed model output: {preview}")]
    MalformedModelOutput { preview: String },

    #[error("planning failed: {0}")]
    PlanningFailed(String),

    #[error("assembly failed: {0}")]
    AssemblyFailed(String),

    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("review failed: {0}")]
    ReviewFailed(String),

    #[error("rebuild exhausted after {attempts} attempts")]
    RebuildExhausted { attempts: u32 },

    #[error("human reviewer rejected the plan")]
    HumanRejected,

    #[error("cancelled")]
    Cancelled,

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("internal execution error: {0}")]
    InternalExecutionError(String),

    #[error("graph construction error: {0}")]
    GraphError(String),
}

impl Error {
    /// The stable taxonomy tag used in [`crate::domain::ActivityEvent`] payloads
    /// and daily-metrics error counters. Distinct from `Display` so the wire
    /// representation stays stable if the human-readable message changes.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::TrackerUnavailable(_) => "TrackerUnavailable",
            Error::RepoUnavailable(_) => "RepoUnavailable",
            Error::QualityServiceUnavailable(_) => "QualityServiceUnavailable",
            Error::LlmUnavailable(_) => "LLMUnavailable",
            Error::MalformedModelOutput { .. } => "MalformedModelOutput",
            Error::PlanningFailed(_) => "PlanningFailed",
            Error::AssemblyFailed(_) => "AssemblyFailed",
            Error::GenerationFailed(_) => "GenerationFailed",
            Error::ReviewFailed(_) => "ReviewFailed",
            Error::RebuildExhausted { .. } => "RebuildExhausted",
            Error::HumanRejected => "HumanRejected",
            Error::Cancelled => "Cancelled",
            Error::Timeout(_) => "Timeout",
            Error::InternalExecutionError(_) => "InternalExecutionError",
            Error::GraphError(_) => "GraphError",
        }
    }
}
