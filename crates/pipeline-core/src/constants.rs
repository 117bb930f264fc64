//! Centralized defaults, mirrored from the configuration table in the
//! external-interfaces design. Every one of these is overridable through
//! [`crate::config::Config`]; the constants here are only the fallback
//! values used when an environment variable is absent.

use std::time::Duration;

pub const DEFAULT_HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MPSC_CHANNEL_CAPACITY: usize = 16;

/// `HITL_TIMEOUT_SECONDS` default.
pub const DEFAULT_HITL_TIMEOUT: Duration = Duration::from_secs(30);

/// `DEV_PARALLELISM` default.
pub const DEFAULT_DEV_PARALLELISM: usize = 4;

/// `MAX_REBUILD_ATTEMPTS` default.
pub const DEFAULT_MAX_REBUILD_ATTEMPTS: u32 = 3;

/// `REVIEW_THRESHOLD` default (overall review score, 0..=100).
pub const DEFAULT_REVIEW_THRESHOLD: f64 = 70.0;

/// `SCORE_THRESHOLD` default (planner overall score, 0..=10).
pub const DEFAULT_SCORE_THRESHOLD: f64 = 7.0;

/// `REVIEW_BRANCH_NAME` default.
pub const DEFAULT_REVIEW_BRANCH_NAME: &str = "automation/review";

/// Bound on the in-memory activity ring buffer.
pub const ACTIVITY_RING_CAPACITY: usize = 50;

/// Default LLM-adapter retry attempts.
pub const DEFAULT_LLM_RETRIES: u32 = 3;
