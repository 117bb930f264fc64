//! Environment-backed configuration, validated once at startup and
//! immutable afterwards (the prompt registry, knowledge base and this
//! config require no locking per the concurrency design).

use crate::constants::*;
use std::time::Duration;

#[derive(Debug, Clone, serde::Serialize)]
pub struct Config {
    pub max_rebuild_attempts: u32,
    pub review_threshold: f64,
    pub score_threshold: f64,
    pub hitl_timeout: Duration,
    pub dev_parallelism: usize,
    pub review_branch_name: String,
    pub planner_model: String,
    pub assembler_model: String,
    pub developer_model: String,
    pub reviewer_model: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_rebuild_attempts: DEFAULT_MAX_REBUILD_ATTEMPTS,
            review_threshold: DEFAULT_REVIEW_THRESHOLD,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            hitl_timeout: DEFAULT_HITL_TIMEOUT,
            dev_parallelism: DEFAULT_DEV_PARALLELISM,
            review_branch_name: DEFAULT_REVIEW_BRANCH_NAME.to_string(),
            planner_model: "claude-sonnet".to_string(),
            assembler_model: "claude-sonnet".to_string(),
            developer_model: "claude-sonnet".to_string(),
            reviewer_model: "claude-sonnet".to_string(),
        }
    }
}

impl Config {
    /// Reads each setting from its environment variable, falling back to
    /// the default when unset or unparsable. Never panics: a malformed
    /// env var is logged and the default is used, so a bad deploy config
    /// degrades instead of crash-looping.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_rebuild_attempts: env_parse("MAX_REBUILD_ATTEMPTS", defaults.max_rebuild_attempts),
            review_threshold: env_parse("REVIEW_THRESHOLD", defaults.review_threshold),
            score_threshold: env_parse("SCORE_THRESHOLD", defaults.score_threshold),
            hitl_timeout: Duration::from_secs(env_parse(
                "HITL_TIMEOUT_SECONDS",
                defaults.hitl_timeout.as_secs(),
            )),
            dev_parallelism: env_parse("DEV_PARALLELISM", defaults.dev_parallelism).max(1),
            review_branch_name: std::env::var("REVIEW_BRANCH_NAME")
                .unwrap_or(defaults.review_branch_name),
            planner_model: std::env::var("PLANNER_MODEL").unwrap_or(defaults.planner_model),
            assembler_model: std::env::var("ASSEMBLER_MODEL").unwrap_or(defaults.assembler_model),
            developer_model: std::env::var("DEVELOPER_MODEL").unwrap_or(defaults.developer_model),
            reviewer_model: std::env::var("REVIEWER_MODEL").unwrap_or(defaults.reviewer_model),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| {
            tracing::debug!(key, "using default config value");
            default
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = Config::default();
        assert_eq!(config.max_rebuild_attempts, 3);
        assert_eq!(config.dev_parallelism, 4);
        assert_eq!(config.hitl_timeout, Duration::from_secs(30));
    }
}
