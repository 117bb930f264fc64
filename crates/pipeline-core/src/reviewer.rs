//! Nine-stage review pipeline: format, load the knowledge base, static
//! lint, three LLM-scored dimensions, aggregate, persist, finalize. See
//! `SPEC_FULL.md` §4.7.

use crate::domain::{DimensionResult, GeneratedFileSet, ReviewResult};
use crate::error::{Error, Result};
use crate::json_extract::extract_json;
use crate::llm::{LlmCallOptions, LlmPort};
use crate::ports::{MetricsPort, StaticLintPort};
use crate::prompt::PromptRegistry;
use std::collections::BTreeMap;

/// Fallback score applied to a dimension whose LLM call failed or returned
/// unparsable output, as long as at least one of the three core dimensions
/// succeeded (spec's fail-soft defaulting).
const DEFAULT_DIMENSION_SCORE: f64 = 75.0;

/// General-purpose guidance used when no project-specific knowledge base
/// is configured; keeps the completeness/security/standards prompts
/// non-empty rather than branching on an absent KB.
const FALLBACK_KNOWLEDGE_BASE: &str = "Favor clear error handling, avoid unused code paths, \
and keep public interfaces documented.";

pub struct Reviewer<'a> {
    pub llm: &'a dyn LlmPort,
    pub prompts: &'a PromptRegistry,
    pub lint: &'a dyn StaticLintPort,
    pub metrics: &'a dyn MetricsPort,
    pub threshold: f64,
    pub model: String,
}

impl<'a> Reviewer<'a> {
    pub async fn review(
        &self,
        issue_key: &str,
        files: &GeneratedFileSet,
        iteration: u32,
    ) -> Result<ReviewResult> {
        let formatted = format_files(files);
        let knowledge_base = FALLBACK_KNOWLEDGE_BASE.to_string();
        let files_json = serde_json::to_string(&formatted).unwrap_or_default();

        let lint = self.lint_dimension(files).await;

        let mut vars = BTreeMap::new();
        vars.insert("issue_key".to_string(), issue_key.to_string());
        vars.insert("files_json".to_string(), files_json);
        vars.insert("knowledge_base".to_string(), knowledge_base);

        let completeness = self.run_dimension("reviewer.completeness", &vars).await;
        let security = self.run_dimension("reviewer.security", &vars).await;
        let standards = self.run_dimension("reviewer.standards", &vars).await;

        if completeness.is_none() && security.is_none() && standards.is_none() {
            return Err(Error::ReviewFailed(
                "completeness, security and standards analyses all failed".to_string(),
            ));
        }

        let tokens_used = [&completeness, &security, &standards]
            .iter()
            .filter_map(|d| d.as_ref().map(|(_, tokens)| tokens))
            .sum();

        let mut review = ReviewResult {
            completeness: completeness.map(|(d, _)| d).unwrap_or_else(default_dimension),
            security: security.map(|(d, _)| d).unwrap_or_else(default_dimension),
            standards: standards.map(|(d, _)| d).unwrap_or_else(default_dimension),
            lint,
            tokens_used,
            iteration,
            ..Default::default()
        };
        review.aggregate(self.threshold);

        if let Err(e) = self.metrics.record_review(&review).await {
            tracing::warn!(issue = %issue_key, error = %e, "failed to persist review result");
        }

        Ok(review)
    }

    async fn lint_dimension(&self, files: &GeneratedFileSet) -> DimensionResult {
        let findings = match self.lint.lint(files).await {
            Ok(findings) => findings,
            Err(e) => {
                tracing::warn!(error = %e, "static lint unavailable, skipping lint dimension");
                return DimensionResult {
                    score: 100.0,
                    mistakes: Vec::new(),
                    reasoning: "static lint unavailable".to_string(),
                };
            }
        };

        let actionable: Vec<_> = findings.iter().filter(|f| !is_cosmetic(f)).collect();
        let score = (100.0 - 5.0 * actionable.len() as f64).clamp(0.0, 100.0);
        let mistakes = actionable
            .iter()
            .map(|f| format!("{}:{} {} ({})", f.file, f.line, f.message, f.symbol))
            .collect();

        DimensionResult {
            score,
            mistakes,
            reasoning: format!(
                "{} actionable finding(s) of {} total",
                actionable.len(),
                findings.len()
            ),
        }
    }

    async fn run_dimension(
        &self,
        prompt_name: &str,
        vars: &BTreeMap<String, String>,
    ) -> Option<(DimensionResult, u64)> {
        let prompt = match self.prompts.format(prompt_name, vars) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(prompt_name, error = %e, "dimension prompt unavailable");
                return None;
            }
        };
        let response = match self
            .llm
            .call(
                &prompt,
                "reviewer",
                LlmCallOptions {
                    model: Some(self.model.clone()),
                    ..Default::default()
                },
            )
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(prompt_name, error = %e, "dimension LLM call failed");
                return None;
            }
        };

        let value = match extract_json(&response.text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(prompt_name, error = %e, "dimension output malformed");
                return None;
            }
        };

        let score = value.get("score").and_then(|v| v.as_f64()).unwrap_or(DEFAULT_DIMENSION_SCORE);
        let mistakes = value
            .get("mistakes")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        let reasoning = value
            .get("reasoning")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        Some((
            DimensionResult {
                score: score.clamp(0.0, 100.0),
                mistakes,
                reasoning,
            },
            response.tokens_used,
        ))
    }
}

fn default_dimension() -> DimensionResult {
    DimensionResult {
        score: DEFAULT_DIMENSION_SCORE,
        mistakes: Vec::new(),
        reasoning: "default: dimension analysis unavailable".to_string(),
    }
}

/// Cosmetic findings (style/formatting) are surfaced to the lint dimension
/// for visibility but don't count against its score; `info`-severity
/// findings and style-category symbols are the two shapes observed from
/// linters in practice.
fn is_cosmetic(finding: &crate::ports::LintFinding) -> bool {
    finding.severity.eq_ignore_ascii_case("info")
        || finding.severity.eq_ignore_ascii_case("convention")
        || finding.message_id.to_lowercase().contains("style")
        || finding.message_id.to_lowercase().contains("format")
}

/// Deterministic normalization pass: trims trailing whitespace per line and
/// ensures a single trailing newline, so lint/LLM stages see consistent
/// input regardless of how the developer subgraph produced a file.
fn format_files(files: &GeneratedFileSet) -> GeneratedFileSet {
    files
        .iter()
        .map(|(name, content)| {
            let normalized: String = content
                .lines()
                .map(|line| line.trim_end())
                .collect::<Vec<_>>()
                .join("\n");
            (name.clone(), format!("{}\n", normalized.trim_end()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::noop_lint::NoopLint;
    use crate::ports::AgentSummary;
    use crate::ports::LintFinding;
    use crate::test_support::InMemoryLlmPort;
    use async_trait::async_trait;

    struct StubMetrics;

    #[async_trait]
    impl MetricsPort for StubMetrics {
        async fn record_review(&self, _review: &ReviewResult) -> Result<()> {
            Ok(())
        }
        async fn upsert_daily(
            &self,
            date: &str,
            _delta: crate::domain::DailyMetricsDelta,
        ) -> Result<crate::domain::DailyMetrics> {
            Ok(crate::domain::DailyMetrics::new(date))
        }
        async fn get_last_7_days(&self) -> Result<Vec<crate::domain::DailyMetrics>> {
            Ok(Vec::new())
        }
        async fn get_agents_summary(&self) -> Result<Vec<AgentSummary>> {
            Ok(Vec::new())
        }
    }

    struct StubLint(Vec<LintFinding>);

    #[async_trait]
    impl StaticLintPort for StubLint {
        async fn lint(&self, _files: &GeneratedFileSet) -> Result<Vec<LintFinding>> {
            Ok(self.0.clone())
        }
    }

    fn files() -> GeneratedFileSet {
        let mut files = GeneratedFileSet::new();
        files.insert("src/cli.rs".to_string(), "fn main() {}   \n\n\n".to_string());
        files
    }

    #[tokio::test]
    async fn all_dimensions_succeed_and_aggregate() {
        let llm = InMemoryLlmPort::default();
        llm.queue("reviewer", r#"{"score": 90, "mistakes": [], "reasoning": "ok"}"#, 10);
        llm.queue("reviewer", r#"{"score": 80, "mistakes": [], "reasoning": "ok"}"#, 10);
        llm.queue("reviewer", r#"{"score": 70, "mistakes": [], "reasoning": "ok"}"#, 10);
        let mut prompts = PromptRegistry::new();
        prompts.register("reviewer.completeness", "p");
        prompts.register("reviewer.security", "p");
        prompts.register("reviewer.standards", "p");
        let lint = NoopLint;
        let metrics = StubMetrics;
        let reviewer = Reviewer {
            llm: &llm,
            prompts: &prompts,
            lint: &lint,
            metrics: &metrics,
            threshold: 70.0,
            model: "test-model".to_string(),
        };
        let review = reviewer.review("DEMO-1", &files(), 1).await.unwrap();
        assert_eq!(review.overall, 82.0);
        assert!(review.approved);
    }

    #[tokio::test]
    async fn all_three_core_dimensions_failing_is_review_failed() {
        let llm = InMemoryLlmPort::default();
        let prompts = PromptRegistry::new(); // no templates registered: every format() fails
        let lint = NoopLint;
        let metrics = StubMetrics;
        let reviewer = Reviewer {
            llm: &llm,
            prompts: &prompts,
            lint: &lint,
            metrics: &metrics,
            threshold: 70.0,
            model: "test-model".to_string(),
        };
        let err = reviewer.review("DEMO-1", &files(), 1).await.unwrap_err();
        assert_eq!(err.kind(), "ReviewFailed");
    }

    #[tokio::test]
    async fn one_failed_dimension_defaults_instead_of_failing_review() {
        let llm = InMemoryLlmPort::default();
        llm.queue("reviewer", r#"{"score": 90, "mistakes": [], "reasoning": "ok"}"#, 10);
        llm.queue("reviewer", r#"not json"#, 10);
        llm.queue("reviewer", r#"{"score": 70, "mistakes": [], "reasoning": "ok"}"#, 10);
        let mut prompts = PromptRegistry::new();
        prompts.register("reviewer.completeness", "p");
        prompts.register("reviewer.security", "p");
        prompts.register("reviewer.standards", "p");
        let lint = NoopLint;
        let metrics = StubMetrics;
        let reviewer = Reviewer {
            llm: &llm,
            prompts: &prompts,
            lint: &lint,
            metrics: &metrics,
            threshold: 70.0,
            model: "test-model".to_string(),
        };
        let review = reviewer.review("DEMO-1", &files(), 1).await.unwrap();
        assert_eq!(review.security.score, DEFAULT_DIMENSION_SCORE);
    }

    #[tokio::test]
    async fn cosmetic_lint_findings_do_not_affect_score() {
        let llm = InMemoryLlmPort::default();
        llm.queue("reviewer", r#"{"score": 90, "mistakes": [], "reasoning": "ok"}"#, 10);
        llm.queue("reviewer", r#"{"score": 80, "mistakes": [], "reasoning": "ok"}"#, 10);
        llm.queue("reviewer", r#"{"score": 70, "mistakes": [], "reasoning": "ok"}"#, 10);
        let mut prompts = PromptRegistry::new();
        prompts.register("reviewer.completeness", "p");
        prompts.register("reviewer.security", "p");
        prompts.register("reviewer.standards", "p");
        let lint = StubLint(vec![LintFinding {
            file: "src/cli.rs".to_string(),
            line: 1,
            column: 1,
            severity: "info".to_string(),
            message: "missing blank line".to_string(),
            symbol: "style".to_string(),
            message_id: "C0301-style".to_string(),
        }]);
        let metrics = StubMetrics;
        let reviewer = Reviewer {
            llm: &llm,
            prompts: &prompts,
            lint: &lint,
            metrics: &metrics,
            threshold: 70.0,
            model: "test-model".to_string(),
        };
        let review = reviewer.review("DEMO-1", &files(), 1).await.unwrap();
        assert_eq!(review.lint.score, 100.0);
        assert!(review.lint.mistakes.is_empty());
    }
}
