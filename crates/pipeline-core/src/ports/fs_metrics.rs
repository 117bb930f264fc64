//! Filesystem-backed [`MetricsPort`](super::MetricsPort): one JSON document
//! per ISO date plus an append-only review log, guarded by an in-process
//! mutex so concurrent `upsert_daily` calls from different issues in the
//! same session serialize cleanly (cross-process concurrency is out of
//! scope — the spec's "one issue pipeline at a time per session" model).

use super::{AgentSummary, MetricsPort};
use crate::domain::{DailyMetrics, DailyMetricsDelta, ReviewResult};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use tokio::sync::Mutex;

pub struct FsMetricsStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FsMetricsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    fn doc_path(&self, date: &str) -> PathBuf {
        self.dir.join(format!("{date}.json"))
    }

    fn reviews_path(&self) -> PathBuf {
        self.dir.join("reviews.jsonl")
    }

    async fn read_doc(&self, date: &str) -> Result<DailyMetrics> {
        let path = self.doc_path(date);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                Error::InternalExecutionError(format!("corrupt daily metrics doc {date}: {e}"))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DailyMetrics::new(date)),
            Err(e) => Err(Error::InternalExecutionError(format!(
                "reading daily metrics doc {date}: {e}"
            ))),
        }
    }

    async fn write_doc(&self, doc: &DailyMetrics) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::InternalExecutionError(e.to_string()))?;
        let body = serde_json::to_string_pretty(doc)
            .map_err(|e| Error::InternalExecutionError(e.to_string()))?;
        tokio::fs::write(self.doc_path(&doc.date), body)
            .await
            .map_err(|e| Error::InternalExecutionError(e.to_string()))
    }
}

#[async_trait]
impl MetricsPort for FsMetricsStore {
    async fn record_review(&self, review: &ReviewResult) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::InternalExecutionError(e.to_string()))?;
        let mut line = serde_json::to_string(review)
            .map_err(|e| Error::InternalExecutionError(e.to_string()))?;
        line.push('\n');
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.reviews_path())
            .await
            .map_err(|e| Error::InternalExecutionError(e.to_string()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::InternalExecutionError(e.to_string()))
    }

    async fn upsert_daily(&self, date: &str, delta: DailyMetricsDelta) -> Result<DailyMetrics> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_doc(date).await?;
        doc.apply(&delta);
        self.write_doc(&doc).await?;
        Ok(doc)
    }

    async fn get_last_7_days(&self) -> Result<Vec<DailyMetrics>> {
        let mut out = Vec::with_capacity(7);
        let today = Utc::now().date_naive();
        for offset in 0..7 {
            let date = (today - chrono::Duration::days(offset))
                .format("%Y-%m-%d")
                .to_string();
            out.push(self.read_doc(&date).await?);
        }
        Ok(out)
    }

    /// Folds each agent's task/token counters across the last 7 days. A
    /// per-agent success rate isn't tracked at that granularity, so it
    /// reports the overall daily success/failure ratio across the window.
    async fn get_agents_summary(&self) -> Result<Vec<AgentSummary>> {
        let days = self.get_last_7_days().await?;
        let mut by_agent: std::collections::BTreeMap<String, AgentSummary> =
            std::collections::BTreeMap::new();
        let mut total_success = 0u64;
        let mut total_failure = 0u64;
        for day in &days {
            total_success += day.success_count;
            total_failure += day.failure_count;
            for (agent, activity) in &day.agent_activities {
                let entry = by_agent.entry(agent.clone()).or_insert_with(|| AgentSummary {
                    agent: agent.clone(),
                    ..Default::default()
                });
                entry.tasks += activity.task_completed;
                entry.tokens += activity.tokens_used;
                if !activity.llm_model_used.is_empty() {
                    entry.model = activity.llm_model_used.clone();
                }
            }
        }
        let total = total_success + total_failure;
        let success_rate = if total == 0 {
            0.0
        } else {
            total_success as f64 / total as f64
        };
        for summary in by_agent.values_mut() {
            summary.success_rate = success_rate;
        }
        Ok(by_agent.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_daily_with_zero_delta_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMetricsStore::new(dir.path());
        let first = store
            .upsert_daily("2026-08-01", DailyMetricsDelta::default())
            .await
            .unwrap();
        let second = store
            .upsert_daily("2026-08-01", DailyMetricsDelta::default())
            .await
            .unwrap();
        assert_eq!(first.tasks_completed, second.tasks_completed);
        assert_eq!(first.num_scores, second.num_scores);
    }

    #[tokio::test]
    async fn upsert_daily_accumulates_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMetricsStore::new(dir.path());
        store
            .upsert_daily(
                "2026-08-01",
                DailyMetricsDelta {
                    tasks_completed: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let second = store
            .upsert_daily(
                "2026-08-01",
                DailyMetricsDelta {
                    tasks_completed: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(second.tasks_completed, 2);
    }
}
