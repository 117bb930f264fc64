//! In-process telemetry: counters plus a bounded, newest-first activity
//! ring. Owned by the orchestrator and shared via `Arc`, per the "global
//! mutable state" design note — no module-level statics.

use crate::constants::ACTIVITY_RING_CAPACITY;
use crate::domain::{ActivityEvent, ActivityStatus};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Counters {
    pub workflows_executed: u64,
    pub issues_processed: u64,
    pub code_prs_created: u64,
    pub tokens_total: u64,
    pub tokens_by_agent: HashMap<String, u64>,
    pub rebuild_cycles: u64,
    pub successful_reviews: u64,
    pub errors: u64,
    pub tasks_failed: u64,
    quality_score_sum: f64,
    quality_score_count: u64,
}

impl Counters {
    pub fn average_quality_score(&self) -> f64 {
        if self.quality_score_count == 0 {
            0.0
        } else {
            self.quality_score_sum / self.quality_score_count as f64
        }
    }
}

struct Inner {
    counters: Counters,
    activity: VecDeque<ActivityEvent>,
}

pub struct Telemetry {
    inner: Mutex<Inner>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                counters: Counters::default(),
                activity: VecDeque::with_capacity(ACTIVITY_RING_CAPACITY),
            }),
        }
    }

    /// Appends under the same lock acquisition as any counter bump the
    /// caller makes, so the activity stream's order reflects a consistent
    /// happens-before across concurrent nodes.
    pub fn record(&self, event: ActivityEvent) {
        let mut guard = self.inner.lock();
        if event.status == ActivityStatus::Error {
            guard.counters.errors += 1;
        }
        guard.activity.push_front(event);
        if guard.activity.len() > ACTIVITY_RING_CAPACITY {
            guard.activity.pop_back();
        }
    }

    pub fn add_tokens(&self, agent: &str, tokens: u64) {
        let mut guard = self.inner.lock();
        guard.counters.tokens_total += tokens;
        *guard
            .counters
            .tokens_by_agent
            .entry(agent.to_string())
            .or_insert(0) += tokens;
    }

    pub fn issue_processed(&self) {
        self.inner.lock().counters.issues_processed += 1;
    }

    pub fn workflow_executed(&self) {
        self.inner.lock().counters.workflows_executed += 1;
    }

    pub fn pr_created(&self) {
        self.inner.lock().counters.code_prs_created += 1;
    }

    pub fn rebuild_cycle(&self) {
        self.inner.lock().counters.rebuild_cycles += 1;
    }

    pub fn review_succeeded(&self) {
        self.inner.lock().counters.successful_reviews += 1;
    }

    pub fn task_failed(&self) {
        self.inner.lock().counters.tasks_failed += 1;
    }

    pub fn quality_score(&self, score: f64) {
        let mut guard = self.inner.lock();
        guard.counters.quality_score_sum += score;
        guard.counters.quality_score_count += 1;
    }

    pub fn counters(&self) -> Counters {
        self.inner.lock().counters.clone()
    }

    /// Newest-first, bounded at [`ACTIVITY_RING_CAPACITY`].
    pub fn activity(&self) -> Vec<ActivityEvent> {
        self.inner.lock().activity.iter().cloned().collect()
    }

    /// Clears counters and activity, backing the control surface's
    /// `reset-stats` endpoint. Does not touch persisted daily metrics.
    pub fn reset(&self) {
        let mut guard = self.inner.lock();
        guard.counters = Counters::default();
        guard.activity.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_ring_bounded_and_newest_first() {
        let telemetry = Telemetry::new();
        for i in 0..(ACTIVITY_RING_CAPACITY + 10) {
            telemetry.record(ActivityEvent::new(
                "developer",
                "generate",
                format!("file {i}"),
                ActivityStatus::Info,
                "DEMO-1",
            ));
        }
        let activity = telemetry.activity();
        assert_eq!(activity.len(), ACTIVITY_RING_CAPACITY);
        assert!(activity[0].details.contains(&(ACTIVITY_RING_CAPACITY + 9).to_string()));
    }

    #[test]
    fn error_events_increment_error_counter() {
        let telemetry = Telemetry::new();
        telemetry.record(ActivityEvent::new(
            "reviewer",
            "review",
            "boom",
            ActivityStatus::Error,
            "DEMO-1",
        ));
        assert_eq!(telemetry.counters().errors, 1);
    }

    #[test]
    fn reset_clears_counters_and_activity() {
        let telemetry = Telemetry::new();
        telemetry.add_tokens("planner", 10);
        telemetry.record(ActivityEvent::new("planner", "plan", "done", ActivityStatus::Success, "DEMO-1"));
        telemetry.reset();
        assert_eq!(telemetry.counters().tokens_total, 0);
        assert!(telemetry.activity().is_empty());
    }

    #[test]
    fn token_conservation_across_agents() {
        let telemetry = Telemetry::new();
        telemetry.add_tokens("planner", 100);
        telemetry.add_tokens("developer", 250);
        let counters = telemetry.counters();
        assert_eq!(counters.tokens_total, 350);
        assert_eq!(counters.tokens_by_agent.values().sum::<u64>(), 350);
    }
}
