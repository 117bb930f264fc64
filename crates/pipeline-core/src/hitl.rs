//! Human-in-the-loop gate for the planner subgraph.
//!
//! Adapted from the teacher's generic `ApprovalChannel` (an mpsc of pending
//! requests answered through a oneshot per request) but narrowed to the one
//! gate this pipeline actually has: does a human accept the planner's
//! subtask list, or send it back for another planning pass? Unlike the
//! teacher's `ApprovalNode`, a timed-out gate here is **fail-open**
//! (auto-approve) rather than a hard error, per the HITL design.

use crate::constants::{DEFAULT_HITL_TIMEOUT, DEFAULT_MPSC_CHANNEL_CAPACITY};
use crate::domain::Subtask;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

/// What a human reviewer is being asked to bless.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PlanApprovalRequest {
    pub issue_key: String,
    pub subtasks: Vec<Subtask>,
    pub overall_score: f64,
    pub request_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanDecision {
    Approve,
    Reject,
}

struct Pending {
    request: PlanApprovalRequest,
    respond_to: oneshot::Sender<PlanDecision>,
}

/// Outcome of waiting on the gate: either a real human decision, or a
/// fail-open/fail-cancel auto-approval because nobody answered in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitlOutcome {
    Decided(PlanDecision),
    TimedOut,
    Cancelled,
}

/// Sender half, held by the planner node.
#[derive(Clone)]
pub struct HitlGate {
    tx: mpsc::Sender<Pending>,
    gate_timeout: std::time::Duration,
}

/// Receiver half, polled by whatever surfaces the decision to a human
/// (the control surface's `/api/activity` + a decision endpoint, in this
/// workspace; a test harness in unit tests).
pub struct HitlHandler {
    rx: mpsc::Receiver<Pending>,
}

impl HitlGate {
    pub fn new(gate_timeout: std::time::Duration) -> (Self, HitlHandler) {
        let (tx, rx) = mpsc::channel(DEFAULT_MPSC_CHANNEL_CAPACITY);
        (Self { tx, gate_timeout }, HitlHandler { rx })
    }

    /// Ask for approval, waiting up to the configured timeout. Fail-open:
    /// if the handler is gone, the wait times out, or the caller cancels,
    /// this returns [`HitlOutcome::TimedOut`]/[`HitlOutcome::Cancelled`]
    /// rather than an error — the orchestrator's routing predicate treats
    /// both the same as an approval.
    pub async fn request(
        &self,
        request: PlanApprovalRequest,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> HitlOutcome {
        let (respond_to, rx) = oneshot::channel();
        if self.tx.send(Pending { request, respond_to }).await.is_err() {
            return HitlOutcome::TimedOut;
        }

        tokio::select! {
            _ = cancel.cancelled() => HitlOutcome::Cancelled,
            result = timeout(self.gate_timeout, rx) => match result {
                Ok(Ok(decision)) => HitlOutcome::Decided(decision),
                Ok(Err(_)) => HitlOutcome::TimedOut,
                Err(_) => HitlOutcome::TimedOut,
            },
        }
    }
}

impl Default for HitlGate {
    fn default() -> Self {
        Self::new(DEFAULT_HITL_TIMEOUT).0
    }
}

impl HitlHandler {
    /// Wait for the next pending plan awaiting a decision.
    pub async fn recv(&mut self) -> Option<PendingDecision> {
        self.rx.recv().await.map(|p| PendingDecision {
            request: p.request,
            respond_to: p.respond_to,
        })
    }
}

/// A plan awaiting a human decision, handed to whatever UI/API surfaces it.
pub struct PendingDecision {
    pub request: PlanApprovalRequest,
    respond_to: oneshot::Sender<PlanDecision>,
}

impl PendingDecision {
    pub fn approve(self) {
        let _ = self.respond_to.send(PlanDecision::Approve);
    }

    pub fn reject(self) {
        let _ = self.respond_to.send(PlanDecision::Reject);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn approve_is_delivered() {
        let (gate, mut handler) = HitlGate::new(Duration::from_secs(5));
        let cancel = tokio_util::sync::CancellationToken::new();

        let req = PlanApprovalRequest {
            issue_key: "DEMO-1".into(),
            subtasks: vec![],
            overall_score: 6.2,
            request_id: "r1".into(),
        };

        let waiter = tokio::spawn(async move { gate.request(req, &cancel).await });
        let pending = handler.recv().await.expect("pending decision");
        pending.approve();

        assert_eq!(
            waiter.await.unwrap(),
            HitlOutcome::Decided(PlanDecision::Approve)
        );
    }

    #[tokio::test]
    async fn timeout_fails_open() {
        let (gate, _handler) = HitlGate::new(Duration::from_millis(20));
        let cancel = tokio_util::sync::CancellationToken::new();
        let req = PlanApprovalRequest {
            issue_key: "DEMO-1".into(),
            subtasks: vec![],
            overall_score: 6.2,
            request_id: "r2".into(),
        };
        // handler never answers; gate must time out, not hang or error.
        let outcome = gate.request(req, &cancel).await;
        assert_eq!(outcome, HitlOutcome::TimedOut);
    }

    #[tokio::test]
    async fn cancel_short_circuits() {
        let (gate, _handler) = HitlGate::new(Duration::from_secs(30));
        let cancel = tokio_util::sync::CancellationToken::new();
        cancel.cancel();
        let req = PlanApprovalRequest {
            issue_key: "DEMO-1".into(),
            subtasks: vec![],
            overall_score: 6.2,
            request_id: "r3".into(),
        };
        let outcome = gate.request(req, &cancel).await;
        assert_eq!(outcome, HitlOutcome::Cancelled);
    }
}
