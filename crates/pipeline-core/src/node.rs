//! The node contract every pipeline stage implements.

use crate::error::Result;
use crate::state::MergeableState;
use async_trait::async_trait;

/// A single step in the pipeline graph. Implementors receive ownership of
/// the accumulated state and return the next value; on failure they should
/// prefer setting [`crate::domain::IssuePipelineState::error`] and returning
/// `Ok`, reserving `Err` for genuinely exceptional conditions the graph
/// itself cannot route around (e.g. a poisoned lock). Routing predicates
/// consume `state.error`, never a thrown `Err`, per the error-handling
/// design's "result/either types at every port boundary" strategy.
#[async_trait]
pub trait Node<S>: Send + Sync
where
    S: MergeableState,
{
    async fn execute(&self, state: S) -> Result<S>;

    fn name(&self) -> &str;
}

#[async_trait]
impl<S, F, Fut> Node<S> for NamedFn<F>
where
    S: MergeableState,
    F: Fn(S) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<S>> + Send,
{
    async fn execute(&self, state: S) -> Result<S> {
        (self.func)(state).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Adapts a plain async closure into a [`Node`], mirroring `add_node_from_fn`
/// on the teacher's `StateGraph`.
pub struct NamedFn<F> {
    name: String,
    func: F,
}

impl<F> NamedFn<F> {
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}
