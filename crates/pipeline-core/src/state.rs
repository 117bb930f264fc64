//! State contract for graph nodes.

/// A state type that can be threaded through a [`crate::graph::StateGraph`].
///
/// `merge` folds a partial update produced by one node into the
/// accumulator carried between nodes; for this pipeline the state is always
/// a single [`crate::domain::IssuePipelineState`] owned by one in-flight
/// issue, so `merge` is a plain field-by-field overwrite rather than the
/// channel-reduction merges a multi-writer graph would need.
pub trait MergeableState: Clone + Send + Sync + 'static {
    fn merge(&mut self, other: &Self);
}
