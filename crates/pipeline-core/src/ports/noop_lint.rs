//! Default [`StaticLintPort`] used when no external static-analysis
//! service is configured: the reviewer's lint stage still runs, it simply
//! has nothing to filter, so it falls through to "general best practice"
//! per the knowledge-base fallback.

use super::{LintFinding, StaticLintPort};
use crate::domain::GeneratedFileSet;
use crate::error::Result;
use async_trait::async_trait;

pub struct NoopLint;

#[async_trait]
impl StaticLintPort for NoopLint {
    async fn lint(&self, _files: &GeneratedFileSet) -> Result<Vec<LintFinding>> {
        Ok(Vec::new())
    }
}
