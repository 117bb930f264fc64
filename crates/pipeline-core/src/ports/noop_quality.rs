//! Default [`CodeQualityPort`] used when no external code-quality service
//! (e.g. SonarQube) is configured: the post-run quality scan still runs,
//! it simply has no PR or measures to report on.

use super::{CodeQualityPort, PrSummary, QualityMeasures};
use crate::error::Result;
use async_trait::async_trait;

pub struct NoopQuality;

#[async_trait]
impl CodeQualityPort for NoopQuality {
    async fn latest_pr(&self) -> Result<Option<PrSummary>> {
        Ok(None)
    }

    async fn measures(&self, _project: &str) -> Result<QualityMeasures> {
        Ok(QualityMeasures::default())
    }
}
