use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;

/// Version-control seam invoked during the commit phase: stage and record
/// the generated output paths. A failure here is fatal and triggers the
/// same rollback as any other top-level failure.
#[async_trait]
pub trait VersionControl: Send + Sync {
    async fn stage(&self, paths: &[PathBuf]) -> Result<()>;
}
