//! Folder creation stage.

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::{StageExecutor, StageResult};
use crate::pipeline::context::StageContext;
use crate::queue::Stage;

/// Creates the archive and scratch directories for a VOD. Idempotent.
pub struct CreateFolderExecutor;

#[async_trait]
impl StageExecutor for CreateFolderExecutor {
    fn stage(&self) -> Stage {
        Stage::CreateFolder
    }

    async fn execute(&self, ctx: &StageContext) -> StageResult {
        fs::create_dir_all(&ctx.layout.archive_dir).await?;
        fs::create_dir_all(&ctx.layout.temp_dir).await?;
        debug!(
            archive_dir = %ctx.layout.archive_dir.display(),
            temp_dir = %ctx.layout.temp_dir.display(),
            "created VOD directories"
        );
        Ok(())
    }
}
