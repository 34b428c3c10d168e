//! Metadata save stage.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::fs;
use tracing::info;

use super::{StageError, StageExecutor, StageResult};
use crate::monitor::VodCatalog;
use crate::pipeline::context::StageContext;
use crate::queue::Stage;

/// Serializes the VOD metadata to `info.json` in the archive directory.
/// Temp-write plus rename; idempotent.
pub struct SaveInfoExecutor {
    catalog: Arc<dyn VodCatalog>,
}

impl SaveInfoExecutor {
    pub fn new(catalog: Arc<dyn VodCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl StageExecutor for SaveInfoExecutor {
    fn stage(&self) -> Stage {
        Stage::SaveInfo
    }

    async fn execute(&self, ctx: &StageContext) -> StageResult {
        let vod = self.catalog.get_vod(&ctx.item.vod_id).await?;
        let json = serde_json::to_vec_pretty(&vod)
            .map_err(|e| StageError::Failed(format!("failed to serialize VOD info: {e}")))?;

        let dest = ctx.layout.info_path();
        let part = dest.with_extension("json.part");
        fs::write(&part, &json).await?;
        fs::rename(&part, &dest).await?;

        info!(vod_id = %ctx.item.vod_id, path = %dest.display(), "VOD info saved");
        Ok(())
    }
}
