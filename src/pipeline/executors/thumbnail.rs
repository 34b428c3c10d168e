//! Thumbnail fetch stage.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{StageError, StageExecutor, StageResult};
use crate::monitor::VodCatalog;
use crate::pipeline::context::StageContext;
use crate::queue::Stage;

/// Downloads the VOD thumbnail into the archive directory.
///
/// Writes to a `.part` file and renames, so a crashed run never leaves a
/// truncated thumbnail behind. Idempotent.
pub struct DownloadThumbnailExecutor {
    client: reqwest::Client,
    catalog: Arc<dyn VodCatalog>,
}

impl DownloadThumbnailExecutor {
    pub fn new(client: reqwest::Client, catalog: Arc<dyn VodCatalog>) -> Self {
        Self { client, catalog }
    }
}

#[async_trait]
impl StageExecutor for DownloadThumbnailExecutor {
    fn stage(&self) -> Stage {
        Stage::DownloadThumbnail
    }

    async fn execute(&self, ctx: &StageContext) -> StageResult {
        if ctx.cancellation.is_cancelled() {
            return Err(StageError::Cancelled);
        }

        let vod = self.catalog.get_vod(&ctx.item.vod_id).await?;
        let Some(url) = vod.thumbnail_url else {
            debug!(vod_id = %ctx.item.vod_id, "VOD has no thumbnail, skipping");
            return Ok(());
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StageError::Failed(format!("thumbnail request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(StageError::Failed(format!(
                "thumbnail request returned {}",
                response.status()
            )));
        }
        let dest = ctx.layout.thumbnail_path();
        let part = dest.with_extension("jpg.part");
        let mut file = fs::File::create(&part).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if ctx.cancellation.is_cancelled() {
                return Err(StageError::Cancelled);
            }
            let chunk = chunk
                .map_err(|e| StageError::Failed(format!("thumbnail body read failed: {e}")))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);
        fs::rename(&part, &dest).await?;

        info!(vod_id = %ctx.item.vod_id, path = %dest.display(), "thumbnail saved");
        Ok(())
    }
}
