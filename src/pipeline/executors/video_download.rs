//! Video download stage.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::fs;
use tracing::info;

use super::command::{run_command, substitute};
use super::{StageExecutor, StageResult};
use crate::monitor::VodCatalog;
use crate::pipeline::context::StageContext;
use crate::queue::Stage;

/// Runs the external video downloader into the scratch area.
///
/// The command template receives `{url}` and `{output}`. Downloaders are
/// expected to continue partial files (`--continue` style), which makes
/// this stage resumable after a crash.
pub struct VideoDownloadExecutor {
    command_template: String,
    catalog: Arc<dyn VodCatalog>,
}

impl VideoDownloadExecutor {
    pub fn new(command_template: String, catalog: Arc<dyn VodCatalog>) -> Self {
        Self {
            command_template,
            catalog,
        }
    }
}

#[async_trait]
impl StageExecutor for VideoDownloadExecutor {
    fn stage(&self) -> Stage {
        Stage::VideoDownload
    }

    fn resumable(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &StageContext) -> StageResult {
        let vod = self.catalog.get_vod(&ctx.item.vod_id).await?;
        let output = ctx.layout.video_temp();
        fs::create_dir_all(&ctx.layout.temp_dir).await?;

        let command = substitute(
            &self.command_template,
            &[
                ("url", vod.source_url.as_str()),
                ("output", &output.to_string_lossy()),
            ],
        );
        run_command(&command, &ctx.layout.log_path(self.stage()), &ctx.cancellation).await?;

        info!(vod_id = %ctx.item.vod_id, path = %output.display(), "video downloaded");
        Ok(())
    }
}
