//! Stage executors: the external side effects of the pipeline.
//!
//! Each executor performs exactly one stage's work and reports success or a
//! typed failure. Executors must be safely re-invokable after a crash; the
//! `resumable` flag tells the recovery pass whether a re-run is safe or the
//! stage has to be surfaced as failed for operator retry.

mod chat_download;
mod chat_render;
mod command;
mod folder;
mod info;
mod move_file;
mod thumbnail;
mod video_download;

pub use chat_download::ChatDownloadExecutor;
pub use chat_render::ChatRenderExecutor;
pub use command::{run_command, substitute};
pub use folder::CreateFolderExecutor;
pub use info::SaveInfoExecutor;
pub use move_file::{ChatMoveExecutor, VideoMoveExecutor};
pub use thumbnail::DownloadThumbnailExecutor;
pub use video_download::VideoDownloadExecutor;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::Config;
use crate::monitor::VodCatalog;
use crate::pipeline::context::StageContext;
use crate::queue::Stage;
use crate::{Error, Result};

/// Failure modes of a stage side effect.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("{0}")]
    Failed(String),
    #[error("cancelled")]
    Cancelled,
}

impl From<std::io::Error> for StageError {
    fn from(e: std::io::Error) -> Self {
        StageError::Failed(e.to_string())
    }
}

impl From<Error> for StageError {
    fn from(e: Error) -> Self {
        StageError::Failed(e.to_string())
    }
}

pub type StageResult = std::result::Result<(), StageError>;

/// One stage's side effect.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// The stage this executor implements.
    fn stage(&self) -> Stage;

    /// Whether a crashed run can safely be re-attempted from scratch or from
    /// a partial artifact. Non-resumable stages are marked failed on
    /// recovery instead of being silently re-run.
    fn resumable(&self) -> bool {
        true
    }

    /// Run the side effect. Must honor `ctx.cancellation` and must be
    /// idempotent or resumable when `resumable()` is true.
    async fn execute(&self, ctx: &StageContext) -> StageResult;
}

/// Lookup table from stage to executor.
pub struct ExecutorRegistry {
    executors: HashMap<Stage, Arc<dyn StageExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    pub fn register(&mut self, executor: Arc<dyn StageExecutor>) {
        self.executors.insert(executor.stage(), executor);
    }

    pub fn get(&self, stage: Stage) -> Option<Arc<dyn StageExecutor>> {
        self.executors.get(&stage).cloned()
    }

    /// Registry with the standard eight executors wired from config.
    pub fn standard(config: &Config, catalog: Arc<dyn VodCatalog>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;

        let mut registry = Self::new();
        registry.register(Arc::new(CreateFolderExecutor));
        registry.register(Arc::new(DownloadThumbnailExecutor::new(
            http,
            catalog.clone(),
        )));
        registry.register(Arc::new(SaveInfoExecutor::new(catalog.clone())));
        registry.register(Arc::new(VideoDownloadExecutor::new(
            config.video_download_cmd.clone(),
            catalog.clone(),
        )));
        registry.register(Arc::new(VideoMoveExecutor));
        registry.register(Arc::new(ChatDownloadExecutor::new(
            config.chat_download_cmd.clone(),
            catalog,
        )));
        registry.register(Arc::new(ChatRenderExecutor::new(
            config.chat_render_cmd.clone(),
        )));
        registry.register(Arc::new(ChatMoveExecutor));
        Ok(registry)
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(CreateFolderExecutor));
        assert!(registry.get(Stage::CreateFolder).is_some());
        assert!(registry.get(Stage::VideoDownload).is_none());
    }
}
