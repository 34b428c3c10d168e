//! Move stages: promote finished files from scratch into the archive.
//!
//! Modeled as copy + size verification + source removal so moves work
//! across filesystems. If the source is gone but the destination exists,
//! the move already happened (crash between remove and commit) and the
//! stage succeeds idempotently.

use async_trait::async_trait;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

use super::{StageError, StageExecutor, StageResult};
use crate::pipeline::context::StageContext;
use crate::queue::Stage;

async fn move_into_archive(src: &Path, dst: &Path) -> StageResult {
    if !fs::try_exists(src).await? {
        if fs::try_exists(dst).await? {
            debug!(dst = %dst.display(), "already moved, skipping");
            return Ok(());
        }
        return Err(StageError::Failed(format!(
            "source file missing: {}",
            src.display()
        )));
    }

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    let src_len = fs::metadata(src).await?.len();
    fs::copy(src, dst).await?;
    let dst_len = fs::metadata(dst).await?.len();
    if src_len != dst_len {
        // Don't delete the source; the copy is suspect.
        return Err(StageError::Failed(format!(
            "size mismatch after copy: {} is {src_len} bytes, {} is {dst_len} bytes",
            src.display(),
            dst.display()
        )));
    }
    fs::remove_file(src).await?;

    info!(src = %src.display(), dst = %dst.display(), bytes = src_len, "moved into archive");
    Ok(())
}

/// Moves the downloaded video into the archive tree.
pub struct VideoMoveExecutor;

#[async_trait]
impl StageExecutor for VideoMoveExecutor {
    fn stage(&self) -> Stage {
        Stage::VideoMove
    }

    async fn execute(&self, ctx: &StageContext) -> StageResult {
        move_into_archive(&ctx.layout.video_temp(), &ctx.layout.video_final()).await
    }
}

/// Moves the rendered chat and the raw chat JSON into the archive tree.
pub struct ChatMoveExecutor;

#[async_trait]
impl StageExecutor for ChatMoveExecutor {
    fn stage(&self) -> Stage {
        Stage::ChatMove
    }

    async fn execute(&self, ctx: &StageContext) -> StageResult {
        move_into_archive(&ctx.layout.chat_render_temp(), &ctx.layout.chat_render_final()).await?;
        move_into_archive(&ctx.layout.chat_json_temp(), &ctx.layout.chat_json_final()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_move_and_idempotent_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src/video.mp4");
        let dst = dir.path().join("dst/video.mp4");
        fs::create_dir_all(src.parent().unwrap()).await.unwrap();
        fs::write(&src, b"payload").await.unwrap();

        move_into_archive(&src, &dst).await.unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"payload");

        // Re-running after the source is gone succeeds.
        move_into_archive(&src, &dst).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_source_without_destination_fails() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("absent.mp4");
        let dst = dir.path().join("dst/absent.mp4");
        let err = move_into_archive(&src, &dst).await.unwrap_err();
        assert!(matches!(err, StageError::Failed(_)));
    }
}
