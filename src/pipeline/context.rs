//! Per-execution context handed to stage executors.

use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::queue::{QueueItem, Stage};

/// On-disk layout for one VOD.
///
/// Downloads and renders land in the scratch area; the move stages promote
/// finished files into the archive tree.
#[derive(Debug, Clone)]
pub struct ArchiveLayout {
    /// Scratch directory for this VOD: `<temp_root>/<vod_id>`.
    pub temp_dir: PathBuf,
    /// Final directory for this VOD: `<archive_root>/<channel_id>/<vod_id>`.
    pub archive_dir: PathBuf,
}

impl ArchiveLayout {
    pub fn new(temp_root: &Path, archive_root: &Path, channel_id: &str, vod_id: &str) -> Self {
        Self {
            temp_dir: temp_root.join(vod_id),
            archive_dir: archive_root.join(channel_id).join(vod_id),
        }
    }

    pub fn video_temp(&self) -> PathBuf {
        self.temp_dir.join("video.mp4")
    }

    pub fn video_final(&self) -> PathBuf {
        self.archive_dir.join("video.mp4")
    }

    pub fn chat_json_temp(&self) -> PathBuf {
        self.temp_dir.join("chat.json")
    }

    pub fn chat_json_final(&self) -> PathBuf {
        self.archive_dir.join("chat.json")
    }

    pub fn chat_render_temp(&self) -> PathBuf {
        self.temp_dir.join("chat.mp4")
    }

    pub fn chat_render_final(&self) -> PathBuf {
        self.archive_dir.join("chat.mp4")
    }

    pub fn thumbnail_path(&self) -> PathBuf {
        self.archive_dir.join("thumbnail.jpg")
    }

    pub fn info_path(&self) -> PathBuf {
        self.archive_dir.join("info.json")
    }

    /// Operator-readable log of a stage's external command output, kept
    /// alongside the archived files.
    pub fn log_path(&self, stage: Stage) -> PathBuf {
        self.archive_dir.join("logs").join(format!("{stage}.log"))
    }
}

/// Everything an executor needs to run one stage.
pub struct StageContext {
    /// Snapshot of the queue item at claim time.
    pub item: QueueItem,
    pub layout: ArchiveLayout,
    /// Fired when the item is cancelled or deleted; executors must stop.
    pub cancellation: CancellationToken,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = ArchiveLayout::new(
            Path::new("/tmp/work"),
            Path::new("/data/archive"),
            "channel-1",
            "vod-9",
        );
        assert_eq!(layout.temp_dir, Path::new("/tmp/work/vod-9"));
        assert_eq!(
            layout.video_final(),
            Path::new("/data/archive/channel-1/vod-9/video.mp4")
        );
        assert_eq!(
            layout.chat_json_temp(),
            Path::new("/tmp/work/vod-9/chat.json")
        );
        assert_eq!(
            layout.log_path(Stage::VideoDownload),
            Path::new("/data/archive/channel-1/vod-9/logs/video_download.log")
        );
    }
}
