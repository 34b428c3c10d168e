//! Queue item domain entity and stage eligibility rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stage::{Stage, StageStatus, Track};

/// The archival job record for one VOD, tracking per-stage progress.
///
/// Exactly one queue item exists per VOD. Stage fields are mutated only by
/// the pipeline driver through conditional store updates; `on_hold` is an
/// operator action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub vod_id: String,
    pub channel_id: String,
    /// True if the source was still live when archiving began.
    pub live_archive: bool,
    /// Persisted stream-end signal; unblocks finalization stages of a
    /// live archive.
    pub stream_ended: bool,
    pub on_hold: bool,
    pub video_processing: bool,
    pub chat_processing: bool,
    /// Derived: true iff any stage is running. Persisted for filtering.
    pub processing: bool,
    pub create_folder: StageStatus,
    pub download_thumbnail: StageStatus,
    pub save_info: StageStatus,
    pub video_download: StageStatus,
    pub video_move: StageStatus,
    pub chat_download: StageStatus,
    pub chat_render: StageStatus,
    pub chat_move: StageStatus,
    /// Last stage error, kept for operator visibility until a retry.
    pub error_stage: Option<Stage>,
    pub error_message: Option<String>,
    pub error_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn new(
        vod_id: impl Into<String>,
        channel_id: impl Into<String>,
        live_archive: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            vod_id: vod_id.into(),
            channel_id: channel_id.into(),
            live_archive,
            stream_ended: false,
            on_hold: false,
            video_processing: false,
            chat_processing: false,
            processing: false,
            create_folder: StageStatus::Pending,
            download_thumbnail: StageStatus::Pending,
            save_info: StageStatus::Pending,
            video_download: StageStatus::Pending,
            video_move: StageStatus::Pending,
            chat_download: StageStatus::Pending,
            chat_render: StageStatus::Pending,
            chat_move: StageStatus::Pending,
            error_stage: None,
            error_message: None,
            error_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn stage_status(&self, stage: Stage) -> StageStatus {
        match stage {
            Stage::CreateFolder => self.create_folder,
            Stage::DownloadThumbnail => self.download_thumbnail,
            Stage::SaveInfo => self.save_info,
            Stage::VideoDownload => self.video_download,
            Stage::VideoMove => self.video_move,
            Stage::ChatDownload => self.chat_download,
            Stage::ChatRender => self.chat_render,
            Stage::ChatMove => self.chat_move,
        }
    }

    pub fn set_stage_status(&mut self, stage: Stage, status: StageStatus) {
        let slot = match stage {
            Stage::CreateFolder => &mut self.create_folder,
            Stage::DownloadThumbnail => &mut self.download_thumbnail,
            Stage::SaveInfo => &mut self.save_info,
            Stage::VideoDownload => &mut self.video_download,
            Stage::VideoMove => &mut self.video_move,
            Stage::ChatDownload => &mut self.chat_download,
            Stage::ChatRender => &mut self.chat_render,
            Stage::ChatMove => &mut self.chat_move,
        };
        *slot = status;
    }

    pub fn track_busy(&self, track: Track) -> bool {
        match track {
            Track::Video => self.video_processing,
            Track::Chat => self.chat_processing,
        }
    }

    /// True iff any stage is currently running.
    pub fn any_running(&self) -> bool {
        Stage::ALL
            .iter()
            .any(|s| self.stage_status(*s) == StageStatus::Running)
    }

    fn deps_satisfied(&self, stage: Stage) -> bool {
        stage
            .dependencies()
            .iter()
            .all(|d| self.stage_status(*d) == StageStatus::Success)
    }

    fn deps_failed(&self, stage: Stage) -> bool {
        stage
            .dependencies()
            .iter()
            .any(|d| self.stage_status(*d) == StageStatus::Failed)
    }

    /// Live archives may download while the stream is still running, but
    /// finalization stages wait for the persisted stream-end signal.
    fn finalization_blocked(&self, stage: Stage) -> bool {
        stage.is_finalization() && self.live_archive && !self.stream_ended
    }

    /// Whether this stage could be claimed right now.
    pub fn stage_eligible(&self, stage: Stage) -> bool {
        !self.on_hold
            && !self.track_busy(stage.track())
            && self.stage_status(stage) == StageStatus::Pending
            && self.deps_satisfied(stage)
            && !self.finalization_blocked(stage)
    }

    /// The earliest pending stage on the track whose dependencies are all
    /// satisfied, or `None` if the track is busy, held, blocked by a failed
    /// dependency, gated on stream end, or fully terminal.
    pub fn next_eligible(&self, track: Track) -> Option<Stage> {
        if self.on_hold || self.track_busy(track) {
            return None;
        }
        for stage in Stage::track_stages(track) {
            match self.stage_status(*stage) {
                StageStatus::Success => continue,
                StageStatus::Pending => {
                    if self.deps_failed(*stage) || self.finalization_blocked(*stage) {
                        return None;
                    }
                    if self.deps_satisfied(*stage) {
                        return Some(*stage);
                    }
                    // Waiting on a stage of the other track.
                    return None;
                }
                // Running or failed stops the track until completion/retry.
                StageStatus::Running | StageStatus::Failed => return None,
            }
        }
        None
    }

    /// Eligible stages across both tracks, at most one per track.
    pub fn eligible_stages(&self) -> Vec<Stage> {
        Track::ALL
            .iter()
            .filter_map(|t| self.next_eligible(*t))
            .collect()
    }

    /// All stages reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        Stage::ALL
            .iter()
            .all(|s| self.stage_status(*s).is_terminal())
    }

    /// True when the archive finished completely.
    pub fn is_complete(&self) -> bool {
        Stage::ALL
            .iter()
            .all(|s| self.stage_status(*s) == StageStatus::Success)
    }
}
