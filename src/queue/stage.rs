//! Archival stage definitions: statuses, tracks and the dependency graph.
//!
//! This is pure logic with no I/O. The rest of the pipeline consults this
//! module to decide which stage of a queue item may run next.

use serde::{Deserialize, Serialize};

/// One discrete unit of archival work for a queue item.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    CreateFolder,
    DownloadThumbnail,
    SaveInfo,
    VideoDownload,
    VideoMove,
    ChatDownload,
    ChatRender,
    ChatMove,
}

impl Stage {
    /// All stages in track order: video track first, then chat track.
    pub const ALL: [Stage; 8] = [
        Stage::CreateFolder,
        Stage::DownloadThumbnail,
        Stage::SaveInfo,
        Stage::VideoDownload,
        Stage::VideoMove,
        Stage::ChatDownload,
        Stage::ChatRender,
        Stage::ChatMove,
    ];

    /// The track this stage runs on. Tracks execute serially within
    /// themselves and concurrently with each other.
    pub fn track(&self) -> Track {
        match self {
            Stage::CreateFolder
            | Stage::DownloadThumbnail
            | Stage::SaveInfo
            | Stage::VideoDownload
            | Stage::VideoMove => Track::Video,
            Stage::ChatDownload | Stage::ChatRender | Stage::ChatMove => Track::Chat,
        }
    }

    /// Stages that must be `Success` before this stage may start.
    ///
    /// The setup stages (folder, thumbnail, info) all gate the video
    /// download; the chat track only needs the folder to exist.
    pub fn dependencies(&self) -> &'static [Stage] {
        match self {
            Stage::CreateFolder => &[],
            Stage::DownloadThumbnail => &[Stage::CreateFolder],
            Stage::SaveInfo => &[Stage::CreateFolder],
            Stage::VideoDownload => &[
                Stage::CreateFolder,
                Stage::DownloadThumbnail,
                Stage::SaveInfo,
            ],
            Stage::VideoMove => &[Stage::VideoDownload],
            Stage::ChatDownload => &[Stage::CreateFolder],
            Stage::ChatRender => &[Stage::ChatDownload],
            Stage::ChatMove => &[Stage::ChatRender],
        }
    }

    /// Finalization stages need the final file sizes and duration, which are
    /// only known after a live stream ends. For live archives these stay
    /// blocked until the stream-end signal is persisted.
    pub fn is_finalization(&self) -> bool {
        matches!(self, Stage::VideoMove | Stage::ChatRender | Stage::ChatMove)
    }

    /// Database column holding this stage's status.
    pub fn column(&self) -> &'static str {
        match self {
            Stage::CreateFolder => "create_folder",
            Stage::DownloadThumbnail => "download_thumbnail",
            Stage::SaveInfo => "save_info",
            Stage::VideoDownload => "video_download",
            Stage::VideoMove => "video_move",
            Stage::ChatDownload => "chat_download",
            Stage::ChatRender => "chat_render",
            Stage::ChatMove => "chat_move",
        }
    }

    /// Stages belonging to the given track, in execution order.
    pub fn track_stages(track: Track) -> &'static [Stage] {
        match track {
            Track::Video => &[
                Stage::CreateFolder,
                Stage::DownloadThumbnail,
                Stage::SaveInfo,
                Stage::VideoDownload,
                Stage::VideoMove,
            ],
            Track::Chat => &[Stage::ChatDownload, Stage::ChatRender, Stage::ChatMove],
        }
    }
}

/// The video or chat sub-pipeline of a queue item.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Track {
    Video,
    Chat,
}

impl Track {
    pub const ALL: [Track; 2] = [Track::Video, Track::Chat];

    /// Database column holding this track's in-flight flag.
    pub fn flag_column(&self) -> &'static str {
        match self {
            Track::Video => "video_processing",
            Track::Chat => "chat_processing",
        }
    }

    /// The in-flight flag column of the opposite track.
    pub fn other_flag_column(&self) -> &'static str {
        match self {
            Track::Video => "chat_processing",
            Track::Chat => "video_processing",
        }
    }
}

/// Status of a single stage.
///
/// `Pending -> Running -> {Success | Failed}`; `Failed -> Pending` only via
/// an explicit operator retry.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "RUNNING" => Some(Self::Running),
            "SUCCESS" => Some(Self::Success),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_every_stage_has_a_track() {
        let video = Stage::track_stages(Track::Video);
        let chat = Stage::track_stages(Track::Chat);
        assert_eq!(video.len() + chat.len(), Stage::ALL.len());
        for stage in Stage::ALL {
            assert!(Stage::track_stages(stage.track()).contains(&stage));
        }
    }

    #[test]
    fn test_dependency_graph_is_acyclic() {
        // Every dependency must appear earlier in the track-ordered ALL list,
        // which rules out cycles.
        for (i, stage) in Stage::ALL.iter().enumerate() {
            for dep in stage.dependencies() {
                let dep_pos = Stage::ALL.iter().position(|s| s == dep).unwrap();
                assert!(dep_pos < i, "{dep} must precede {stage}");
            }
        }
    }

    #[test]
    fn test_setup_stages_gate_video_download() {
        let deps = Stage::VideoDownload.dependencies();
        assert!(deps.contains(&Stage::CreateFolder));
        assert!(deps.contains(&Stage::DownloadThumbnail));
        assert!(deps.contains(&Stage::SaveInfo));
    }

    #[test]
    fn test_finalization_stages() {
        assert!(Stage::VideoMove.is_finalization());
        assert!(Stage::ChatRender.is_finalization());
        assert!(Stage::ChatMove.is_finalization());
        assert!(!Stage::VideoDownload.is_finalization());
        assert!(!Stage::ChatDownload.is_finalization());
    }

    #[test]
    fn test_stage_string_roundtrip() {
        for stage in Stage::ALL {
            let s = stage.to_string();
            assert_eq!(Stage::from_str(&s).unwrap(), stage);
        }
        assert_eq!(Stage::from_str("video_download").unwrap(), Stage::VideoDownload);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(StageStatus::parse("RUNNING"), Some(StageStatus::Running));
        assert_eq!(StageStatus::parse("bogus"), None);
        assert!(StageStatus::Success.is_terminal());
        assert!(StageStatus::Failed.is_terminal());
        assert!(!StageStatus::Running.is_terminal());
    }
}
