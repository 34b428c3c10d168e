//! Queue database model and domain conversions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;

use crate::queue::{QueueItem, Stage, StageStatus};
use crate::{Error, Result};

/// Queue row as stored in SQLite.
///
/// Statuses and timestamps are kept as strings in the database; the domain
/// entity uses typed enums and `chrono` timestamps.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QueueItemDbModel {
    pub id: String,
    pub vod_id: String,
    pub channel_id: String,
    pub live_archive: bool,
    pub stream_ended: bool,
    pub on_hold: bool,
    pub video_processing: bool,
    pub chat_processing: bool,
    pub processing: bool,
    pub create_folder: String,
    pub download_thumbnail: String,
    pub save_info: String,
    pub video_download: String,
    pub video_move: String,
    pub chat_download: String,
    pub chat_render: String,
    pub chat_move: String,
    pub error_stage: Option<String>,
    pub error_message: Option<String>,
    pub error_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

fn parse_status(column: &str, raw: &str) -> Result<StageStatus> {
    StageStatus::parse(raw).ok_or_else(|| {
        Error::Validation(format!("invalid stage status '{raw}' in column {column}"))
    })
}

fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Validation(format!("invalid timestamp in column {column}: {e}")))
}

impl QueueItemDbModel {
    pub fn from_domain(item: &QueueItem) -> Self {
        Self {
            id: item.id.clone(),
            vod_id: item.vod_id.clone(),
            channel_id: item.channel_id.clone(),
            live_archive: item.live_archive,
            stream_ended: item.stream_ended,
            on_hold: item.on_hold,
            video_processing: item.video_processing,
            chat_processing: item.chat_processing,
            processing: item.processing,
            create_folder: item.create_folder.as_str().to_string(),
            download_thumbnail: item.download_thumbnail.as_str().to_string(),
            save_info: item.save_info.as_str().to_string(),
            video_download: item.video_download.as_str().to_string(),
            video_move: item.video_move.as_str().to_string(),
            chat_download: item.chat_download.as_str().to_string(),
            chat_render: item.chat_render.as_str().to_string(),
            chat_move: item.chat_move.as_str().to_string(),
            error_stage: item.error_stage.map(|s| s.to_string()),
            error_message: item.error_message.clone(),
            error_at: item.error_at.map(|t| t.to_rfc3339()),
            created_at: item.created_at.to_rfc3339(),
            updated_at: item.updated_at.to_rfc3339(),
        }
    }

    pub fn to_domain(&self) -> Result<QueueItem> {
        let error_stage = match &self.error_stage {
            Some(raw) => Some(Stage::from_str(raw).map_err(|_| {
                Error::Validation(format!("invalid stage '{raw}' in column error_stage"))
            })?),
            None => None,
        };
        let error_at = match &self.error_at {
            Some(raw) => Some(parse_timestamp("error_at", raw)?),
            None => None,
        };
        Ok(QueueItem {
            id: self.id.clone(),
            vod_id: self.vod_id.clone(),
            channel_id: self.channel_id.clone(),
            live_archive: self.live_archive,
            stream_ended: self.stream_ended,
            on_hold: self.on_hold,
            video_processing: self.video_processing,
            chat_processing: self.chat_processing,
            processing: self.processing,
            create_folder: parse_status("create_folder", &self.create_folder)?,
            download_thumbnail: parse_status("download_thumbnail", &self.download_thumbnail)?,
            save_info: parse_status("save_info", &self.save_info)?,
            video_download: parse_status("video_download", &self.video_download)?,
            video_move: parse_status("video_move", &self.video_move)?,
            chat_download: parse_status("chat_download", &self.chat_download)?,
            chat_render: parse_status("chat_render", &self.chat_render)?,
            chat_move: parse_status("chat_move", &self.chat_move)?,
            error_stage,
            error_message: self.error_message.clone(),
            error_at,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_roundtrip() {
        let mut item = QueueItem::new("vod-1", "channel-1", true);
        item.set_stage_status(Stage::CreateFolder, StageStatus::Success);
        item.error_stage = Some(Stage::VideoDownload);
        item.error_message = Some("network reset".to_string());
        item.error_at = Some(Utc::now());

        let model = QueueItemDbModel::from_domain(&item);
        assert_eq!(model.create_folder, "SUCCESS");
        assert_eq!(model.error_stage.as_deref(), Some("video_download"));

        let back = model.to_domain().unwrap();
        assert_eq!(back.id, item.id);
        assert_eq!(back.create_folder, StageStatus::Success);
        assert_eq!(back.error_stage, Some(Stage::VideoDownload));
        assert!(back.live_archive);
    }

    #[test]
    fn test_invalid_status_rejected() {
        let mut model = QueueItemDbModel::from_domain(&QueueItem::new("v", "c", false));
        model.video_download = "EXPLODED".to_string();
        assert!(model.to_domain().is_err());
    }
}
