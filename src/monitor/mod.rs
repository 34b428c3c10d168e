//! External platform collaborators and archive events.
//!
//! The pipeline never scrapes platforms itself; it talks to an external
//! catalog service through the traits below and broadcasts events for
//! anything watching the archive (notifications, UI).

pub mod http;

pub use http::HttpPlatformClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::Result;
use crate::queue::Stage;

/// VOD metadata as provided by the external catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VodRecord {
    pub id: String,
    /// Platform-side identifier.
    pub ext_id: String,
    pub channel_id: String,
    pub title: String,
    pub source_url: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    /// True if the platform still reports this VOD as an ongoing broadcast.
    #[serde(default)]
    pub live: bool,
    #[serde(default)]
    pub duration_secs: Option<u64>,
}

/// Read access to VOD metadata, used by stage executors.
#[async_trait]
pub trait VodCatalog: Send + Sync {
    async fn get_vod(&self, vod_id: &str) -> Result<VodRecord>;
}

/// Platform-facing queries used by the background tasks.
#[async_trait]
pub trait PlatformSource: Send + Sync {
    /// Channels the archiver is watching.
    async fn tracked_channels(&self) -> Result<Vec<String>>;
    /// Whether a channel is currently broadcasting.
    async fn is_live(&self, channel_id: &str) -> Result<bool>;
    /// Known VODs for a channel, newest first.
    async fn channel_vods(&self, channel_id: &str) -> Result<Vec<VodRecord>>;
}

/// Events emitted by the archive pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ArchiveEvent {
    /// A watched channel's stream ended; finalization stages of its live
    /// archives are now unblocked.
    StreamEnded {
        channel_id: String,
        items_unblocked: u64,
        timestamp: DateTime<Utc>,
    },
    /// A new queue item was registered.
    ItemEnqueued {
        item_id: String,
        vod_id: String,
        live_archive: bool,
        timestamp: DateTime<Utc>,
    },
    /// A stage finished successfully.
    StageCompleted {
        item_id: String,
        stage: Stage,
        timestamp: DateTime<Utc>,
    },
    /// A stage failed and is waiting for operator retry.
    StageFailed {
        item_id: String,
        stage: Stage,
        message: String,
        timestamp: DateTime<Utc>,
    },
    /// A held item was released by the hold policy.
    HoldReleased {
        item_id: String,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast-channel fan-out for [`ArchiveEvent`]s.
///
/// Cloning is cheap; all clones share the same channel. Emitting never
/// fails: with no subscribers the event is simply dropped.
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<ArchiveEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArchiveEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ArchiveEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcaster_delivers_to_subscribers() {
        let events = EventBroadcaster::new(8);
        let mut rx = events.subscribe();
        events.emit(ArchiveEvent::StreamEnded {
            channel_id: "channel-1".to_string(),
            items_unblocked: 2,
            timestamp: Utc::now(),
        });
        match rx.recv().await.unwrap() {
            ArchiveEvent::StreamEnded {
                channel_id,
                items_unblocked,
                ..
            } => {
                assert_eq!(channel_id, "channel-1");
                assert_eq!(items_unblocked, 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let events = EventBroadcaster::new(8);
        events.emit(ArchiveEvent::HoldReleased {
            item_id: "x".to_string(),
            timestamp: Utc::now(),
        });
    }
}
