//! Named background tasks run by the dispatcher.
//!
//! These are pure checks distinct from stage advancement: live-status
//! polling, VOD discovery and hold release. Each can run on its interval or
//! be triggered on demand by name.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::Result;
use crate::database::QueueRepository;
use crate::monitor::{ArchiveEvent, EventBroadcaster, PlatformSource};
use crate::queue::{NewQueueItem, QueueItem, QueueService};

/// A named dispatcher task.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    CheckLive,
    CheckVod,
    QueueHoldCheck,
}

/// Decides whether a held queue item may be released.
#[async_trait]
pub trait HoldPolicy: Send + Sync {
    async fn may_release(&self, item: &QueueItem) -> bool;
}

/// Releases held items once the archive volume has enough free space.
pub struct DiskSpaceHoldPolicy {
    archive_root: PathBuf,
    min_free_bytes: u64,
}

impl DiskSpaceHoldPolicy {
    pub fn new(archive_root: PathBuf, min_free_bytes: u64) -> Self {
        Self {
            archive_root,
            min_free_bytes,
        }
    }
}

#[async_trait]
impl HoldPolicy for DiskSpaceHoldPolicy {
    async fn may_release(&self, _item: &QueueItem) -> bool {
        match available_space(&self.archive_root) {
            Some(free) => free >= self.min_free_bytes,
            None => {
                warn!(
                    path = %self.archive_root.display(),
                    "could not determine free space, keeping hold"
                );
                false
            }
        }
    }
}

/// Free bytes on the volume containing `path`, via the most specific mount.
fn available_space(path: &Path) -> Option<u64> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| d.available_space())
}

pub struct BackgroundTasks {
    repo: Arc<dyn QueueRepository>,
    platform: Arc<dyn PlatformSource>,
    service: Arc<QueueService>,
    hold_policy: Arc<dyn HoldPolicy>,
    events: EventBroadcaster,
    scan_notify: Arc<Notify>,
}

impl BackgroundTasks {
    pub fn new(
        repo: Arc<dyn QueueRepository>,
        platform: Arc<dyn PlatformSource>,
        service: Arc<QueueService>,
        hold_policy: Arc<dyn HoldPolicy>,
        events: EventBroadcaster,
        scan_notify: Arc<Notify>,
    ) -> Self {
        Self {
            repo,
            platform,
            service,
            hold_policy,
            events,
            scan_notify,
        }
    }

    pub async fn run(&self, kind: TaskKind) -> Result<()> {
        match kind {
            TaskKind::CheckLive => self.check_live().await,
            TaskKind::CheckVod => self.check_vod().await,
            TaskKind::QueueHoldCheck => self.queue_hold_check().await,
        }
    }

    /// Poll live status for tracked channels and persist the stream-end
    /// signal for channels that are no longer broadcasting.
    ///
    /// A `live_archive` item with `stream_ended = 0` proves the stream was
    /// live when archiving began, so "platform reports not live" is the end
    /// signal by itself. No in-memory state is involved: an ending missed
    /// across a restart is picked up on the first poll, and the UPDATE's
    /// `stream_ended = 0` guard makes repeated polls idempotent.
    pub async fn check_live(&self) -> Result<()> {
        for channel_id in self.platform.tracked_channels().await? {
            let live = match self.platform.is_live(&channel_id).await {
                Ok(live) => live,
                Err(e) => {
                    warn!(%channel_id, "live check failed: {e}");
                    continue;
                }
            };
            if live {
                continue;
            }

            let unblocked = self.repo.mark_stream_ended_for_channel(&channel_id).await?;
            if unblocked == 0 {
                continue;
            }
            info!(%channel_id, unblocked, "stream ended, finalization unblocked");
            self.events.emit(ArchiveEvent::StreamEnded {
                channel_id: channel_id.clone(),
                items_unblocked: unblocked,
                timestamp: chrono::Utc::now(),
            });
            self.scan_notify.notify_one();
        }
        Ok(())
    }

    /// Discover new VODs on tracked channels and register queue items.
    pub async fn check_vod(&self) -> Result<()> {
        for channel_id in self.platform.tracked_channels().await? {
            let vods = match self.platform.channel_vods(&channel_id).await {
                Ok(vods) => vods,
                Err(e) => {
                    warn!(%channel_id, "vod discovery failed: {e}");
                    continue;
                }
            };
            for vod in vods {
                if self.repo.get_by_vod(&vod.id).await?.is_some() {
                    continue;
                }
                let request = NewQueueItem {
                    vod_id: vod.id.clone(),
                    channel_id: channel_id.clone(),
                    live_archive: vod.live,
                };
                match self.service.enqueue_job(request).await {
                    Ok(item) => {
                        info!(item_id = %item.id, vod_id = %vod.id, "discovered new VOD")
                    }
                    // Raced with another registration; nothing to do.
                    Err(crate::Error::Validation(_)) => {}
                    Err(e) => warn!(vod_id = %vod.id, "failed to enqueue discovered VOD: {e}"),
                }
            }
        }
        Ok(())
    }

    /// Re-evaluate held items against the hold policy and release the ones
    /// that are allowed to run again.
    pub async fn queue_hold_check(&self) -> Result<()> {
        for row in self.repo.list_held().await? {
            let item = match row.to_domain() {
                Ok(item) => item,
                Err(e) => {
                    warn!(item_id = %row.id, "skipping undecodable held item: {e}");
                    continue;
                }
            };
            if !self.hold_policy.may_release(&item).await {
                debug!(item_id = %item.id, "hold policy keeps item held");
                continue;
            }
            self.repo.set_hold(&item.id, false).await?;
            info!(item_id = %item.id, "hold released");
            self.events.emit(ArchiveEvent::HoldReleased {
                item_id: item.id.clone(),
                timestamp: chrono::Utc::now(),
            });
            self.scan_notify.notify_one();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_task_kind_names() {
        assert_eq!(TaskKind::CheckLive.to_string(), "check_live");
        assert_eq!(TaskKind::QueueHoldCheck.to_string(), "queue_hold_check");
        assert_eq!(TaskKind::from_str("check_vod").unwrap(), TaskKind::CheckVod);
        assert!(TaskKind::from_str("get_jwks").is_err());
    }
}
