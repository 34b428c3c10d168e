//! Queue service: the operations exposed to the surrounding system.

use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

use crate::database::{QueueItemDbModel, QueueRepository};
use crate::monitor::{ArchiveEvent, EventBroadcaster};
use crate::pipeline::PipelineDriver;
use crate::queue::{QueueItem, Stage, StageStatus};
use crate::{Error, Result};

/// Request to register a new archival job.
#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub vod_id: String,
    pub channel_id: String,
    /// True when the source is still broadcasting; finalization stages wait
    /// for the stream-end signal.
    pub live_archive: bool,
}

pub struct QueueService {
    repo: Arc<dyn QueueRepository>,
    driver: Arc<PipelineDriver>,
    /// Nudges the dispatcher so new work doesn't wait a full scan interval.
    scan_notify: Arc<Notify>,
    events: EventBroadcaster,
}

impl QueueService {
    pub fn new(
        repo: Arc<dyn QueueRepository>,
        driver: Arc<PipelineDriver>,
        scan_notify: Arc<Notify>,
        events: EventBroadcaster,
    ) -> Self {
        Self {
            repo,
            driver,
            scan_notify,
            events,
        }
    }

    /// Register a new archival job. Fails with a validation error when a
    /// queue item already exists for the VOD.
    pub async fn enqueue_job(&self, request: NewQueueItem) -> Result<QueueItem> {
        if request.vod_id.trim().is_empty() {
            return Err(Error::validation("vod_id must not be empty"));
        }
        if request.channel_id.trim().is_empty() {
            return Err(Error::validation("channel_id must not be empty"));
        }

        let item = QueueItem::new(request.vod_id, request.channel_id, request.live_archive);
        self.repo
            .create(&QueueItemDbModel::from_domain(&item))
            .await?;

        info!(
            item_id = %item.id,
            vod_id = %item.vod_id,
            live_archive = item.live_archive,
            "queue item enqueued"
        );
        self.events.emit(ArchiveEvent::ItemEnqueued {
            item_id: item.id.clone(),
            vod_id: item.vod_id.clone(),
            live_archive: item.live_archive,
            timestamp: chrono::Utc::now(),
        });
        self.scan_notify.notify_one();
        Ok(item)
    }

    /// Pause or resume a queue item. Holding does not reset progress.
    pub async fn set_hold(&self, id: &str, on_hold: bool) -> Result<()> {
        self.repo.set_hold(id, on_hold).await?;
        info!(item_id = %id, on_hold, "queue item hold updated");
        if !on_hold {
            self.scan_notify.notify_one();
        }
        Ok(())
    }

    /// Reset one failed stage back to pending, clearing its recorded error.
    /// Sibling and dependent stages are untouched.
    pub async fn retry_stage(&self, id: &str, stage: Stage) -> Result<()> {
        let item = self.repo.get(id).await?.to_domain()?;
        let status = item.stage_status(stage);
        if status != StageStatus::Failed {
            return Err(Error::validation(format!(
                "stage {stage} is {status}, only failed stages can be retried"
            )));
        }
        if !self.repo.retry_stage(id, stage).await? {
            // The stage moved under us between the read and the update.
            return Err(Error::conflict(format!(
                "stage {stage} of item {id} changed state during retry"
            )));
        }
        info!(item_id = %id, %stage, "stage reset for retry");
        self.scan_notify.notify_one();
        Ok(())
    }

    /// Status read model for UI/API.
    pub async fn get_status(&self, id: &str) -> Result<QueueItem> {
        self.repo.get(id).await?.to_domain()
    }

    pub async fn list(&self) -> Result<Vec<QueueItem>> {
        self.repo
            .list()
            .await?
            .iter()
            .map(|m| m.to_domain())
            .collect()
    }

    /// Delete a queue item, cancelling any in-flight stage execution first.
    /// Called on its own or as part of the owning VOD's cascade delete.
    pub async fn delete_item(&self, id: &str) -> Result<()> {
        // Ensure the item exists so callers get a NotFound, not silence.
        self.repo.get(id).await?;
        self.driver.cancel_item(id);
        self.repo.delete(id).await?;
        info!(item_id = %id, "queue item deleted");
        Ok(())
    }
}
