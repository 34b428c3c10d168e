//! Pipeline driver: claims a stage, runs its side effect, commits the
//! resulting transition.
//!
//! Execution failures never propagate past the driver; they are recorded on
//! the queue item and surfaced through the status read model. Only lost
//! claims (`Error::Conflict`) and store errors bubble up to the dispatcher.

use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::database::QueueRepository;
use crate::monitor::{ArchiveEvent, EventBroadcaster};
use crate::pipeline::context::{ArchiveLayout, StageContext};
use crate::pipeline::executors::{ExecutorRegistry, StageError};
use crate::queue::{QueueItem, Stage, StageStatus};
use crate::{Error, Result};

pub struct PipelineDriver {
    repo: Arc<dyn QueueRepository>,
    executors: Arc<ExecutorRegistry>,
    config: Arc<Config>,
    events: EventBroadcaster,
    /// Per-item cancellation tokens, reference-counted per in-flight stage
    /// so the entry disappears once the last execution finishes.
    cancellations: DashMap<String, (CancellationToken, usize)>,
}

impl PipelineDriver {
    pub fn new(
        repo: Arc<dyn QueueRepository>,
        executors: Arc<ExecutorRegistry>,
        config: Arc<Config>,
        events: EventBroadcaster,
    ) -> Self {
        Self {
            repo,
            executors,
            config,
            events,
            cancellations: DashMap::new(),
        }
    }

    fn layout_for(&self, item: &QueueItem) -> ArchiveLayout {
        ArchiveLayout::new(
            &self.config.temp_root,
            &self.config.archive_root,
            &item.channel_id,
            &item.vod_id,
        )
    }

    fn acquire_cancellation(&self, item_id: &str) -> CancellationToken {
        let mut entry = self
            .cancellations
            .entry(item_id.to_string())
            .or_insert_with(|| (CancellationToken::new(), 0));
        entry.1 += 1;
        entry.0.clone()
    }

    fn release_cancellation(&self, item_id: &str) {
        if let Some(mut entry) = self.cancellations.get_mut(item_id) {
            entry.1 = entry.1.saturating_sub(1);
            if entry.1 > 0 {
                return;
            }
        }
        self.cancellations.remove_if(item_id, |_, (_, refs)| *refs == 0);
    }

    /// Advance one stage of one item.
    ///
    /// Re-checks eligibility on a fresh read, claims the stage exclusively,
    /// runs the executor, and commits SUCCESS or FAILED. Out-of-order
    /// requests are rejected with `Error::DependencyNotReady` and leave no
    /// state behind; `Error::Conflict` means the claim was lost to a
    /// concurrent worker and the dispatcher retries on its next scan.
    pub async fn advance(&self, item: &QueueItem, stage: Stage) -> Result<()> {
        let current = self.repo.get(&item.id).await?.to_domain()?;
        if current.on_hold
            || current.track_busy(stage.track())
            || current.stage_status(stage) != StageStatus::Pending
        {
            return Err(Error::conflict(format!(
                "stage {stage} of item {} is not claimable",
                item.id
            )));
        }
        if !current.stage_eligible(stage) {
            let unmet: Vec<String> = stage
                .dependencies()
                .iter()
                .filter(|d| current.stage_status(**d) != StageStatus::Success)
                .map(|d| d.to_string())
                .collect();
            let reason = if unmet.is_empty() {
                "stream has not ended".to_string()
            } else {
                format!("waiting on {}", unmet.join(", "))
            };
            return Err(Error::DependencyNotReady {
                stage: stage.to_string(),
                reason,
            });
        }

        if !self.repo.claim_stage(&item.id, stage).await? {
            return Err(Error::conflict(format!(
                "stage {stage} of item {} was claimed elsewhere",
                item.id
            )));
        }
        debug!(item_id = %item.id, vod_id = %item.vod_id, %stage, "stage claimed");

        let cancellation = self.acquire_cancellation(&item.id);
        let result = self.run_claimed(&current, stage, cancellation).await;
        self.release_cancellation(&item.id);
        result
    }

    async fn run_claimed(
        &self,
        item: &QueueItem,
        stage: Stage,
        cancellation: CancellationToken,
    ) -> Result<()> {
        let ctx = StageContext {
            item: item.clone(),
            layout: self.layout_for(item),
            cancellation,
        };

        let Some(executor) = self.executors.get(stage) else {
            // Nothing can run this stage; park it as failed for the operator.
            let err = Error::Execution {
                stage: stage.to_string(),
                message: "no executor registered".to_string(),
            };
            self.commit_failure(&item.id, stage, &err).await?;
            return Ok(());
        };

        let outcome =
            tokio::time::timeout(self.config.stage_timeout, executor.execute(&ctx)).await;

        match outcome {
            Ok(Ok(())) => {
                if !self.repo.complete_stage(&item.id, stage).await? {
                    warn!(
                        item_id = %item.id,
                        %stage,
                        "success commit found stage no longer running"
                    );
                    return Ok(());
                }
                info!(item_id = %item.id, vod_id = %item.vod_id, %stage, "stage completed");
                self.events.emit(ArchiveEvent::StageCompleted {
                    item_id: item.id.clone(),
                    stage,
                    timestamp: chrono::Utc::now(),
                });
                Ok(())
            }
            Ok(Err(StageError::Cancelled)) => {
                let err = Error::Cancelled("operator cancellation or VOD deletion".to_string());
                self.commit_failure(&item.id, stage, &err).await
            }
            Ok(Err(StageError::Failed(message))) => {
                let err = Error::Execution {
                    stage: stage.to_string(),
                    message,
                };
                self.commit_failure(&item.id, stage, &err).await
            }
            Err(_) => {
                let err = Error::Execution {
                    stage: stage.to_string(),
                    message: format!("timed out after {}s", self.config.stage_timeout.as_secs()),
                };
                self.commit_failure(&item.id, stage, &err).await
            }
        }
    }

    /// Record an execution failure on the item. The error never propagates
    /// past the driver; it is stored and surfaced through the status model.
    async fn commit_failure(&self, item_id: &str, stage: Stage, error: &Error) -> Result<()> {
        let message = error.to_string();
        if !self.repo.fail_stage(item_id, stage, &message).await? {
            warn!(%item_id, %stage, "failure commit found stage no longer running");
            return Ok(());
        }
        warn!(%item_id, %stage, error = %message, "stage failed");
        self.events.emit(ArchiveEvent::StageFailed {
            item_id: item_id.to_string(),
            stage,
            message,
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    /// Crash recovery: stages persisted as RUNNING with no live execution.
    ///
    /// Resumable stages go back to PENDING and are re-claimed by the normal
    /// scan; non-resumable ones are marked FAILED for operator retry. Either
    /// way nothing stays stuck in RUNNING. Returns the number of stages
    /// handled.
    pub async fn recover(&self) -> Result<usize> {
        let rows = self.repo.list_running().await?;
        let mut handled = 0;

        for row in rows {
            let item = row.to_domain()?;
            for stage in Stage::ALL {
                if item.stage_status(stage) != StageStatus::Running {
                    continue;
                }
                let resumable = self
                    .executors
                    .get(stage)
                    .map(|e| e.resumable())
                    .unwrap_or(false);

                if resumable {
                    if self.repo.reset_stage(&item.id, stage).await? {
                        info!(
                            item_id = %item.id,
                            %stage,
                            "interrupted stage reset to pending for re-run"
                        );
                        handled += 1;
                    }
                } else if self
                    .repo
                    .fail_stage(
                        &item.id,
                        stage,
                        "interrupted and cannot safely resume; retry manually",
                    )
                    .await?
                {
                    warn!(item_id = %item.id, %stage, "interrupted stage marked failed");
                    handled += 1;
                }
            }
        }

        if handled > 0 {
            info!("Recovered {handled} interrupted stage(s)");
        }
        Ok(handled)
    }

    /// Cancel any in-flight execution for an item. Used by delete and
    /// explicit cancellation; the running executor observes the token and
    /// the stage commits as failed with a cancellation reason.
    pub fn cancel_item(&self, item_id: &str) {
        if let Some((_, (token, _))) = self.cancellations.remove(item_id) {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{QueueItemDbModel, SqlxQueueRepository, run_migrations};
    use crate::pipeline::executors::CreateFolderExecutor;
    use std::time::Duration;

    async fn test_driver() -> (PipelineDriver, Arc<SqlxQueueRepository>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        // Single connection so `sqlite::memory:` is one database.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        let repo = Arc::new(SqlxQueueRepository::new(pool));

        let config = Arc::new(Config {
            database_url: "sqlite::memory:".to_string(),
            archive_root: dir.path().join("archive"),
            temp_root: dir.path().join("tmp"),
            platform_api_url: "http://localhost:0".to_string(),
            scan_interval: Duration::from_millis(50),
            live_check_interval: Duration::from_secs(60),
            vod_check_interval: Duration::from_secs(60),
            hold_check_interval: Duration::from_secs(60),
            max_workers: 2,
            stage_timeout: Duration::from_secs(10),
            min_free_bytes: 0,
            video_download_cmd: "true".to_string(),
            chat_download_cmd: "true".to_string(),
            chat_render_cmd: "true".to_string(),
        });

        let mut executors = ExecutorRegistry::new();
        executors.register(Arc::new(CreateFolderExecutor));
        let driver = PipelineDriver::new(
            repo.clone(),
            Arc::new(executors),
            config,
            EventBroadcaster::default(),
        );
        (driver, repo, dir)
    }

    async fn seed(repo: &SqlxQueueRepository) -> QueueItem {
        let item = QueueItem::new("vod-1", "channel-1", false);
        repo.create(&QueueItemDbModel::from_domain(&item))
            .await
            .unwrap();
        item
    }

    #[tokio::test]
    async fn test_out_of_order_advance_is_rejected_without_state_change() {
        let (driver, repo, _dir) = test_driver().await;
        let item = seed(&repo).await;

        let err = driver.advance(&item, Stage::VideoMove).await.unwrap_err();
        match err {
            Error::DependencyNotReady { stage, reason } => {
                assert_eq!(stage, "video_move");
                assert!(reason.contains("video_download"), "reason: {reason}");
            }
            other => panic!("unexpected error: {other}"),
        }

        let row = repo.get(&item.id).await.unwrap();
        assert_eq!(row.video_move, "PENDING");
        assert!(!row.video_processing);
        assert!(!row.processing);
        assert!(row.error_message.is_none());
    }

    #[tokio::test]
    async fn test_cancellation_tokens_are_released_after_advance() {
        let (driver, repo, _dir) = test_driver().await;
        let item = seed(&repo).await;

        driver.advance(&item, Stage::CreateFolder).await.unwrap();
        assert_eq!(
            repo.get(&item.id).await.unwrap().create_folder,
            "SUCCESS"
        );
        assert!(driver.cancellations.is_empty());

        // Failure commits release the token too.
        let fresh = repo.get(&item.id).await.unwrap().to_domain().unwrap();
        driver
            .advance(&fresh, Stage::DownloadThumbnail)
            .await
            .unwrap();
        assert_eq!(
            repo.get(&item.id).await.unwrap().download_thumbnail,
            "FAILED"
        );
        assert!(driver.cancellations.is_empty());
    }
}
