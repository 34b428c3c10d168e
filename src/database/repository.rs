//! Queue repository.
//!
//! Stage transitions are compare-and-swap style conditional updates: the
//! UPDATE only matches when the row is still in the expected state, and
//! `rows_affected` tells the caller whether the transition won. This is what
//! makes concurrent dispatch safe without a global lock.

use async_trait::async_trait;

use super::DbPool;
use super::models::QueueItemDbModel;
use crate::queue::Stage;
use crate::{Error, Result};

/// Store contract for queue items.
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Insert a new queue item. Fails with a validation error if an item
    /// already exists for the VOD.
    async fn create(&self, item: &QueueItemDbModel) -> Result<()>;
    async fn get(&self, id: &str) -> Result<QueueItemDbModel>;
    async fn get_by_vod(&self, vod_id: &str) -> Result<Option<QueueItemDbModel>>;
    async fn list(&self) -> Result<Vec<QueueItemDbModel>>;
    /// Items not on hold with at least one pending stage.
    async fn list_active(&self) -> Result<Vec<QueueItemDbModel>>;
    async fn list_held(&self) -> Result<Vec<QueueItemDbModel>>;
    /// Items with at least one stage stuck in RUNNING (crash recovery).
    async fn list_running(&self) -> Result<Vec<QueueItemDbModel>>;

    /// Exclusively claim a stage: PENDING -> RUNNING, track flag set.
    /// Returns false if the claim was lost (stage no longer pending, track
    /// busy, or item held).
    async fn claim_stage(&self, id: &str, stage: Stage) -> Result<bool>;
    /// Commit a successful stage: RUNNING -> SUCCESS, track flag cleared,
    /// `processing` recomputed from the other track. Atomic.
    async fn complete_stage(&self, id: &str, stage: Stage) -> Result<bool>;
    /// Commit a failed stage: RUNNING -> FAILED with the error recorded.
    async fn fail_stage(&self, id: &str, stage: Stage, error: &str) -> Result<bool>;
    /// Operator retry: FAILED -> PENDING, recorded error cleared.
    async fn retry_stage(&self, id: &str, stage: Stage) -> Result<bool>;
    /// Crash recovery for resumable stages: RUNNING -> PENDING, track flag
    /// cleared.
    async fn reset_stage(&self, id: &str, stage: Stage) -> Result<bool>;

    async fn set_hold(&self, id: &str, on_hold: bool) -> Result<()>;
    /// Persist the stream-end signal for every live archive of a channel.
    /// Returns the number of items unblocked.
    async fn mark_stream_ended_for_channel(&self, channel_id: &str) -> Result<u64>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// SQLx implementation of [`QueueRepository`].
pub struct SqlxQueueRepository {
    pool: DbPool,
}

impl SqlxQueueRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[async_trait]
impl QueueRepository for SqlxQueueRepository {
    async fn create(&self, item: &QueueItemDbModel) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO queue (
                id, vod_id, channel_id, live_archive, stream_ended, on_hold,
                video_processing, chat_processing, processing,
                create_folder, download_thumbnail, save_info,
                video_download, video_move,
                chat_download, chat_render, chat_move,
                error_stage, error_message, error_at,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.id)
        .bind(&item.vod_id)
        .bind(&item.channel_id)
        .bind(item.live_archive)
        .bind(item.stream_ended)
        .bind(item.on_hold)
        .bind(item.video_processing)
        .bind(item.chat_processing)
        .bind(item.processing)
        .bind(&item.create_folder)
        .bind(&item.download_thumbnail)
        .bind(&item.save_info)
        .bind(&item.video_download)
        .bind(&item.video_move)
        .bind(&item.chat_download)
        .bind(&item.chat_render)
        .bind(&item.chat_move)
        .bind(&item.error_stage)
        .bind(&item.error_message)
        .bind(&item.error_at)
        .bind(&item.created_at)
        .bind(&item.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(Error::validation(
                format!("queue item already exists for vod {}", item.vod_id),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &str) -> Result<QueueItemDbModel> {
        sqlx::query_as::<_, QueueItemDbModel>("SELECT * FROM queue WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("QueueItem", id))
    }

    async fn get_by_vod(&self, vod_id: &str) -> Result<Option<QueueItemDbModel>> {
        let item = sqlx::query_as::<_, QueueItemDbModel>("SELECT * FROM queue WHERE vod_id = ?")
            .bind(vod_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(item)
    }

    async fn list(&self) -> Result<Vec<QueueItemDbModel>> {
        let items =
            sqlx::query_as::<_, QueueItemDbModel>("SELECT * FROM queue ORDER BY created_at")
                .fetch_all(&self.pool)
                .await?;
        Ok(items)
    }

    async fn list_active(&self) -> Result<Vec<QueueItemDbModel>> {
        let items = sqlx::query_as::<_, QueueItemDbModel>(
            r#"
            SELECT * FROM queue
            WHERE on_hold = 0
              AND (create_folder = 'PENDING' OR download_thumbnail = 'PENDING'
                   OR save_info = 'PENDING' OR video_download = 'PENDING'
                   OR video_move = 'PENDING' OR chat_download = 'PENDING'
                   OR chat_render = 'PENDING' OR chat_move = 'PENDING')
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn list_held(&self) -> Result<Vec<QueueItemDbModel>> {
        let items = sqlx::query_as::<_, QueueItemDbModel>(
            "SELECT * FROM queue WHERE on_hold = 1 ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn list_running(&self) -> Result<Vec<QueueItemDbModel>> {
        let items = sqlx::query_as::<_, QueueItemDbModel>(
            r#"
            SELECT * FROM queue
            WHERE create_folder = 'RUNNING' OR download_thumbnail = 'RUNNING'
               OR save_info = 'RUNNING' OR video_download = 'RUNNING'
               OR video_move = 'RUNNING' OR chat_download = 'RUNNING'
               OR chat_render = 'RUNNING' OR chat_move = 'RUNNING'
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn claim_stage(&self, id: &str, stage: Stage) -> Result<bool> {
        let col = stage.column();
        let flag = stage.track().flag_column();
        // The store enforces the ordering invariant itself: every dependency
        // must already be SUCCESS, and finalization stages of a live archive
        // wait for the stream-end signal.
        let mut guards = String::new();
        for dep in stage.dependencies() {
            guards.push_str(&format!(" AND {} = 'SUCCESS'", dep.column()));
        }
        if stage.is_finalization() {
            guards.push_str(" AND (live_archive = 0 OR stream_ended = 1)");
        }
        // Column names come from static stage definitions, never user input.
        let sql = format!(
            "UPDATE queue SET {col} = 'RUNNING', {flag} = 1, processing = 1, updated_at = ? \
             WHERE id = ? AND {col} = 'PENDING' AND {flag} = 0 AND on_hold = 0{guards}"
        );
        let result = sqlx::query(&sql)
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_stage(&self, id: &str, stage: Stage) -> Result<bool> {
        let col = stage.column();
        let flag = stage.track().flag_column();
        let other = stage.track().other_flag_column();
        let sql = format!(
            "UPDATE queue SET {col} = 'SUCCESS', {flag} = 0, processing = {other}, updated_at = ? \
             WHERE id = ? AND {col} = 'RUNNING'"
        );
        let result = sqlx::query(&sql)
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fail_stage(&self, id: &str, stage: Stage, error: &str) -> Result<bool> {
        let col = stage.column();
        let flag = stage.track().flag_column();
        let other = stage.track().other_flag_column();
        let ts = now();
        let sql = format!(
            "UPDATE queue SET {col} = 'FAILED', {flag} = 0, processing = {other}, \
             error_stage = ?, error_message = ?, error_at = ?, updated_at = ? \
             WHERE id = ? AND {col} = 'RUNNING'"
        );
        let result = sqlx::query(&sql)
            .bind(stage.to_string())
            .bind(error)
            .bind(&ts)
            .bind(&ts)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn retry_stage(&self, id: &str, stage: Stage) -> Result<bool> {
        let col = stage.column();
        let sql = format!(
            "UPDATE queue SET {col} = 'PENDING', \
             error_stage = NULL, error_message = NULL, error_at = NULL, updated_at = ? \
             WHERE id = ? AND {col} = 'FAILED'"
        );
        let result = sqlx::query(&sql)
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn reset_stage(&self, id: &str, stage: Stage) -> Result<bool> {
        let col = stage.column();
        let flag = stage.track().flag_column();
        let other = stage.track().other_flag_column();
        let sql = format!(
            "UPDATE queue SET {col} = 'PENDING', {flag} = 0, processing = {other}, updated_at = ? \
             WHERE id = ? AND {col} = 'RUNNING'"
        );
        let result = sqlx::query(&sql)
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_hold(&self, id: &str, on_hold: bool) -> Result<()> {
        let result = sqlx::query("UPDATE queue SET on_hold = ?, updated_at = ? WHERE id = ?")
            .bind(on_hold)
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("QueueItem", id));
        }
        Ok(())
    }

    async fn mark_stream_ended_for_channel(&self, channel_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE queue SET stream_ended = 1, updated_at = ? \
             WHERE channel_id = ? AND live_archive = 1 AND stream_ended = 0",
        )
        .bind(now())
        .bind(channel_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM queue WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::run_migrations;
    use crate::queue::QueueItem;

    async fn test_repo() -> SqlxQueueRepository {
        let pool = init_pool_single().await;
        run_migrations(&pool).await.unwrap();
        SqlxQueueRepository::new(pool)
    }

    // A single-connection pool so `sqlite::memory:` refers to one database.
    async fn init_pool_single() -> DbPool {
        use sqlx::sqlite::SqlitePoolOptions;
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    async fn seed(repo: &SqlxQueueRepository) -> QueueItem {
        let item = QueueItem::new("vod-1", "channel-1", false);
        repo.create(&QueueItemDbModel::from_domain(&item))
            .await
            .unwrap();
        item
    }

    #[tokio::test]
    async fn test_duplicate_vod_rejected() {
        let repo = test_repo().await;
        seed(&repo).await;
        let dup = QueueItem::new("vod-1", "channel-1", false);
        let err = repo
            .create(&QueueItemDbModel::from_domain(&dup))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let repo = test_repo().await;
        let item = seed(&repo).await;

        assert!(repo.claim_stage(&item.id, Stage::CreateFolder).await.unwrap());
        // Second claim of the same stage loses.
        assert!(!repo.claim_stage(&item.id, Stage::CreateFolder).await.unwrap());
        // Track is busy, so no other video stage can be claimed either.
        assert!(!repo.claim_stage(&item.id, Stage::SaveInfo).await.unwrap());

        let row = repo.get(&item.id).await.unwrap();
        assert_eq!(row.create_folder, "RUNNING");
        assert!(row.video_processing);
        assert!(row.processing);
    }

    #[tokio::test]
    async fn test_claim_requires_dependencies_success() {
        let repo = test_repo().await;
        let item = seed(&repo).await;

        // No stage out of order: the move's chain is entirely pending.
        assert!(!repo.claim_stage(&item.id, Stage::VideoMove).await.unwrap());
        assert!(!repo.claim_stage(&item.id, Stage::VideoDownload).await.unwrap());
        assert!(!repo.claim_stage(&item.id, Stage::ChatRender).await.unwrap());
        let row = repo.get(&item.id).await.unwrap();
        assert_eq!(row.video_move, "PENDING");
        assert!(!row.video_processing);
        assert!(!row.processing);

        // Once every dependency is SUCCESS the claim goes through.
        for stage in [
            Stage::CreateFolder,
            Stage::DownloadThumbnail,
            Stage::SaveInfo,
        ] {
            assert!(repo.claim_stage(&item.id, stage).await.unwrap());
            assert!(repo.complete_stage(&item.id, stage).await.unwrap());
        }
        assert!(repo.claim_stage(&item.id, Stage::VideoDownload).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_gates_finalization_on_stream_end() {
        let repo = test_repo().await;
        let item = QueueItem::new("vod-live", "channel-1", true);
        repo.create(&QueueItemDbModel::from_domain(&item))
            .await
            .unwrap();
        for stage in [
            Stage::CreateFolder,
            Stage::DownloadThumbnail,
            Stage::SaveInfo,
            Stage::VideoDownload,
        ] {
            assert!(repo.claim_stage(&item.id, stage).await.unwrap());
            assert!(repo.complete_stage(&item.id, stage).await.unwrap());
        }

        // Stream still live: the move may not start.
        assert!(!repo.claim_stage(&item.id, Stage::VideoMove).await.unwrap());

        repo.mark_stream_ended_for_channel("channel-1").await.unwrap();
        assert!(repo.claim_stage(&item.id, Stage::VideoMove).await.unwrap());
    }

    #[tokio::test]
    async fn test_complete_clears_processing() {
        let repo = test_repo().await;
        let item = seed(&repo).await;

        repo.claim_stage(&item.id, Stage::CreateFolder).await.unwrap();
        assert!(repo.complete_stage(&item.id, Stage::CreateFolder).await.unwrap());

        let row = repo.get(&item.id).await.unwrap();
        assert_eq!(row.create_folder, "SUCCESS");
        assert!(!row.video_processing);
        assert!(!row.processing);
        // Completing twice is a no-op.
        assert!(!repo.complete_stage(&item.id, Stage::CreateFolder).await.unwrap());
    }

    #[tokio::test]
    async fn test_fail_and_retry() {
        let repo = test_repo().await;
        let item = seed(&repo).await;

        repo.claim_stage(&item.id, Stage::CreateFolder).await.unwrap();
        assert!(
            repo.fail_stage(&item.id, Stage::CreateFolder, "disk full")
                .await
                .unwrap()
        );

        let row = repo.get(&item.id).await.unwrap();
        assert_eq!(row.create_folder, "FAILED");
        assert_eq!(row.error_message.as_deref(), Some("disk full"));
        assert!(row.error_at.is_some());
        assert!(!row.processing);

        // Retry resets the stage and clears the error.
        assert!(repo.retry_stage(&item.id, Stage::CreateFolder).await.unwrap());
        let row = repo.get(&item.id).await.unwrap();
        assert_eq!(row.create_folder, "PENDING");
        assert!(row.error_message.is_none());

        // Retry of a non-failed stage is rejected.
        assert!(!repo.retry_stage(&item.id, Stage::CreateFolder).await.unwrap());
    }

    #[tokio::test]
    async fn test_hold_blocks_claims() {
        let repo = test_repo().await;
        let item = seed(&repo).await;

        repo.set_hold(&item.id, true).await.unwrap();
        assert!(!repo.claim_stage(&item.id, Stage::CreateFolder).await.unwrap());
        // Held items drop out of the active scan.
        assert!(repo.list_active().await.unwrap().is_empty());
        assert_eq!(repo.list_held().await.unwrap().len(), 1);

        repo.set_hold(&item.id, false).await.unwrap();
        assert!(repo.claim_stage(&item.id, Stage::CreateFolder).await.unwrap());
    }

    #[tokio::test]
    async fn test_stream_end_marks_live_archives_only() {
        let repo = test_repo().await;
        let live = QueueItem::new("vod-live", "channel-1", true);
        let vod = QueueItem::new("vod-plain", "channel-1", false);
        repo.create(&QueueItemDbModel::from_domain(&live)).await.unwrap();
        repo.create(&QueueItemDbModel::from_domain(&vod)).await.unwrap();

        let unblocked = repo.mark_stream_ended_for_channel("channel-1").await.unwrap();
        assert_eq!(unblocked, 1);
        assert!(repo.get(&live.id).await.unwrap().stream_ended);
        assert!(!repo.get(&vod.id).await.unwrap().stream_ended);
        // Idempotent on a second pass.
        let again = repo.mark_stream_ended_for_channel("channel-1").await.unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn test_reset_stage_for_recovery() {
        let repo = test_repo().await;
        let item = seed(&repo).await;

        repo.claim_stage(&item.id, Stage::CreateFolder).await.unwrap();
        assert!(repo.reset_stage(&item.id, Stage::CreateFolder).await.unwrap());

        let row = repo.get(&item.id).await.unwrap();
        assert_eq!(row.create_folder, "PENDING");
        assert!(!row.video_processing);
        assert!(!row.processing);
    }
}
