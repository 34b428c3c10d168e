//! Concurrency stress on the conditional stage claim.
//!
//! Many workers race for the same stage over a shared WAL pool; exactly one
//! may win, and the loser count must match.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

use vodvault::database::{self, QueueItemDbModel, QueueRepository, SqlxQueueRepository};
use vodvault::queue::{QueueItem, Stage};

async fn file_backed_repo(dir: &TempDir) -> Arc<SqlxQueueRepository> {
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("queue.db").display());
    let pool = database::init_pool(&url).await.unwrap();
    database::run_migrations(&pool).await.unwrap();
    Arc::new(SqlxQueueRepository::new(pool))
}

#[tokio::test]
async fn test_exactly_one_claim_wins() {
    let dir = TempDir::new().unwrap();
    let repo = file_backed_repo(&dir).await;

    let item = QueueItem::new("vod-race", "channel-1", false);
    repo.create(&QueueItemDbModel::from_domain(&item))
        .await
        .unwrap();

    let wins = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for _ in 0..16 {
        let repo = repo.clone();
        let wins = wins.clone();
        let id = item.id.clone();
        handles.push(tokio::spawn(async move {
            if repo.claim_stage(&id, Stage::CreateFolder).await.unwrap() {
                wins.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(wins.load(Ordering::SeqCst), 1);
    let row = repo.get(&item.id).await.unwrap();
    assert_eq!(row.create_folder, "RUNNING");
    assert!(row.video_processing);
}

#[tokio::test]
async fn test_track_serialization_under_contention() {
    let dir = TempDir::new().unwrap();
    let repo = file_backed_repo(&dir).await;

    let item = QueueItem::new("vod-serial", "channel-1", false);
    repo.create(&QueueItemDbModel::from_domain(&item))
        .await
        .unwrap();

    // Workers race for two different video-track stages at once. The track
    // flag admits at most one, and only the folder stage has its
    // dependencies satisfied, so it must be the winner.
    let mut handles = Vec::new();
    for stage in [Stage::CreateFolder, Stage::SaveInfo] {
        for _ in 0..8 {
            let repo = repo.clone();
            let id = item.id.clone();
            handles.push(tokio::spawn(
                async move { repo.claim_stage(&id, stage).await.unwrap() },
            ));
        }
    }
    let mut wins = 0;
    for handle in handles {
        if handle.await.unwrap() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1);

    let row = repo.get(&item.id).await.unwrap();
    assert!(row.video_processing);
    assert_eq!(row.create_folder, "RUNNING");
    assert_eq!(row.save_info, "PENDING");

    // Chat claims are unaffected by video-track contention once their own
    // dependency is met.
    repo.complete_stage(&item.id, Stage::CreateFolder)
        .await
        .unwrap();
    assert!(repo.claim_stage(&item.id, Stage::ChatDownload).await.unwrap());
}
