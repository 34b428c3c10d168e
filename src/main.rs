use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Notify;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use vodvault::config::Config;
use vodvault::database::{self, SqlxQueueRepository};
use vodvault::dispatcher::{BackgroundTasks, Dispatcher, DiskSpaceHoldPolicy};
use vodvault::monitor::{EventBroadcaster, HttpPlatformClient};
use vodvault::pipeline::{ExecutorRegistry, PipelineDriver, WorkerPool};
use vodvault::queue::QueueService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional; real deployments set the environment directly.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("vodvault=debug,sqlx=warn")),
        )
        .with(fmt::layer())
        .init();

    let config = Arc::new(Config::from_env().context("failed to load configuration")?);
    info!(
        database_url = %config.database_url,
        archive_root = %config.archive_root.display(),
        "starting vodvault"
    );

    let pool = database::init_pool(&config.database_url)
        .await
        .context("failed to open database")?;
    database::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;

    let repo = Arc::new(SqlxQueueRepository::new(pool));
    let events = EventBroadcaster::default();
    let scan_notify = Arc::new(Notify::new());

    let platform = Arc::new(
        HttpPlatformClient::new(config.platform_api_url.clone())
            .context("failed to build platform client")?,
    );
    let executors = Arc::new(
        ExecutorRegistry::standard(&config, platform.clone())
            .context("failed to build stage executors")?,
    );
    let driver = Arc::new(PipelineDriver::new(
        repo.clone(),
        executors,
        config.clone(),
        events.clone(),
    ));
    let service = Arc::new(QueueService::new(
        repo.clone(),
        driver.clone(),
        scan_notify.clone(),
        events.clone(),
    ));

    let hold_policy = Arc::new(DiskSpaceHoldPolicy::new(
        config.archive_root.clone(),
        config.min_free_bytes,
    ));
    let tasks = BackgroundTasks::new(
        repo.clone(),
        platform,
        service,
        hold_policy,
        events.clone(),
        scan_notify.clone(),
    );

    let worker_pool = Arc::new(WorkerPool::new(config.max_workers));
    let dispatcher = Arc::new(Dispatcher::new(
        repo,
        driver,
        worker_pool.clone(),
        tasks,
        scan_notify,
        config,
    ));
    let handle = dispatcher.handle();

    let dispatcher_task = tokio::spawn(async move {
        if let Err(e) = dispatcher.run().await {
            error!("dispatcher exited with error: {e}");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    handle.shutdown();
    let _ = dispatcher_task.await;
    // Let in-flight stage executions finish committing their transitions.
    worker_pool.stop().await;

    info!("vodvault stopped");
    Ok(())
}
