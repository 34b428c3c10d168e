//! Dispatcher: the periodic/triggered scheduler that finds eligible work
//! and hands it to the pipeline driver.
//!
//! One scan loop, a bounded worker pool. The scan only enqueues work; side
//! effects run on workers so long downloads never stall scheduling. Per
//! (item, track) an in-flight marker prevents duplicate dispatch between
//! scans; the conditional claim in the store is the authoritative guard.

pub mod tasks;

pub use tasks::{BackgroundTasks, DiskSpaceHoldPolicy, HoldPolicy, TaskKind};

use dashmap::DashSet;
use std::sync::Arc;
use tokio::sync::{Notify, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::database::QueueRepository;
use crate::pipeline::{PipelineDriver, WorkerPool};
use crate::queue::Track;
use crate::{Error, Result};

/// Handle for poking a running dispatcher from outside.
#[derive(Clone)]
pub struct DispatcherHandle {
    trigger: mpsc::Sender<TaskKind>,
    scan_notify: Arc<Notify>,
    cancellation: CancellationToken,
}

impl DispatcherHandle {
    /// Run a named background task on demand.
    pub async fn trigger_task(&self, kind: TaskKind) -> Result<()> {
        self.trigger
            .send(kind)
            .await
            .map_err(|_| Error::Configuration("dispatcher is not running".to_string()))
    }

    /// Request an immediate scan instead of waiting for the next tick.
    pub fn request_scan(&self) {
        self.scan_notify.notify_one();
    }

    pub fn shutdown(&self) {
        self.cancellation.cancel();
    }
}

pub struct Dispatcher {
    repo: Arc<dyn QueueRepository>,
    driver: Arc<PipelineDriver>,
    pool: Arc<WorkerPool>,
    tasks: BackgroundTasks,
    config: Arc<Config>,
    scan_notify: Arc<Notify>,
    cancellation: CancellationToken,
    in_flight: Arc<DashSet<(String, Track)>>,
    trigger_tx: mpsc::Sender<TaskKind>,
    trigger_rx: parking_lot::Mutex<Option<mpsc::Receiver<TaskKind>>>,
}

impl Dispatcher {
    pub fn new(
        repo: Arc<dyn QueueRepository>,
        driver: Arc<PipelineDriver>,
        pool: Arc<WorkerPool>,
        tasks: BackgroundTasks,
        scan_notify: Arc<Notify>,
        config: Arc<Config>,
    ) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::channel(16);
        Self {
            repo,
            driver,
            pool,
            tasks,
            config,
            scan_notify,
            cancellation: CancellationToken::new(),
            in_flight: Arc::new(DashSet::new()),
            trigger_tx,
            trigger_rx: parking_lot::Mutex::new(Some(trigger_rx)),
        }
    }

    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            trigger: self.trigger_tx.clone(),
            scan_notify: self.scan_notify.clone(),
            cancellation: self.cancellation.clone(),
        }
    }

    /// Run the dispatch loop until shutdown.
    pub async fn run(&self) -> Result<()> {
        let mut trigger_rx = self
            .trigger_rx
            .lock()
            .take()
            .ok_or_else(|| Error::Configuration("dispatcher already running".to_string()))?;

        // Crash recovery before the first scan: nothing may stay RUNNING
        // without a live execution owning it.
        match self.driver.recover().await {
            Ok(_) => {}
            Err(e) => warn!("crash recovery failed, will rely on later scans: {e}"),
        }

        let mut scan_tick = tokio::time::interval(self.config.scan_interval);
        let mut live_tick = tokio::time::interval(self.config.live_check_interval);
        let mut vod_tick = tokio::time::interval(self.config.vod_check_interval);
        let mut hold_tick = tokio::time::interval(self.config.hold_check_interval);
        for tick in [&mut scan_tick, &mut live_tick, &mut vod_tick, &mut hold_tick] {
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        info!(
            scan_interval = ?self.config.scan_interval,
            max_workers = self.pool.max_workers(),
            "dispatcher started"
        );

        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => break,
                _ = scan_tick.tick() => self.scan().await,
                _ = self.scan_notify.notified() => self.scan().await,
                _ = live_tick.tick() => self.run_task(TaskKind::CheckLive).await,
                _ = vod_tick.tick() => self.run_task(TaskKind::CheckVod).await,
                _ = hold_tick.tick() => self.run_task(TaskKind::QueueHoldCheck).await,
                Some(kind) = trigger_rx.recv() => self.run_task(kind).await,
            }
        }

        info!("dispatcher stopped");
        Ok(())
    }

    async fn run_task(&self, kind: TaskKind) {
        debug!(task = %kind, "running background task");
        if let Err(e) = self.tasks.run(kind).await {
            // Store/platform connectivity problems retry on the next tick.
            warn!(task = %kind, "background task failed: {e}");
        }
    }

    /// One scan cycle: find eligible stages and dispatch them to workers.
    pub async fn scan(&self) {
        let rows = match self.repo.list_active().await {
            Ok(rows) => rows,
            Err(e) => {
                // Abort this cycle; conditional updates mean no partial
                // state was written.
                warn!("scan aborted, store unavailable: {e}");
                return;
            }
        };

        for row in rows {
            let item = match row.to_domain() {
                Ok(item) => item,
                Err(e) => {
                    warn!(item_id = %row.id, "skipping undecodable queue item: {e}");
                    continue;
                }
            };

            for track in Track::ALL {
                let Some(stage) = item.next_eligible(track) else {
                    continue;
                };
                let key = (item.id.clone(), track);
                if !self.in_flight.insert(key.clone()) {
                    // Still being advanced from a previous scan.
                    continue;
                }

                let driver = self.driver.clone();
                let in_flight = self.in_flight.clone();
                let item = item.clone();
                let spawned = self.pool.try_spawn(async move {
                    match driver.advance(&item, stage).await {
                        Ok(()) => {}
                        Err(Error::Conflict(msg)) => {
                            // Lost the claim to a concurrent worker; the
                            // next scan re-evaluates.
                            debug!(item_id = %item.id, %stage, "claim lost: {msg}");
                        }
                        Err(Error::DependencyNotReady { reason, .. }) => {
                            // State moved between the scan read and the
                            // claim; the next scan re-evaluates.
                            debug!(item_id = %item.id, %stage, "no longer eligible: {reason}");
                        }
                        Err(e) => {
                            warn!(item_id = %item.id, %stage, "stage advance errored: {e}");
                        }
                    }
                    in_flight.remove(&(item.id.clone(), track));
                });

                if !spawned {
                    self.in_flight.remove(&key);
                    debug!("worker pool saturated, deferring to next scan");
                    return;
                }
            }
        }
    }
}
