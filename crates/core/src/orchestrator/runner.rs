//! Pipeline runner implementation.
//!
//! Spawns, per queue, as many worker tasks as the queue's concurrency,
//! plus one reaper loop and (with retention configured) one maintenance
//! loop. All loops stop on the shared shutdown broadcast.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::chainer::Chainer;
use crate::config::PipelineConfig;
use crate::queue::JobQueue;
use crate::stage::Stage;

use super::reaper::Reaper;
use super::types::{PoolStatus, ReaperReport, RunnerStatus};
use super::worker::{run_worker, WorkerContext};

/// Drives the four stage queues.
pub struct PipelineRunner {
    config: PipelineConfig,
    queue: Arc<JobQueue>,
    chainer: Arc<Chainer>,
    stages: Vec<Arc<dyn Stage>>,
    reaper: Arc<Reaper>,

    // Runtime state
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl PipelineRunner {
    /// Create a new runner. `stages` holds one processor per queue.
    pub fn new(
        config: PipelineConfig,
        queue: Arc<JobQueue>,
        chainer: Arc<Chainer>,
        stages: Vec<Arc<dyn Stage>>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let reaper = Arc::new(Reaper::new(
            queue.clone(),
            chainer.clone(),
            stages.clone(),
            Duration::from_secs(config.liveness_timeout_secs),
        ));

        Self {
            config,
            queue,
            chainer,
            stages,
            reaper,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Start the runner (spawns background tasks).
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Pipeline runner already running");
            return;
        }

        info!("Starting pipeline runner");

        // Recover whatever a previous process left behind before taking new work
        self.reaper.sweep().await;

        for stage in &self.stages {
            self.spawn_workers(stage.clone());
        }
        self.spawn_reaper_loop();
        if let Some(hours) = self.config.retention_hours {
            self.spawn_maintenance_loop(hours);
        }

        info!("Pipeline runner started");
    }

    /// Stop the runner gracefully.
    ///
    /// Jobs in flight keep their lease; if the process exits before they
    /// finish, the reaper recovers them on the next start.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Pipeline runner not running");
            return;
        }

        info!("Stopping pipeline runner");

        // Signal shutdown to all workers
        let _ = self.shutdown_tx.send(());

        // Give workers a moment to finish current work
        tokio::time::sleep(Duration::from_millis(500)).await;

        info!("Pipeline runner stopped");
    }

    /// Get current runner status.
    pub fn status(&self) -> RunnerStatus {
        RunnerStatus {
            running: self.is_running(),
            pools: self
                .stages
                .iter()
                .map(|stage| PoolStatus {
                    queue: stage.queue(),
                    workers: self.queue.config(stage.queue()).concurrency,
                })
                .collect(),
        }
    }

    /// Run one reaper sweep now.
    pub async fn reap(&self) -> ReaperReport {
        self.reaper.sweep().await
    }

    fn spawn_workers(&self, stage: Arc<dyn Stage>) {
        let queue_name = stage.queue();
        let concurrency = self.queue.config(queue_name).concurrency;
        let ctx = Arc::new(WorkerContext {
            queue: self.queue.clone(),
            chainer: self.chainer.clone(),
            stage,
            heartbeat_interval: Duration::from_millis(self.config.heartbeat_interval_ms),
            poll_interval: Duration::from_millis(self.config.poll_interval_ms),
        });

        for index in 0..concurrency {
            let worker_id = format!("{}-{}", queue_name, index);
            tokio::spawn(run_worker(
                ctx.clone(),
                worker_id,
                self.shutdown_tx.subscribe(),
            ));
        }
        info!(queue = %queue_name, workers = concurrency, "Spawned workers");
    }

    fn spawn_reaper_loop(&self) {
        let reaper = self.reaper.clone();
        let interval = Duration::from_millis(self.config.reaper_interval_ms);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Reaper loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Reaper loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        reaper.sweep().await;
                    }
                }
            }
        });
    }

    fn spawn_maintenance_loop(&self, retention_hours: u64) {
        let store = self.queue.store().clone();
        let interval = Duration::from_secs(self.config.maintenance_interval_secs);
        let retention = chrono::Duration::hours(retention_hours as i64);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!(retention_hours, "Maintenance loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Maintenance loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        match store.purge_terminal_before(Utc::now() - retention) {
                            Ok(0) => {}
                            Ok(purged) => info!(purged, "Purged terminal jobs"),
                            Err(e) => error!(error = %e, "Failed to purge terminal jobs"),
                        }
                    }
                }
            }
        });
    }
}
