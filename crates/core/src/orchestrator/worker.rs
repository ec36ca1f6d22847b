//! Worker loop: claim, execute, complete or fail, chain.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::chainer::Chainer;
use crate::events::PipelineEvent;
use crate::job::{JobRecord, JobState};
use crate::metrics;
use crate::queue::{ClaimedJob, JobQueue};
use crate::stage::{Stage, StageProgress};
use crate::status::summarize_run;

/// Everything a worker of one queue needs.
pub(crate) struct WorkerContext {
    pub queue: Arc<JobQueue>,
    pub chainer: Arc<Chainer>,
    pub stage: Arc<dyn Stage>,
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
}

/// Claim and process jobs until shutdown.
pub(crate) async fn run_worker(
    ctx: Arc<WorkerContext>,
    worker_id: String,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let queue = ctx.stage.queue();
    debug!(worker = %worker_id, queue = %queue, "Worker started");

    loop {
        let claimed = match ctx.queue.claim(queue, &worker_id, &mut shutdown_rx).await {
            Ok(Some(claimed)) => claimed,
            Ok(None) => {
                debug!(worker = %worker_id, "Worker shutting down");
                break;
            }
            Err(e) => {
                error!(worker = %worker_id, queue = %queue, error = %e, "Claim failed");
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(ctx.poll_interval) => continue,
                }
            }
        };

        process_job(&ctx, claimed).await;
    }
}

/// Run one claimed job to a recorded outcome.
pub(crate) async fn process_job(ctx: &WorkerContext, claimed: ClaimedJob) {
    let queue = claimed.queue();
    info!(
        job_id = %claimed.id(),
        queue = %queue,
        correlation_id = %claimed.correlation_id(),
        attempt = claimed.job.attempt,
        "Processing job"
    );

    let (progress_tx, progress_rx) = mpsc::channel(32);
    let keeper = tokio::spawn(keep_lease(
        ctx.queue.clone(),
        claimed.clone(),
        progress_rx,
        ctx.heartbeat_interval,
    ));

    let start = Instant::now();
    let outcome = ctx
        .stage
        .execute(&claimed.job, StageProgress::new(progress_tx))
        .await;
    let elapsed = start.elapsed().as_secs_f64();
    // The stage dropped its progress sender; the keeper drains and exits
    let _ = keeper.await;

    match outcome {
        Ok(result) => {
            metrics::STAGE_DURATION
                .with_label_values(&[queue.as_str(), "success"])
                .observe(elapsed);
            match ctx.queue.complete(&claimed, result) {
                Ok(job) => {
                    info!(job_id = %job.id, queue = %queue, elapsed_secs = elapsed, "Job completed");
                    after_complete(&ctx.queue, &ctx.chainer, &job);
                }
                Err(e) if e.is_lease_lost() => {
                    warn!(job_id = %claimed.id(), queue = %queue, "Lease lost before completion, result discarded");
                }
                Err(e) => {
                    error!(job_id = %claimed.id(), queue = %queue, error = %e, "Failed to record completion");
                }
            }
        }
        Err(err) => {
            metrics::STAGE_DURATION
                .with_label_values(&[queue.as_str(), "error"])
                .observe(elapsed);
            let reason = err.failure_reason();
            match ctx.queue.fail(&claimed, reason) {
                Ok(job) if job.state == JobState::Failed => {
                    error!(
                        job_id = %job.id,
                        queue = %queue,
                        attempt = job.attempt,
                        error = %err,
                        "Job failed permanently"
                    );
                    announce_if_finished(&ctx.queue, &job.correlation_id);
                }
                Ok(_) => {}
                Err(e) if e.is_lease_lost() => {
                    warn!(job_id = %claimed.id(), queue = %queue, error = %err, "Lease lost before recording failure");
                }
                Err(e) => {
                    error!(job_id = %claimed.id(), queue = %queue, error = %e, "Failed to record failure");
                }
            }
        }
    }
}

/// Forward progress and heartbeat until the stage drops its progress sender.
async fn keep_lease(
    queue: Arc<JobQueue>,
    claimed: ClaimedJob,
    mut progress_rx: mpsc::Receiver<u8>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The claim itself stamped the first heartbeat
    ticker.tick().await;

    loop {
        tokio::select! {
            update = progress_rx.recv() => match update {
                Some(percent) => {
                    if let Err(e) = queue.report_progress(&claimed, percent) {
                        warn!(job_id = %claimed.id(), error = %e, "Failed to report progress");
                    }
                }
                None => break,
            },
            _ = ticker.tick() => match queue.heartbeat(&claimed) {
                Ok(true) => {}
                Ok(false) => warn!(job_id = %claimed.id(), "Heartbeat rejected, lease lost"),
                Err(e) => warn!(job_id = %claimed.id(), error = %e, "Heartbeat failed"),
            },
        }
    }
}

/// Chain a completed job and report the run if it just finished.
///
/// A chaining error leaves the run for the reaper's unchained sweep.
pub(crate) fn after_complete(queue: &JobQueue, chainer: &Chainer, job: &JobRecord) {
    match chainer.chain(job) {
        Ok(Some(_)) => {}
        Ok(None) => announce_if_finished(queue, &job.correlation_id),
        Err(e) => {
            error!(job_id = %job.id, correlation_id = %job.correlation_id, error = %e, "Chaining failed");
        }
    }
}

/// Publish `RunFinished` when every stage of the run is settled.
pub(crate) fn announce_if_finished(queue: &JobQueue, correlation_id: &str) {
    let jobs = match queue.store().list_by_correlation(correlation_id) {
        Ok(jobs) => jobs,
        Err(e) => {
            warn!(correlation_id = %correlation_id, error = %e, "Failed to load run");
            return;
        }
    };
    let Some(status) = summarize_run(correlation_id, &jobs) else {
        return;
    };
    if status.outcome.is_terminal() {
        info!(correlation_id = %correlation_id, outcome = ?status.outcome, "Run finished");
        queue.events().publish(PipelineEvent::RunFinished {
            correlation_id: correlation_id.to_string(),
            outcome: status.outcome,
        });
    }
}
