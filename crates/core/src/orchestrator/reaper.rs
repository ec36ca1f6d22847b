//! Recovery of abandoned and unchained jobs.
//!
//! An Active job whose heartbeat is older than the liveness timeout has
//! lost its worker. The reaper takes over its lease; guarded stages get a
//! chance to prove the effect already happened, everything else goes back
//! to Waiting. A second sweep enqueues next stages that a crash between
//! `complete` and `chain` left missing.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::chainer::Chainer;
use crate::job::{FailureReason, JobError, JobState, QueueName};
use crate::metrics;
use crate::queue::{ClaimedJob, JobQueue, QueueError};
use crate::stage::{IdempotencyClass, Stage};

use super::types::ReaperReport;
use super::worker::{after_complete, announce_if_finished};

/// Completed jobs re-chained per queue per sweep.
const UNCHAINED_BATCH: i64 = 100;

pub(crate) struct Reaper {
    queue: Arc<JobQueue>,
    chainer: Arc<Chainer>,
    stages: Vec<Arc<dyn Stage>>,
    liveness_timeout: Duration,
}

impl Reaper {
    pub fn new(
        queue: Arc<JobQueue>,
        chainer: Arc<Chainer>,
        stages: Vec<Arc<dyn Stage>>,
        liveness_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            chainer,
            stages,
            liveness_timeout,
        }
    }

    /// One full pass over every queue.
    pub async fn sweep(&self) -> ReaperReport {
        let mut report = ReaperReport::default();

        for stage in &self.stages {
            if let Err(e) = self.recover_abandoned(stage.as_ref(), &mut report).await {
                error!(queue = %stage.queue(), error = %e, "Abandoned job sweep failed");
            }
        }

        for queue in QueueName::ALL {
            if queue.next().is_none() {
                continue;
            }
            match self.queue.store().unchained(queue, UNCHAINED_BATCH) {
                Ok(jobs) => {
                    for job in jobs {
                        match self.chainer.chain(&job) {
                            Ok(Some(outcome)) if outcome.is_created() => {
                                warn!(job_id = %job.id, queue = %queue, "Re-chained completed job");
                                report.rechained += 1;
                            }
                            Ok(_) => {}
                            Err(e) => {
                                error!(job_id = %job.id, queue = %queue, error = %e, "Re-chaining failed")
                            }
                        }
                    }
                }
                Err(e) => error!(queue = %queue, error = %e, "Unchained sweep failed"),
            }
        }

        if !report.is_empty() {
            info!(
                reconciled = report.reconciled,
                requeued = report.requeued,
                failed = report.failed,
                rechained = report.rechained,
                "Reaper sweep recovered jobs"
            );
        }
        report
    }

    async fn recover_abandoned(
        &self,
        stage: &dyn Stage,
        report: &mut ReaperReport,
    ) -> Result<(), QueueError> {
        let queue = stage.queue();
        let timeout = chrono::Duration::from_std(self.liveness_timeout)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let stale_before = Utc::now() - timeout;
        let store = self.queue.store();

        for job in store.abandoned(queue, stale_before)? {
            let stale_owner = job.owner.clone().unwrap_or_default();
            let lease = format!("reaper:{}", uuid::Uuid::new_v4());
            // Lost the race to another reaper, or the worker woke up
            let Some(job) = store.take_over(&job.id, &stale_owner, &lease, stale_before)? else {
                continue;
            };
            warn!(
                job_id = %job.id,
                queue = %queue,
                stale_owner = %stale_owner,
                attempt = job.attempt,
                "Recovering abandoned job"
            );
            let claimed = ClaimedJob { job, lease };

            if stage.idempotency() == IdempotencyClass::Guarded {
                match stage.reconcile(&claimed.job).await {
                    Ok(Some(result)) => {
                        let job = match self.queue.complete(&claimed, result) {
                            Ok(job) => job,
                            Err(e) if e.is_lease_lost() => continue,
                            Err(e) => return Err(e),
                        };
                        info!(job_id = %job.id, queue = %queue, "Completed abandoned job from recorded effect");
                        metrics::JOBS_RECOVERED
                            .with_label_values(&[queue.as_str(), "reconciled"])
                            .inc();
                        report.reconciled += 1;
                        after_complete(&self.queue, &self.chainer, &job);
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(job_id = %claimed.id(), error = %e, "Reconciliation failed, requeueing");
                    }
                }
            }

            let job = match self.queue.release(
                &claimed,
                FailureReason::ambiguous("worker stopped heartbeating"),
            ) {
                Ok(job) => job,
                Err(QueueError::Store(JobError::LeaseLost(_))) => continue,
                Err(e) => return Err(e),
            };

            if job.state == JobState::Failed {
                error!(job_id = %job.id, queue = %queue, "Abandoned job has no attempts left");
                metrics::JOBS_RECOVERED
                    .with_label_values(&[queue.as_str(), "failed"])
                    .inc();
                report.failed += 1;
                announce_if_finished(&self.queue, &job.correlation_id);
            } else {
                metrics::JOBS_RECOVERED
                    .with_label_values(&[queue.as_str(), "requeued"])
                    .inc();
                report.requeued += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueuesConfig;
    use crate::events::EventBus;
    use crate::idempotency::IdempotencyGuard;
    use crate::ledger::LedgerClient;
    use crate::job::{EnqueueOptions, JobStore, SqliteJobStore};
    use crate::stage::{MintStage, StageProgress, TranscodeStage};
    use crate::testing::{fixtures, MockLedger, MockTranscoder};
    use serde_json::json;
    use tempfile::TempDir;

    struct Harness {
        reaper: Reaper,
        queue: Arc<JobQueue>,
        ledger: Arc<MockLedger>,
        guard: IdempotencyGuard,
        _dir: TempDir,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::in_memory().unwrap());
        let queue = Arc::new(JobQueue::new(
            store.clone(),
            QueuesConfig::default(),
            Duration::from_millis(20),
            EventBus::default(),
        ));
        let chainer = Arc::new(Chainer::new(queue.clone(), "signer-1"));
        let ledger = Arc::new(MockLedger::new());
        let guard = IdempotencyGuard::new(store);
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(TranscodeStage::new(Arc::new(MockTranscoder::new(dir.path())))),
            Arc::new(MintStage::new(ledger.clone(), guard.clone(), "signer-1")),
        ];
        // Zero timeout: any Active job is abandoned
        let reaper = Reaper::new(queue.clone(), chainer, stages, Duration::ZERO);
        Harness {
            reaper,
            queue,
            ledger,
            guard,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_abandoned_safe_job_is_requeued() {
        let h = harness();
        h.queue
            .enqueue(
                QueueName::Transcode,
                "asset-1",
                fixtures::transcode_payload(),
                EnqueueOptions::new(),
            )
            .unwrap();
        let claimed = h.queue.try_claim(QueueName::Transcode, "w").unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let report = h.reaper.sweep().await;
        assert_eq!(report.requeued, 1);

        let job = h.queue.store().get(claimed.id()).unwrap().unwrap();
        assert_eq!(job.state, JobState::Waiting);
        // The dead worker can no longer complete it
        assert!(h.queue.complete(&claimed, json!({})).unwrap_err().is_lease_lost());
    }

    #[tokio::test]
    async fn test_abandoned_mint_with_confirmed_effect_is_completed() {
        let h = harness();
        h.queue
            .enqueue(
                QueueName::Mint,
                "asset-1",
                fixtures::mint_payload(),
                EnqueueOptions::new().with_lane("signer-1"),
            )
            .unwrap();
        let claimed = h.queue.try_claim(QueueName::Mint, "w").unwrap().unwrap();

        // The worker minted and recorded the intent, then died before confirming
        let key = IdempotencyGuard::mint_effect_key("cid123", "0xcreator");
        h.guard.record_intent(&key, &claimed.job).unwrap();
        h.ledger
            .submit_mint(crate::ledger::MintRequest {
                content_id: "cid123".to_string(),
                owner: "0xcreator".to_string(),
                royalty_bps: 500,
                signer: "signer-1".to_string(),
                metadata_uri: "ipfs://cidmeta".to_string(),
                effect_key: key.clone(),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let report = h.reaper.sweep().await;
        assert_eq!(report.reconciled, 1);
        assert_eq!(h.ledger.mint_count().await, 1);

        let jobs = h.queue.store().list_by_correlation("asset-1").unwrap();
        assert_eq!(jobs[0].state, JobState::Completed);
        assert_eq!(jobs[0].result.as_ref().unwrap()["asset_token_id"], "42");
        assert_eq!(jobs[1].queue, QueueName::Notify);
    }

    /// Pin stage stand-in whose reconciliation loses the lease on `asset-1`.
    struct LeaseStealingStage {
        store: Arc<dyn JobStore>,
    }

    #[async_trait::async_trait]
    impl Stage for LeaseStealingStage {
        fn queue(&self) -> QueueName {
            QueueName::Pin
        }

        fn idempotency(&self) -> IdempotencyClass {
            IdempotencyClass::Guarded
        }

        async fn execute(
            &self,
            _job: &crate::job::JobRecord,
            _progress: StageProgress,
        ) -> Result<serde_json::Value, crate::stage::StageError> {
            Ok(json!({}))
        }

        async fn reconcile(
            &self,
            job: &crate::job::JobRecord,
        ) -> Result<Option<serde_json::Value>, crate::stage::StageError> {
            if job.correlation_id != "asset-1" {
                return Ok(None);
            }
            let current = self.store.get(&job.id)?.unwrap();
            self.store.release(
                &job.id,
                current.owner.as_deref().unwrap(),
                FailureReason::ambiguous("taken elsewhere"),
            )?;
            Ok(Some(json!({})))
        }
    }

    #[tokio::test]
    async fn test_lost_lease_during_reconcile_does_not_stop_sweep() {
        let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::in_memory().unwrap());
        let queue = Arc::new(JobQueue::new(
            store.clone(),
            QueuesConfig::default(),
            Duration::from_millis(20),
            EventBus::default(),
        ));
        let chainer = Arc::new(Chainer::new(queue.clone(), "signer-1"));
        let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(LeaseStealingStage {
            store: store.clone(),
        })];
        let reaper = Reaper::new(queue.clone(), chainer, stages, Duration::ZERO);

        // asset-1 has the older heartbeat, so it is recovered first
        for id in ["asset-1", "asset-2"] {
            queue
                .enqueue(QueueName::Pin, id, json!({}), EnqueueOptions::new())
                .unwrap();
            queue.try_claim(QueueName::Pin, "w").unwrap().unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let report = reaper.sweep().await;
        assert_eq!(report.reconciled, 0);
        assert_eq!(report.requeued, 1);

        let jobs = store.list_by_correlation("asset-2").unwrap();
        assert_eq!(jobs[0].state, JobState::Waiting);
    }

    #[tokio::test]
    async fn test_abandoned_mint_without_effect_is_requeued() {
        let h = harness();
        h.queue
            .enqueue(
                QueueName::Mint,
                "asset-1",
                fixtures::mint_payload(),
                EnqueueOptions::new(),
            )
            .unwrap();
        h.queue.try_claim(QueueName::Mint, "w").unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let report = h.reaper.sweep().await;
        assert_eq!(report.requeued, 1);
        assert_eq!(h.ledger.mint_count().await, 0);
    }

    #[tokio::test]
    async fn test_exhausted_abandoned_job_fails() {
        let h = harness();
        h.queue
            .enqueue(
                QueueName::Transcode,
                "asset-1",
                fixtures::transcode_payload(),
                EnqueueOptions::new().with_max_attempts(1),
            )
            .unwrap();
        h.queue.try_claim(QueueName::Transcode, "w").unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let report = h.reaper.sweep().await;
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_unchained_completion_is_rechained() {
        let h = harness();
        h.queue
            .enqueue(
                QueueName::Mint,
                "asset-1",
                fixtures::mint_payload(),
                EnqueueOptions::new(),
            )
            .unwrap();
        let claimed = h.queue.try_claim(QueueName::Mint, "w").unwrap().unwrap();
        let stage = MintStage::new(h.ledger.clone(), h.guard.clone(), "signer-1");
        let result = stage
            .execute(&claimed.job, StageProgress::detached())
            .await
            .unwrap();
        // Completed, then crashed before chaining
        h.queue.complete(&claimed, result).unwrap();

        let report = h.reaper.sweep().await;
        assert_eq!(report.rechained, 1);
        let jobs = h.queue.store().list_by_correlation("asset-1").unwrap();
        assert_eq!(jobs.len(), 2);

        assert_eq!(h.reaper.sweep().await.rechained, 0);
    }
}
