//! Mint stage: register the pinned asset on the ledger.
//!
//! Minting is irreversible, so every path goes through the idempotency
//! guard: a local receipt wins, an unconfirmed intent is looked up on the
//! ledger, and only a fresh (or provably absent) mint is submitted.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::idempotency::{GuardCheck, IdempotencyGuard};
use crate::job::{JobRecord, QueueName};
use crate::ledger::{LedgerClient, MintReceipt, MintRequest};
use crate::metrics;

use super::{IdempotencyClass, MintPayload, MintResult, Stage, StageError, StageProgress};

pub struct MintStage {
    ledger: Arc<dyn LedgerClient>,
    guard: IdempotencyGuard,
    signer: String,
}

impl MintStage {
    pub fn new(ledger: Arc<dyn LedgerClient>, guard: IdempotencyGuard, signer: impl Into<String>) -> Self {
        Self {
            ledger,
            guard,
            signer: signer.into(),
        }
    }

    fn confirmed(&self, effect_key: &str, receipt: MintReceipt) -> Result<Value, StageError> {
        let result = MintResult {
            asset_token_id: receipt.asset_token_id,
            tx_receipt: receipt.tx_receipt,
            effect_key: effect_key.to_string(),
        };
        self.guard.confirm(effect_key, &result)?;
        Ok(serde_json::to_value(result)?)
    }

    /// Resolve an earlier attempt from local or ledger records.
    async fn recover(&self, job: &JobRecord, effect_key: &str) -> Result<Option<Value>, StageError> {
        match self.guard.check(effect_key)? {
            GuardCheck::Confirmed(receipt) => {
                metrics::EFFECTS_REUSED
                    .with_label_values(&[QueueName::Mint.as_str(), "local"])
                    .inc();
                Ok(Some(receipt))
            }
            GuardCheck::Pending(_) => {
                let start = Instant::now();
                let found = self.ledger.find_mint(effect_key).await;
                metrics::observe_external(
                    "ledger",
                    "find_mint",
                    start.elapsed().as_secs_f64(),
                    found.is_ok(),
                );
                match found? {
                    Some(receipt) => {
                        warn!(
                            job_id = %job.id,
                            token_id = %receipt.asset_token_id,
                            "Found mint from an unconfirmed attempt"
                        );
                        metrics::EFFECTS_REUSED
                            .with_label_values(&[QueueName::Mint.as_str(), "external"])
                            .inc();
                        Ok(Some(self.confirmed(effect_key, receipt)?))
                    }
                    None => Ok(None),
                }
            }
            GuardCheck::Fresh => Ok(None),
        }
    }
}

#[async_trait]
impl Stage for MintStage {
    fn queue(&self) -> QueueName {
        QueueName::Mint
    }

    fn idempotency(&self) -> IdempotencyClass {
        IdempotencyClass::Guarded
    }

    async fn execute(&self, job: &JobRecord, progress: StageProgress) -> Result<Value, StageError> {
        let payload: MintPayload = job.payload_as()?;
        let effect_key =
            IdempotencyGuard::mint_effect_key(&payload.content_id, &payload.request.creator);

        if let Some(result) = self.recover(job, &effect_key).await? {
            progress.report(100);
            return Ok(result);
        }

        self.guard.record_intent(&effect_key, job)?;
        progress.report(10);

        let request = MintRequest {
            content_id: payload.content_id.clone(),
            owner: payload.request.creator.clone(),
            royalty_bps: payload.request.royalty_bps,
            signer: self.signer.clone(),
            metadata_uri: payload.metadata_uri.clone(),
            effect_key: effect_key.clone(),
        };

        let start = Instant::now();
        let submitted = self.ledger.submit_mint(request).await;
        metrics::observe_external(
            "ledger",
            "submit_mint",
            start.elapsed().as_secs_f64(),
            submitted.is_ok(),
        );
        let receipt = submitted?;

        let result = self.confirmed(&effect_key, receipt)?;
        progress.report(100);
        info!(
            job_id = %job.id,
            content_id = %payload.content_id,
            ledger = self.ledger.name(),
            "Minted asset"
        );
        Ok(result)
    }

    async fn reconcile(&self, job: &JobRecord) -> Result<Option<Value>, StageError> {
        let payload: MintPayload = job.payload_as()?;
        let effect_key =
            IdempotencyGuard::mint_effect_key(&payload.content_id, &payload.request.creator);
        self.recover(job, &effect_key).await
    }
}
