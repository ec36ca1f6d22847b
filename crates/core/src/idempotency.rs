//! Guard against repeating irreversible external effects.
//!
//! Guarded stages record an intent before the external call and the
//! receipt right after it. A later attempt (retry or crash recovery) finds
//! the receipt and reuses it instead of calling out again.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::job::{EffectRecord, JobError, JobRecord, JobStore};

/// Prior state of an effect key.
#[derive(Debug, Clone)]
pub enum GuardCheck {
    /// No attempt has been recorded.
    Fresh,
    /// An attempt was recorded but never confirmed; the outcome is unknown.
    Pending(EffectRecord),
    /// The effect happened; this is its receipt.
    Confirmed(Value),
}

/// Effect ledger access for guarded stages.
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn JobStore>,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Effect key of a mint: same content minted for the same creator is one effect,
    /// whatever the attempt.
    pub fn mint_effect_key(content_id: &str, creator: &str) -> String {
        digest(&["mint", content_id, creator])
    }

    /// Effect key of a pin: one run pinning the primary rendition of one source.
    ///
    /// Rendition paths are stable per run, so the source keeps a resubmitted
    /// run with a corrected upload from reusing the old receipt.
    pub fn pin_effect_key(
        correlation_id: &str,
        source_location: &str,
        primary_rendition: &str,
    ) -> String {
        digest(&["pin", correlation_id, source_location, primary_rendition])
    }

    pub fn check(&self, effect_key: &str) -> Result<GuardCheck, JobError> {
        Ok(match self.store.get_effect(effect_key)? {
            None => GuardCheck::Fresh,
            Some(record) => match record.receipt {
                Some(receipt) => GuardCheck::Confirmed(receipt),
                None => GuardCheck::Pending(record),
            },
        })
    }

    /// Persist the intent. Must happen before the external call.
    pub fn record_intent(&self, effect_key: &str, job: &JobRecord) -> Result<EffectRecord, JobError> {
        self.store
            .record_intent(effect_key, &job.correlation_id, job.queue, &job.id)
    }

    /// Persist the receipt. Must happen before the job is completed.
    pub fn confirm<T: Serialize>(
        &self,
        effect_key: &str,
        receipt: &T,
    ) -> Result<EffectRecord, JobError> {
        let value = serde_json::to_value(receipt)?;
        self.store.confirm_effect(effect_key, value)
    }
}

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        // Separator so ("ab", "c") and ("a", "bc") differ
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}
