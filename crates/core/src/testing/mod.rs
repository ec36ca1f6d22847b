//! Testing utilities and mock implementations of every collaborator.
//!
//! The mocks let the whole pipeline run in-process: renditions are small
//! files in a temp directory, content ids and tokens are deterministic, and
//! failures can be scripted per call.
//!
//! # Example
//!
//! ```rust,ignore
//! use mintline_core::testing::{MockLedger, MockTranscoder};
//!
//! let transcoder = MockTranscoder::new(tempdir.path());
//! let ledger = MockLedger::new();
//!
//! // Two rate-limit rejections, then success
//! ledger.push_error(LedgerError::RateLimited).await;
//! ledger.push_error(LedgerError::RateLimited).await;
//! ```

mod mock_content_store;
mod mock_ledger;
mod mock_notifier;
mod mock_transcoder;

pub use mock_content_store::MockContentStore;
pub use mock_ledger::MockLedger;
pub use mock_notifier::MockNotifier;
pub use mock_transcoder::MockTranscoder;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::Path;

    use chrono::Utc;
    use serde_json::Value;

    use crate::job::{EnqueueOptions, JobRecord, JobState, JobStore, NewJob, QueueName};
    use crate::stage::{
        AssetMetadata, AssetRequest, MintPayload, NotifyPayload, PinPayload, TranscodePayload,
    };
    use crate::transcoder::{Rendition, RenditionFormat};

    /// An upload request with reasonable defaults.
    pub fn asset_request() -> AssetRequest {
        AssetRequest {
            source_location: "/uploads/sunrise.mov".to_string(),
            metadata: AssetMetadata {
                title: "Sunrise".to_string(),
                description: Some("Timelapse over the bay".to_string()),
                tags: vec!["timelapse".to_string()],
            },
            creator: "0xcreator".to_string(),
            royalty_bps: 500,
            recipient: None,
            target_formats: vec![RenditionFormat::Mp4],
        }
    }

    pub fn transcode_payload() -> Value {
        serde_json::to_value(TranscodePayload {
            request: asset_request(),
        })
        .expect("payload serializes")
    }

    /// A pin payload whose single rendition is a real file under `dir`.
    pub fn pin_payload(dir: &Path) -> Value {
        let location = dir.join("rendition.mp4");
        std::fs::write(&location, b"mock mp4 rendition").expect("write rendition");
        serde_json::to_value(PinPayload {
            request: asset_request(),
            renditions: vec![Rendition {
                format: RenditionFormat::Mp4,
                location: location.to_string_lossy().into_owned(),
                size_bytes: 18,
            }],
            duration_seconds: 12.5,
        })
        .expect("payload serializes")
    }

    pub fn mint_payload() -> Value {
        serde_json::to_value(MintPayload {
            request: asset_request(),
            content_id: "cid123".to_string(),
            gateway_url: "https://ipfs.io/ipfs/cid123".to_string(),
            metadata_uri: "ipfs://cidmeta".to_string(),
            duration_seconds: 12.5,
        })
        .expect("payload serializes")
    }

    pub fn notify_payload() -> Value {
        serde_json::to_value(NotifyPayload {
            asset_id: "asset-1".to_string(),
            token_id: "42".to_string(),
            receipt_id: "0xtx0042".to_string(),
            recipient: "0xcreator".to_string(),
            content_id: "cid123".to_string(),
            gateway_url: "https://ipfs.io/ipfs/cid123".to_string(),
        })
        .expect("payload serializes")
    }

    /// An in-memory Active job on its first attempt; never stored.
    pub fn job(queue: QueueName, correlation_id: &str, payload: Value) -> JobRecord {
        let now = Utc::now();
        JobRecord {
            id: uuid::Uuid::new_v4().to_string(),
            queue,
            correlation_id: correlation_id.to_string(),
            payload,
            state: JobState::Active,
            attempt: 1,
            max_attempts: 3,
            priority: 0,
            progress: 0,
            result: None,
            failure_reason: None,
            lane: None,
            owner: Some("test-worker".to_string()),
            run_at: now,
            heartbeat_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    /// Insert a Waiting job into `store` and return it.
    pub fn enqueued_job(
        store: &dyn JobStore,
        queue: QueueName,
        correlation_id: &str,
        payload: Value,
    ) -> JobRecord {
        store
            .enqueue(NewJob {
                queue,
                correlation_id: correlation_id.to_string(),
                payload,
                options: EnqueueOptions::default(),
            })
            .expect("enqueue fixture job")
    }
}
