//! Common test utilities for API testing with mocks.
//!
//! This module provides a test fixture that creates an in-process router
//! backed by a real SQLite store and a pipeline whose collaborators are
//! mocks, so whole runs can be driven without ffmpeg, IPFS or a ledger.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use mintline_core::{
    testing::{MockContentStore, MockLedger, MockNotifier, MockTranscoder},
    Config, ContentStore, JobStore, LedgerClient, NotificationSink,
    OnboardingPipeline, PipelineConfig, PipelineServices, QueueName, QueuesConfig, SqliteJobStore,
    Transcoder, TranscoderConfig,
};
use mintline_core::config::{
    ContentStoreConfig, DatabaseConfig, LedgerConfig, NotifierConfig, ServerConfig,
};
use mintline_server::{create_router, AppState};

/// Test fixture for API testing with mock collaborators.
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_submit() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture.post("/api/v1/pipelines", json!({
///         "source_location": "/uploads/a.mov",
///         "creator": "0xcreator"
///     })).await;
///
///     assert_eq!(response.status, 201);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    pub pipeline: Arc<OnboardingPipeline>,
    pub transcoder: Arc<MockTranscoder>,
    pub content_store: Arc<MockContentStore>,
    pub ledger: Arc<MockLedger>,
    pub notifier: Arc<MockNotifier>,
    /// Temporary directory for the database and renditions
    pub temp_dir: TempDir,
}

/// Status and JSON body of one request; an empty or non-JSON body is `Null`.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestResponse {
    fn parse(status: StatusCode, bytes: &[u8]) -> Self {
        let body = serde_json::from_slice(bytes).unwrap_or(Value::Null);
        Self { status, body }
    }
}

/// Configuration for test fixture.
#[derive(Debug, Clone, Default)]
pub struct TestConfig {
    /// Start worker and reaper loops
    pub start_runner: bool,
}

impl TestConfig {
    pub fn with_runner() -> Self {
        Self { start_runner: true }
    }
}

/// Pipeline settings with short intervals and no backoff.
pub fn fast_pipeline_config() -> PipelineConfig {
    PipelineConfig::default()
        .with_heartbeat_interval(50)
        .with_liveness_timeout(5)
        .with_intervals(20, 200)
        .with_signing_identity("test-signer")
}

/// Queue settings with one worker per queue and immediate retries.
pub fn fast_queues_config() -> QueuesConfig {
    let mut queues = QueuesConfig::default();
    for queue in QueueName::ALL {
        let settings = queues.get_mut(queue);
        settings.concurrency = 1;
        settings.initial_backoff_ms = 0;
        settings.max_backoff_ms = 0;
    }
    queues
}

impl TestFixture {
    /// Create a fixture whose runner is not started.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        let renditions = temp_dir.path().join("renditions");

        let transcoder = Arc::new(MockTranscoder::new(&renditions));
        let content_store = Arc::new(MockContentStore::new());
        let ledger = Arc::new(MockLedger::new());
        let notifier = Arc::new(MockNotifier::new());

        let config = Config {
            server: ServerConfig {
                host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                port: 0, // Not used for in-process testing
            },
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            pipeline: fast_pipeline_config(),
            queues: fast_queues_config(),
            transcoder: TranscoderConfig::default().with_output_dir(renditions),
            content_store: ContentStoreConfig::default(),
            ledger: LedgerConfig::new("http://ledger.invalid"),
            notifier: NotifierConfig::default(),
        };

        let store: Arc<dyn JobStore> =
            Arc::new(SqliteJobStore::new(&db_path).expect("Failed to create job store"));

        let pipeline = Arc::new(OnboardingPipeline::new(
            config.pipeline.clone(),
            config.queues.clone(),
            store,
            PipelineServices {
                transcoder: Arc::clone(&transcoder) as Arc<dyn Transcoder>,
                content_store: Arc::clone(&content_store) as Arc<dyn ContentStore>,
                ledger: Arc::clone(&ledger) as Arc<dyn LedgerClient>,
                notifier: Arc::clone(&notifier) as Arc<dyn NotificationSink>,
            },
        ));

        if test_config.start_runner {
            pipeline.start().await;
        }

        let state = Arc::new(AppState::new(config, Arc::clone(&pipeline)));
        let router = create_router(state);

        Self {
            router,
            pipeline,
            transcoder,
            content_store,
            ledger,
            notifier,
            temp_dir,
        }
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.json_request("GET", path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.json_request("POST", path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> TestResponse {
        self.json_request("DELETE", path, None).await
    }

    /// POST a body that is sent as-is, for malformed-JSON cases.
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::post(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap();
        let (status, bytes) = self.send_raw(request).await;
        TestResponse::parse(status, &bytes)
    }

    /// Fetch a non-JSON body, e.g. the metrics page.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let (status, bytes) = self
            .send_raw(Request::get(path).body(Body::empty()).unwrap())
            .await;
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Poll run status until `done` accepts it or the timeout passes.
    pub async fn wait_for_run<F>(&self, correlation_id: &str, timeout: Duration, done: F) -> Value
    where
        F: Fn(&Value) -> bool,
    {
        let path = format!("/api/v1/pipelines/{}", correlation_id);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let response = self.get(&path).await;
            if response.status == StatusCode::OK && done(&response.body) {
                return response.body;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "Run {} did not reach the expected status in {:?}; last: {}",
                    correlation_id, timeout, response.body
                );
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn json_request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let builder = Request::builder().method(method).uri(path);
        let request = match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let (status, bytes) = self.send_raw(request).await;
        TestResponse::parse(status, &bytes)
    }

    async fn send_raw(&self, request: Request<Body>) -> (StatusCode, Bytes) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes)
    }

    /// Stop the runner if it was started.
    pub async fn shutdown(&self) {
        self.pipeline.stop().await;
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
