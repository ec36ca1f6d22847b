//! API tests against an in-process router with mock collaborators.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::{json, Value};

use common::{TestConfig, TestFixture};
use mintline_core::TranscoderError;

fn submission(correlation_id: &str) -> Value {
    json!({
        "source_location": "/uploads/sunrise.mov",
        "metadata": { "title": "Sunrise", "tags": ["nature"] },
        "creator": "0xcreator",
        "royalty_bps": 500,
        "correlation_id": correlation_id
    })
}

fn is_finished(status: &Value) -> bool {
    status["outcome"]["status"] != "in_progress"
}

// =============================================================================
// Health and config
// =============================================================================

#[tokio::test]
async fn test_health() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/health").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
}

#[tokio::test]
async fn test_config_hides_secrets() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/config").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["ledger"]["api_key_configured"], false);
    assert!(response.body["ledger"].get("api_key").is_none());
    assert_eq!(response.body["pipeline"]["signing_identity"], "test-signer");
}

// =============================================================================
// Submission
// =============================================================================

#[tokio::test]
async fn test_submit_creates_transcode_job() {
    let fixture = TestFixture::new().await;

    let response = fixture.post("/api/v1/pipelines", submission("upload-1")).await;
    assert_status!(response, StatusCode::CREATED);
    assert_eq!(response.body["correlation_id"], "upload-1");
    assert_eq!(response.body["created"], true);
    let job_id = response.body["job_id"].as_str().unwrap().to_string();

    let status = fixture.get("/api/v1/pipelines/upload-1").await;
    assert_status!(status, StatusCode::OK);
    assert_eq!(status.body["outcome"]["status"], "in_progress");
    assert_eq!(status.body["current_stage"], "transcode");
    assert_eq!(status.body["progress"], 0);
    assert_eq!(status.body["stages"][0]["queue"], "transcode");
    assert_eq!(status.body["stages"][0]["state"], "waiting");
    assert_eq!(status.body["stages"][0]["job_id"], job_id.as_str());
    assert_eq!(status.body["stages"][1]["state"], Value::Null);
}

#[tokio::test]
async fn test_submit_generates_correlation_id() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/api/v1/pipelines",
            json!({ "source_location": "/uploads/a.mov", "creator": "0xcreator" }),
        )
        .await;
    assert_status!(response, StatusCode::CREATED);
    let correlation_id = response.body["correlation_id"].as_str().unwrap();
    assert!(!correlation_id.is_empty());

    let status = fixture
        .get(&format!("/api/v1/pipelines/{}", correlation_id))
        .await;
    assert_status!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_resubmitting_live_run_is_idempotent() {
    let fixture = TestFixture::new().await;

    let first = fixture.post("/api/v1/pipelines", submission("upload-1")).await;
    assert_status!(first, StatusCode::CREATED);

    let second = fixture.post("/api/v1/pipelines", submission("upload-1")).await;
    assert_status!(second, StatusCode::OK);
    assert_eq!(second.body["created"], false);
    assert_eq!(second.body["job_id"], first.body["job_id"]);

    let jobs = fixture.get("/api/v1/pipelines/upload-1/jobs").await;
    assert_eq!(jobs.body["jobs"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_submit_rejects_invalid_royalty() {
    let fixture = TestFixture::new().await;

    let mut body = submission("upload-1");
    body["royalty_bps"] = json!(20_000);
    let response = fixture.post("/api/v1/pipelines", body).await;

    assert_status!(response, StatusCode::BAD_REQUEST);
    assert!(response.body["error"]
        .as_str()
        .unwrap()
        .contains("royalty_bps"));
}

#[tokio::test]
async fn test_submit_rejects_empty_creator() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/api/v1/pipelines",
            json!({ "source_location": "/uploads/a.mov", "creator": "  " }),
        )
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_submit_rejects_malformed_json() {
    let fixture = TestFixture::new().await;
    let response = fixture.post_raw("/api/v1/pipelines", "{not json").await;
    assert!(response.status.is_client_error());
}

// =============================================================================
// Status, cancellation
// =============================================================================

#[tokio::test]
async fn test_unknown_run_is_not_found() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/pipelines/nope").await;
    assert_status!(response, StatusCode::NOT_FOUND);

    let response = fixture.get("/api/v1/pipelines/nope/jobs").await;
    assert_status!(response, StatusCode::NOT_FOUND);

    let response = fixture.delete("/api/v1/pipelines/nope").await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_run() {
    let fixture = TestFixture::new().await;
    fixture.post("/api/v1/pipelines", submission("upload-1")).await;

    let response = fixture.delete("/api/v1/pipelines/upload-1").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["cancelled"].as_array().unwrap().len(), 1);
    assert_eq!(response.body["cancelled"][0]["state"], "cancelled");

    let status = fixture.get("/api/v1/pipelines/upload-1").await;
    assert_eq!(status.body["outcome"]["status"], "cancelled");

    // Nothing left to cancel
    let again = fixture.delete("/api/v1/pipelines/upload-1").await;
    assert_status!(again, StatusCode::CONFLICT);

    // A cancelled run cannot be resubmitted
    let resubmit = fixture.post("/api/v1/pipelines", submission("upload-1")).await;
    assert_status!(resubmit, StatusCode::CONFLICT);
}

// =============================================================================
// Queues and jobs
// =============================================================================

#[tokio::test]
async fn test_queue_stats() {
    let fixture = TestFixture::new().await;
    fixture.post("/api/v1/pipelines", submission("upload-1")).await;
    fixture.post("/api/v1/pipelines", submission("upload-2")).await;

    let all = fixture.get("/api/v1/queues").await;
    assert_status!(all, StatusCode::OK);
    let queues: Vec<&str> = all
        .body
        .as_array()
        .unwrap()
        .iter()
        .map(|q| q["queue"].as_str().unwrap())
        .collect();
    assert_eq!(queues, vec!["transcode", "pin", "mint", "notify"]);

    let transcode = fixture.get("/api/v1/queues/transcode").await;
    assert_status!(transcode, StatusCode::OK);
    assert_eq!(transcode.body["counts"]["waiting"], 2);
    assert_eq!(transcode.body["counts"]["active"], 0);

    let mint = fixture.get("/api/v1/queues/mint").await;
    assert_eq!(mint.body["serialize_lanes"], true);
    assert_eq!(mint.body["counts"]["waiting"], 0);
}

#[tokio::test]
async fn test_unknown_queue_is_not_found() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/queues/upload").await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_get_and_cancel_job() {
    let fixture = TestFixture::new().await;
    fixture.post("/api/v1/pipelines", submission("upload-1")).await;

    let listed = fixture
        .get("/api/v1/jobs?queue=transcode&state=waiting&limit=10")
        .await;
    assert_status!(listed, StatusCode::OK);
    assert_eq!(listed.body["limit"], 10);
    let jobs = listed.body["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    let job_id = jobs[0]["id"].as_str().unwrap().to_string();

    let job = fixture.get(&format!("/api/v1/jobs/{}", job_id)).await;
    assert_status!(job, StatusCode::OK);
    assert_eq!(job.body["correlation_id"], "upload-1");
    assert_eq!(job.body["payload"]["request"]["creator"], "0xcreator");

    let cancelled = fixture.delete(&format!("/api/v1/jobs/{}", job_id)).await;
    assert_status!(cancelled, StatusCode::OK);
    assert_eq!(cancelled.body["state"], "cancelled");

    let again = fixture.delete(&format!("/api/v1/jobs/{}", job_id)).await;
    assert_status!(again, StatusCode::CONFLICT);

    let missing = fixture.get("/api/v1/jobs/does-not-exist").await;
    assert_status!(missing, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_jobs_rejects_unknown_state() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/jobs?state=sleeping").await;
    assert_status!(response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_runner_status_when_stopped() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/runner").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["running"], false);
}

// =============================================================================
// Whole runs
// =============================================================================

#[tokio::test]
async fn test_run_reaches_minted() {
    let fixture = TestFixture::with_config(TestConfig::with_runner()).await;

    let response = fixture.post("/api/v1/pipelines", submission("upload-1")).await;
    assert_status!(response, StatusCode::CREATED);

    let status = fixture
        .wait_for_run("upload-1", Duration::from_secs(10), is_finished)
        .await;
    assert_eq!(status["outcome"]["status"], "minted");
    assert_eq!(status["progress"], 100);
    for stage in status["stages"].as_array().unwrap() {
        assert_eq!(stage["state"], "completed", "stage {}", stage["queue"]);
    }

    let jobs = fixture.get("/api/v1/pipelines/upload-1/jobs").await;
    let jobs = jobs.body["jobs"].as_array().unwrap().clone();
    assert_eq!(jobs.len(), 4);
    let mint = jobs.iter().find(|j| j["queue"] == "mint").unwrap();
    assert_eq!(mint["result"]["asset_token_id"], "42");
    assert_eq!(mint["lane"], "test-signer");
    let pin = jobs.iter().find(|j| j["queue"] == "pin").unwrap();
    assert_eq!(pin["result"]["content_id"], "cid123");

    assert_eq!(fixture.ledger.mint_count().await, 1);
    assert_eq!(fixture.notifier.sent().await.len(), 1);

    let (metrics_status, metrics) = fixture.get_text("/metrics").await;
    assert_eq!(metrics_status, StatusCode::OK);
    assert!(metrics.contains("mintline_jobs_by_state"));
    assert!(metrics.contains("mintline_runner_running 1"));

    fixture.shutdown().await;
}

#[tokio::test]
async fn test_permanent_transcode_failure_is_reported() {
    let fixture = TestFixture::with_config(TestConfig::with_runner()).await;
    fixture
        .transcoder
        .push_error(TranscoderError::UnsupportedSource {
            reason: "not a video".to_string(),
        })
        .await;

    fixture.post("/api/v1/pipelines", submission("upload-1")).await;

    let status = fixture
        .wait_for_run("upload-1", Duration::from_secs(10), is_finished)
        .await;
    assert_eq!(status["outcome"]["status"], "failed_at");
    assert_eq!(status["outcome"]["stage"], "transcode");
    assert!(status["outcome"]["reason"]
        .as_str()
        .unwrap()
        .contains("not a video"));
    assert_eq!(status["stages"][0]["attempt"], 1);
    assert_eq!(status["stages"][1]["state"], Value::Null);
    assert_eq!(fixture.ledger.mint_count().await, 0);

    fixture.shutdown().await;
}
