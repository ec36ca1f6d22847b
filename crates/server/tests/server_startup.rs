//! Start the real binary against a temporary config and database.

use std::io::Write;
use std::net::TcpListener;
use std::path::Path;
use std::process::Output;
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tempfile::{NamedTempFile, TempDir};
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Smallest config the server accepts: a ledger section plus local paths.
fn minimal_config(port: u16, data_dir: &Path) -> String {
    format!(
        r#"
[server]
host = "127.0.0.1"
port = {port}

[database]
path = "{db}"

[transcoder]
output_dir = "{renditions}"

[ledger]
url = "http://127.0.0.1:1"
api_key = "super-secret"
"#,
        db = data_dir.join("mintline.db").display(),
        renditions = data_dir.join("renditions").display(),
    )
}

fn config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn mintline(config_path: &Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_mintline"));
    command
        .env("MINTLINE_CONFIG", config_path)
        .env("RUST_LOG", "error")
        .kill_on_drop(true);
    command
}

/// Run the binary and wait for it to exit on its own.
async fn run_until_exit(config_path: &Path) -> Output {
    timeout(Duration::from_secs(5), mintline(config_path).output())
        .await
        .expect("server did not exit")
        .expect("failed to run server")
}

/// A server process that is killed when dropped.
struct RunningServer {
    _child: Child,
    _data_dir: TempDir,
    _config: NamedTempFile,
    base_url: String,
    client: Client,
}

impl RunningServer {
    async fn start() -> Self {
        let port = free_port();
        let data_dir = TempDir::new().unwrap();
        let config = config_file(&minimal_config(port, data_dir.path()));
        let child = mintline(config.path()).spawn().unwrap();

        let server = Self {
            _child: child,
            _data_dir: data_dir,
            _config: config,
            base_url: format!("http://127.0.0.1:{}", port),
            client: Client::new(),
        };
        server.wait_ready().await;
        server
    }

    async fn wait_ready(&self) {
        for _ in 0..100 {
            if self.client.get(self.url("/api/v1/health")).send().await.is_ok() {
                return;
            }
            sleep(Duration::from_millis(50)).await;
        }
        panic!("server did not start at {}", self.base_url);
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_text(&self, path: &str) -> (reqwest::StatusCode, String) {
        let response = self.client.get(self.url(path)).send().await.unwrap();
        let status = response.status();
        (status, response.text().await.unwrap())
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = RunningServer::start().await;

    let (status, body) = server.get_text("/api/v1/health").await;
    assert!(status.is_success());
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_config_endpoint_hides_ledger_key() {
    let server = RunningServer::start().await;

    let (status, body) = server.get_text("/api/v1/config").await;
    assert!(status.is_success());
    assert!(!body.contains("super-secret"));

    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["ledger"]["api_key_configured"], true);
}

#[tokio::test]
async fn test_runner_starts_with_server() {
    let server = RunningServer::start().await;

    let (_, body) = server.get_text("/api/v1/runner").await;
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["running"], true);
    assert_eq!(json["pools"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_missing_config_file_exits_with_error() {
    let output = run_until_exit(Path::new("/nonexistent/config.toml")).await;
    assert!(!output.status.success());
}

#[tokio::test]
async fn test_missing_ledger_section_exits_with_error() {
    let config = config_file("[server]\nport = 8080\n");
    let output = run_until_exit(config.path()).await;
    assert!(!output.status.success());
}

#[tokio::test]
async fn test_invalid_queue_settings_exit_with_error() {
    let data_dir = TempDir::new().unwrap();
    let config = config_file(&format!(
        "{}\n[queues.mint]\nconcurrency = 0\n",
        minimal_config(free_port(), data_dir.path())
    ));
    let output = run_until_exit(config.path()).await;
    assert!(!output.status.success());
}
