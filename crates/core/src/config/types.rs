use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::job::QueueName;
use crate::transcoder::{RenditionFormat, TranscoderConfig};

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub queues: QueuesConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub content_store: ContentStoreConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("mintline.db")
}

/// Pipeline-wide runtime settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Active jobs without a heartbeat for this long are recovered by the reaper.
    #[serde(default = "default_liveness_timeout")]
    pub liveness_timeout_secs: u64,

    /// How often a worker refreshes the heartbeat of its job.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Upper bound on how long an idle worker parks before re-checking its queue.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// How often the reaper scans for abandoned and unchained jobs.
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_ms: u64,

    /// Identity that signs mint transactions. Also the mint lane key.
    #[serde(default = "default_signing_identity")]
    pub signing_identity: String,

    /// Renditions produced when a submission does not name any.
    #[serde(default = "default_target_formats")]
    pub target_formats: Vec<RenditionFormat>,

    /// Priority for submissions that do not set one (lower runs first).
    #[serde(default)]
    pub default_priority: i32,

    /// Terminal jobs older than this are purged. Unset keeps them forever.
    #[serde(default)]
    pub retention_hours: Option<u64>,

    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,
}

fn default_liveness_timeout() -> u64 {
    300
}

fn default_heartbeat_interval() -> u64 {
    5000
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_reaper_interval() -> u64 {
    10_000
}

fn default_signing_identity() -> String {
    "default-signer".to_string()
}

fn default_target_formats() -> Vec<RenditionFormat> {
    vec![RenditionFormat::Mp4]
}

fn default_maintenance_interval() -> u64 {
    3600
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            liveness_timeout_secs: default_liveness_timeout(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            poll_interval_ms: default_poll_interval(),
            reaper_interval_ms: default_reaper_interval(),
            signing_identity: default_signing_identity(),
            target_formats: default_target_formats(),
            default_priority: 0,
            retention_hours: None,
            maintenance_interval_secs: default_maintenance_interval(),
        }
    }
}

impl PipelineConfig {
    /// Sets the liveness timeout.
    pub fn with_liveness_timeout(mut self, secs: u64) -> Self {
        self.liveness_timeout_secs = secs;
        self
    }

    /// Sets the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, ms: u64) -> Self {
        self.heartbeat_interval_ms = ms;
        self
    }

    /// Sets the worker poll and reaper intervals.
    pub fn with_intervals(mut self, poll_ms: u64, reaper_ms: u64) -> Self {
        self.poll_interval_ms = poll_ms;
        self.reaper_interval_ms = reaper_ms;
        self
    }

    pub fn with_signing_identity(mut self, identity: impl Into<String>) -> Self {
        self.signing_identity = identity.into();
        self
    }
}

/// Per-queue concurrency and retry settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct QueueConfig {
    /// Maximum simultaneously Active jobs (and worker tasks) for the queue.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Allow at most one Active job per lane.
    #[serde(default)]
    pub serialize_lanes: bool,
}

fn default_concurrency() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    1000
}

fn default_max_backoff() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            serialize_lanes: false,
        }
    }
}

impl QueueConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets initial and maximum backoff delays.
    pub fn with_backoff(mut self, initial_ms: u64, max_ms: u64) -> Self {
        self.initial_backoff_ms = initial_ms;
        self.max_backoff_ms = max_ms;
        self
    }

    pub fn with_serialized_lanes(mut self, serialize: bool) -> Self {
        self.serialize_lanes = serialize;
        self
    }
}

/// Settings for each of the four queues.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueuesConfig {
    #[serde(default = "default_transcode_queue")]
    pub transcode: QueueConfig,
    #[serde(default = "default_pin_queue")]
    pub pin: QueueConfig,
    #[serde(default = "default_mint_queue")]
    pub mint: QueueConfig,
    #[serde(default = "default_notify_queue")]
    pub notify: QueueConfig,
}

fn default_transcode_queue() -> QueueConfig {
    QueueConfig::default()
        .with_concurrency(4)
        .with_max_attempts(5)
}

fn default_pin_queue() -> QueueConfig {
    QueueConfig::default()
        .with_concurrency(4)
        .with_max_attempts(5)
}

fn default_mint_queue() -> QueueConfig {
    QueueConfig::default()
        .with_concurrency(2)
        .with_max_attempts(3)
        .with_backoff(2000, 60_000)
        .with_serialized_lanes(true)
}

fn default_notify_queue() -> QueueConfig {
    QueueConfig::default()
        .with_concurrency(8)
        .with_max_attempts(3)
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            transcode: default_transcode_queue(),
            pin: default_pin_queue(),
            mint: default_mint_queue(),
            notify: default_notify_queue(),
        }
    }
}

impl QueuesConfig {
    /// Settings for one queue.
    pub fn get(&self, queue: QueueName) -> &QueueConfig {
        match queue {
            QueueName::Transcode => &self.transcode,
            QueueName::Pin => &self.pin,
            QueueName::Mint => &self.mint,
            QueueName::Notify => &self.notify,
        }
    }

    /// Mutable settings for one queue.
    pub fn get_mut(&mut self, queue: QueueName) -> &mut QueueConfig {
        match queue {
            QueueName::Transcode => &mut self.transcode,
            QueueName::Pin => &mut self.pin,
            QueueName::Mint => &mut self.mint,
            QueueName::Notify => &mut self.notify,
        }
    }
}

/// Content-addressed store (IPFS-compatible HTTP API) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContentStoreConfig {
    /// Base URL of the node's HTTP API (e.g., "http://127.0.0.1:5001")
    #[serde(default = "default_content_api_url")]
    pub api_url: String,
    /// Public gateway used to build asset URLs
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    /// Request timeout in seconds (default: 120)
    #[serde(default = "default_content_timeout")]
    pub timeout_secs: u32,
}

fn default_content_api_url() -> String {
    "http://127.0.0.1:5001".to_string()
}

fn default_gateway_url() -> String {
    "https://ipfs.io".to_string()
}

fn default_content_timeout() -> u32 {
    120
}

impl Default for ContentStoreConfig {
    fn default() -> Self {
        Self {
            api_url: default_content_api_url(),
            gateway_url: default_gateway_url(),
            timeout_secs: default_content_timeout(),
        }
    }
}

/// Ledger gateway configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    /// Ledger gateway URL (e.g., "http://localhost:8545")
    pub url: String,
    /// Bearer token for the gateway
    #[serde(default)]
    pub api_key: Option<String>,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_ledger_timeout")]
    pub timeout_secs: u32,
}

fn default_ledger_timeout() -> u32 {
    30
}

impl LedgerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            timeout_secs: default_ledger_timeout(),
        }
    }
}

/// Available notification backends
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotifierBackend {
    /// Write notifications to the log only.
    #[default]
    Log,
    /// POST notifications to a webhook.
    Webhook,
}

/// Notification sink configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub backend: NotifierBackend,
    /// Webhook URL (required when backend = "webhook")
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Shared secret sent in the X-Mintline-Signature header
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u32,
}

fn default_webhook_timeout() -> u32 {
    10
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub pipeline: PipelineConfig,
    pub queues: QueuesConfig,
    pub transcoder: TranscoderConfig,
    pub content_store: ContentStoreConfig,
    pub ledger: SanitizedLedgerConfig,
    pub notifier: SanitizedNotifierConfig,
}

/// Sanitized ledger config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedLedgerConfig {
    pub url: String,
    pub api_key_configured: bool,
    pub timeout_secs: u32,
}

/// Sanitized notifier config (webhook secret hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedNotifierConfig {
    pub backend: NotifierBackend,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    pub webhook_secret_configured: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            pipeline: config.pipeline.clone(),
            queues: config.queues.clone(),
            transcoder: config.transcoder.clone(),
            content_store: config.content_store.clone(),
            ledger: SanitizedLedgerConfig {
                url: config.ledger.url.clone(),
                api_key_configured: config
                    .ledger
                    .api_key
                    .as_ref()
                    .is_some_and(|k| !k.is_empty()),
                timeout_secs: config.ledger.timeout_secs,
            },
            notifier: SanitizedNotifierConfig {
                backend: config.notifier.backend,
                webhook_url: config.notifier.webhook_url.clone(),
                webhook_secret_configured: config.notifier.webhook_secret.is_some(),
            },
        }
    }
}
