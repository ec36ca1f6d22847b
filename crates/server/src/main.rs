use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mintline_core::{
    create_notifier, load_config, validate_config, ContentStore, FfmpegTranscoder,
    HttpContentStore, HttpLedgerClient, JobStore, LedgerClient, OnboardingPipeline,
    PipelineServices, SqliteJobStore, Transcoder,
};
use mintline_server::{create_router, AppState};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("MINTLINE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config.pipeline).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        "mintline {} starting (pipeline config {})",
        VERSION,
        &config_hash[..16]
    );
    info!("Database path: {:?}", config.database.path);
    info!("Signing identity: {}", config.pipeline.signing_identity);

    let store: Arc<dyn JobStore> = Arc::new(
        SqliteJobStore::new(&config.database.path).context("Failed to open job store")?,
    );
    info!("Job store initialized");

    let transcoder: Arc<dyn Transcoder> = Arc::new(FfmpegTranscoder::new(config.transcoder.clone()));
    info!(
        "Transcoder output directory: {:?}",
        config.transcoder.output_dir
    );

    let content_store: Arc<dyn ContentStore> = Arc::new(
        HttpContentStore::new(config.content_store.clone())
            .context("Failed to create content store client")?,
    );
    info!("Content store at {}", config.content_store.api_url);

    let ledger: Arc<dyn LedgerClient> = Arc::new(
        HttpLedgerClient::new(config.ledger.clone()).context("Failed to create ledger client")?,
    );
    info!("Ledger gateway at {}", config.ledger.url);

    let notifier = create_notifier(&config.notifier).context("Failed to create notifier")?;
    info!("Using notifier: {:?}", config.notifier.backend);

    let pipeline = Arc::new(OnboardingPipeline::new(
        config.pipeline.clone(),
        config.queues.clone(),
        store,
        PipelineServices {
            transcoder,
            content_store,
            ledger,
            notifier,
        },
    ));

    pipeline.start().await;
    info!("Pipeline runner started");

    let state = Arc::new(AppState::new(config.clone(), Arc::clone(&pipeline)));
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Stopping pipeline runner...");
    pipeline.stop().await;
    info!("Server shut down");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
