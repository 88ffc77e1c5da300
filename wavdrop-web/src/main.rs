//! wavdrop-web - Audio upload service
//!
//! Serves the upload page, turns each uploaded clip into a 16 kHz mono WAV and
//! a mel-spectrogram PNG, and stores both in an object-storage bucket.
//!
//! Configuration priority: CLI argument → environment variable → TOML file →
//! compiled default.

use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wavdrop_common::config::{
    self, ConfigOverrides, LoggingConfig, StorageBackend, TomlConfig, ENV_BIND, ENV_BUCKET,
    ENV_CONFIG, ENV_PORT, ENV_STORAGE_BACKEND, ENV_STORAGE_KEY, ENV_STORAGE_URL,
};
use wavdrop_common::events::EventBus;

use wavdrop_web::pipeline::PipelineSettings;
use wavdrop_web::{storage, AppState};

/// Command-line arguments for wavdrop-web
#[derive(Parser, Debug)]
#[command(name = "wavdrop-web")]
#[command(about = "Audio upload, spectrogram and object-storage service")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = ENV_CONFIG)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = ENV_PORT)]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, env = ENV_BIND)]
    bind: Option<String>,

    /// Object storage backend (supabase or memory)
    #[arg(long, env = ENV_STORAGE_BACKEND)]
    storage_backend: Option<StorageBackend>,

    /// Supabase project URL
    #[arg(long, env = ENV_STORAGE_URL)]
    storage_url: Option<String>,

    /// Supabase API key
    #[arg(long, env = ENV_STORAGE_KEY, hide_env_values = true)]
    storage_key: Option<String>,

    /// Target bucket
    #[arg(long, env = ENV_BUCKET)]
    bucket: Option<String>,

    /// Print the effective configuration (API key masked) and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            bind: self.bind.clone(),
            port: self.port,
            storage_backend: self.storage_backend,
            storage_url: self.storage_url.clone(),
            storage_key: self.storage_key.clone(),
            bucket: self.bucket.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = config::load_toml_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    config.apply_overrides(args.overrides());
    config.validate().context("Invalid configuration")?;

    if args.print_config {
        print!("{}", config.redacted().to_toml_string()?);
        return Ok(());
    }

    init_tracing(&config.logging)?;

    info!(
        "Starting wavdrop-web v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE"),
    );
    // Loader messages predate the subscriber, so repeat the source here
    match args.config.clone().or_else(config::default_config_path) {
        Some(path) if path.exists() => info!("Configuration file: {}", path.display()),
        _ => info!("Configuration file: none (compiled defaults)"),
    }
    log_config(&config);

    // Storage handle is required before accepting any request
    let store = storage::connect(&config.storage).context("Failed to create storage client")?;

    let event_bus = EventBus::new(100);
    let state = AppState::new(
        store,
        PipelineSettings::from_config(&config.scratch),
        config.batch.failure_policy,
        event_bus,
    )
    .with_max_upload_bytes(config.server.max_upload_bytes);

    let app = wavdrop_web::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid bind address {}:{}",
                config.server.bind, config.server.port
            )
        })?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing: `RUST_LOG` wins, else the configured level
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid log level")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
        }
        None => {
            builder
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
        }
    }
    Ok(())
}

fn log_config(config: &TomlConfig) {
    info!("Storage backend: {}", config.storage.backend.as_str());
    info!("Bucket: {}", config.storage.bucket);
    info!(
        "Scratch directories: {} / {}",
        config.scratch.audio_dir.display(),
        config.scratch.spectrogram_dir.display()
    );
    info!("Failure policy: {:?}", config.batch.failure_policy);
    info!("Max upload size: {} bytes", config.server.max_upload_bytes);
    match config.storage.request_timeout_secs {
        Some(secs) => info!("Storage request timeout: {}s", secs),
        None => info!("Storage request timeout: none"),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
