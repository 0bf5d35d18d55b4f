use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vms_core::anpr::{ProcessDetector, ProcessExtractor, StubDetector, StubExtractor};
use vms_core::app::Application;
use vms_core::bus::EventBus;
use vms_core::config::Config;
use vms_core::store::InMemoryStore;
use vms_core::transcoder::ProcessTranscoderDriver;
use vms_core::vault::CredentialVault;
use vms_core::{health, http, retention};

#[derive(Parser, Debug)]
#[command(author, version, about = "Video management core: camera ingestion, recording, and ANPR", long_about = None)]
struct CliArgs {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "vms.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "fatal error during startup");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let config = if args.config.exists() {
        Config::from_file(&args.config)?
    } else {
        info!(path = %args.config.display(), "no config file found, using defaults");
        Config::default()
    };

    let ffmpeg_path = std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string());
    let enc_key = std::env::var("ENC_KEY")
        .map_err(|_| anyhow::anyhow!("ENC_KEY must be set to a 32-byte key"))?;
    let anpr_enabled = std::env::var("ANPR_ENABLED")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let store = Arc::new(InMemoryStore::new());
    let bus = Arc::new(EventBus::new());
    let vault = Arc::new(CredentialVault::new(enc_key.as_bytes())?);
    let transcoder = Arc::new(ProcessTranscoderDriver::new(
        ffmpeg_path,
        std::time::Duration::from_secs(config.transcoder.grace_period_secs),
    ));

    let extract_timeout = std::time::Duration::from_secs(config.anpr.extract_timeout_secs);
    let app = match std::env::var("ANPR_DETECTOR_PATH") {
        Ok(detector_path) => {
            let extractor_path = std::env::var("ANPR_EXTRACTOR_PATH")
                .unwrap_or_else(|_| detector_path.clone());
            info!(detector = %detector_path, extractor = %extractor_path, "using process-backed ANPR strategies");
            Application::with_anpr_strategies(
                config.clone(),
                store,
                bus,
                vault,
                transcoder,
                anpr_enabled,
                Arc::new(ProcessDetector::new(detector_path, extract_timeout)),
                Arc::new(ProcessExtractor::new(extractor_path, extract_timeout)),
            )
        }
        Err(_) => Application::with_anpr_strategies(
            config.clone(),
            store,
            bus,
            vault,
            transcoder,
            anpr_enabled,
            Arc::new(StubDetector::default()),
            Arc::new(StubExtractor::default()),
        ),
    };

    for camera in app.store.list_cameras().await? {
        app.register_camera(camera);
    }

    let health_task = tokio::spawn(health::run(app.clone()));
    let retention_task = tokio::spawn(retention::run(app.clone()));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "http server listening");
    let router = http::router(app.clone());

    tokio::select! {
        result = axum::serve(listener, router) => {
            if let Err(e) = result {
                error!(error = %e, "http server exited with error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
    }

    health_task.abort();
    retention_task.abort();
    Ok(())
}
