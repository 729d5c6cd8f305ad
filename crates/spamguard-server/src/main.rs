//! SpamGuard serving endpoint.
//!
//! Loads the calibrated pipeline artifact once at startup (aborting if it is
//! missing or incompatible) and serves classification requests over HTTP.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use spamguard_core::ServerConfig;
use spamguard_model::load_artifact;
use spamguard_server::{build_router, config, AppState};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging
    tracing_subscriber::fmt::init();

    let config = load_server_config()?;
    info!(
        listen_addr = %config.listen_addr,
        artifact_path = %config.artifact_path,
        "Starting SpamGuard server"
    );

    // The process must not serve without a model: a missing or incompatible
    // artifact aborts startup.
    let artifact = load_artifact(Path::new(&config.artifact_path))
        .map_err(|e| anyhow::anyhow!("Failed to load model artifact: {e}"))?;
    info!(
        schema_version = artifact.schema_version,
        folds = artifact.pipeline.n_folds(),
        "Model pipeline loaded"
    );

    let listen_addr = config.listen_addr.clone();
    let state = Arc::new(AppState::new(artifact, config));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    info!(%listen_addr, "SpamGuard server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Load server configuration from a YAML file or fall back to defaults.
///
/// Checks (in order):
/// 1. First CLI argument as config path
/// 2. `SPAMGUARD_CONFIG` environment variable
/// 3. Default configuration
fn load_server_config() -> anyhow::Result<ServerConfig> {
    let config_path: Option<PathBuf> = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SPAMGUARD_CONFIG").ok())
        .map(PathBuf::from);

    match config_path {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration from file");
            config::load_config(&path)
        }
        None => {
            info!("No config file specified, using defaults");
            Ok(ServerConfig::default())
        }
    }
}
