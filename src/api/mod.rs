pub mod error;
pub mod handlers;
pub mod state;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::run::registry::ProcessManager;

use state::AppState;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/status", get(handlers::control::status))
        .route("/api/start", post(handlers::control::start))
        .route("/api/stop", post(handlers::control::stop))
        .fallback(handlers::control::not_found)
        .layer(cors)
        .with_state(state)
}

/// Serve the control API until Ctrl-C, then stop any daemon it started.
pub async fn serve(host: &str, port: u16, config_path: &Path, pid_file: PathBuf) -> Result<()> {
    if !config_path.exists() {
        warn!(path = %config_path.display(), "config file not found; /api/start will launch a daemon that fails to load it");
    }
    let manager = ProcessManager::for_capture(config_path, pid_file)?;
    let state = AppState::new(manager);
    let app = router(state.clone());

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    info!(%addr, config = %config_path.display(), "control API listening");
    info!("  Health: GET  http://{addr}/health");
    info!("  Status: GET  http://{addr}/api/status");
    info!("  Start:  POST http://{addr}/api/start");
    info!("  Stop:   POST http://{addr}/api/stop");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("interrupt received, shutting down control API");
        })
        .await
        .context("running server")?;

    let mut manager = state.manager.clone().lock_owned().await;
    tokio::task::spawn_blocking(move || manager.stop())
        .await
        .context("stopping capture daemon")??;
    Ok(())
}
