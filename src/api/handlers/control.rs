use axum::Json;
use axum::extract::State;
use axum::http::Uri;

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::run::registry::{DaemonStatus, Transition};

pub async fn status(State(state): State<AppState>) -> Json<DaemonStatus> {
    Json(state.manager.lock().await.status())
}

pub async fn start(State(state): State<AppState>) -> Result<Json<Transition>, ApiError> {
    let transition = state.manager.lock().await.start()?;
    match transition {
        Transition::AlreadyRunning { pid } => Err(ApiError::Conflict(format!(
            "capture daemon already running (pid {pid})"
        ))),
        other => Ok(Json(other)),
    }
}

pub async fn stop(State(state): State<AppState>) -> Result<Json<Transition>, ApiError> {
    // Stopping waits on the child, keep it off the async workers.
    let mut manager = state.manager.clone().lock_owned().await;
    let transition = tokio::task::spawn_blocking(move || manager.stop())
        .await
        .map_err(|e| ApiError::Internal(format!("stop task failed: {e}")))??;
    match transition {
        Transition::NotRunning => Err(ApiError::Conflict(
            "capture daemon is not running".to_string(),
        )),
        other => Ok(Json(other)),
    }
}

pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("no route for {}", uri.path()))
}
