//! Sync job endpoints.

use super::error::ApiError;
use super::AppState;
use crate::job::{StartRequest, StatusSnapshot};
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSyncRequest {
    #[serde(alias = "device")]
    pub device_id: String,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSyncResponse {
    pub success: bool,
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub struct StopSyncResponse {
    pub success: bool,
}

/// POST /sync/start - Start transferring the given files in the background
pub async fn start_sync(
    State(state): State<AppState>,
    Json(req): Json<StartSyncRequest>,
) -> Result<Json<StartSyncResponse>, ApiError> {
    if req.files.is_empty() {
        return Err(ApiError::BadRequest("No files specified".into()));
    }

    let device = state.devices.get(&req.device_id).await?;
    let overlay = state.renames.overlay_for(&req.device_id).await;

    info!("Sync requested for {} ({} files)", req.device_id, req.files.len());

    let job_id = state
        .jobs
        .start(StartRequest {
            device_id: req.device_id,
            source_root: device.source_root,
            target_root: device.target_root,
            files: req.files,
            overlay,
        })
        .await?;

    Ok(Json(StartSyncResponse {
        success: true,
        job_id,
    }))
}

/// GET /sync/status - Snapshot of the current job
pub async fn sync_status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.jobs.status().await)
}

/// DELETE /sync/status - Cancel and discard the current job
pub async fn stop_sync(State(state): State<AppState>) -> Json<StopSyncResponse> {
    if !state.jobs.stop().await {
        info!("Stop requested with no active job");
    }
    Json(StopSyncResponse { success: true })
}
