//! Inventory diff endpoint.

use super::error::ApiError;
use super::AppState;
use crate::fs::inventory::{diff, scan, MissingSet, ScanOptions};
use crate::transfer::progress::format_bytes;
use crate::utils::Result;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    #[serde(alias = "device")]
    pub device_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResponse {
    pub missing_files: Vec<String>,
    pub source_root: PathBuf,
    pub target_root: PathBuf,
    pub total_missing_bytes: u64,
}

/// POST /scan - List files on the device that the target lacks
pub async fn scan_device(
    State(state): State<AppState>,
    Json(req): Json<ScanRequest>,
) -> std::result::Result<Json<ScanResponse>, ApiError> {
    let device = state.devices.get(&req.device_id).await?;

    if tokio::fs::metadata(&device.source_root).await.is_err() {
        return Err(ApiError::BadRequest(format!(
            "Source path does not exist: {}",
            device.source_root.display()
        )));
    }

    if tokio::fs::metadata(&device.target_root).await.is_err() {
        info!("Creating target directory {}", device.target_root.display());
        tokio::fs::create_dir_all(&device.target_root)
            .await
            .map_err(|e| anyhow::anyhow!("cannot create {}: {}", device.target_root.display(), e))?;
    }

    let ignore = device.ignore_set();
    let options = ScanOptions {
        max_depth: state.config.sync.max_scan_depth,
    };
    let source_root = device.source_root.clone();
    let target_root = device.target_root.clone();

    let missing = tokio::task::spawn_blocking(move || -> Result<MissingSet> {
        let source = scan(&source_root, &ignore, &options)?;
        let target = scan(&target_root, &ignore, &options)?;
        Ok(diff(&source, &target))
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;

    info!(
        "Scanned {}: {} missing files ({})",
        req.device_id,
        missing.files.len(),
        format_bytes(missing.total_bytes)
    );

    Ok(Json(ScanResponse {
        missing_files: missing.files,
        source_root: device.source_root,
        target_root: device.target_root,
        total_missing_bytes: missing.total_bytes,
    }))
}
