//! HTTP API module for the sync agent.

pub mod error;
pub mod health;
pub mod scan;
pub mod sync;

use crate::config::Config;
use crate::job::JobManager;
use crate::store::{DeviceStore, RenameStore};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub devices: DeviceStore,
    pub renames: RenameStore,
    pub jobs: Arc<JobManager>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            devices: DeviceStore::new(config.devices_path()),
            renames: RenameStore::new(config.renames_path()),
            jobs: Arc::new(JobManager::from_config(&config.sync)),
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }
}

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health::health))
        .route("/version", get(health::version))
        // Inventory diff
        .route("/scan", post(scan::scan_device))
        // Sync job control
        .route("/sync/start", post(sync::start_sync))
        .route("/sync/status", get(sync::sync_status).delete(sync::stop_sync))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
