//! Sync job state and the single-flight job manager.

pub mod manager;

use crate::transfer::progress::SyncProgressEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use manager::{JobManager, StartRequest};

/// Lifecycle of a sync job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Idle,
    Syncing,
    Completed,
    Error,
}

/// One run of the transfer engine over a fixed file list
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub device_id: String,
    pub files: Vec<String>,
    pub status: JobStatus,
    /// Latest event seen
    #[serde(rename = "progress")]
    pub current_progress: Option<SyncProgressEvent>,
    /// `file-complete` and `error` events, in order
    pub history: Vec<SyncProgressEvent>,
    #[serde(rename = "error")]
    pub error_message: Option<String>,
    pub start_time: DateTime<Utc>,
}

impl Job {
    pub fn new(id: String, device_id: String, files: Vec<String>) -> Self {
        Self {
            id,
            device_id,
            files,
            status: JobStatus::Syncing,
            current_progress: None,
            history: Vec::new(),
            error_message: None,
            start_time: Utc::now(),
        }
    }

    /// Fold one engine event into the job.
    pub fn record(&mut self, event: SyncProgressEvent) {
        if event.is_file_terminal() {
            self.history.push(event.clone());
        }
        self.current_progress = Some(event);
    }
}

/// Read-only view returned to status pollers
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub status: JobStatus,
    pub job: Option<Job>,
}

impl StatusSnapshot {
    pub fn idle() -> Self {
        Self {
            status: JobStatus::Idle,
            job: None,
        }
    }
}
