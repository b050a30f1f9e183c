//! Custom error types for the sync agent.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Device disconnected: {}", root.display())]
    SourceUnavailable { root: PathBuf },

    #[error("No space left on device while writing {}", path.display())]
    DiskFull { path: PathBuf },

    #[error("Timed out after {secs}s waiting for {} to drain", path.display())]
    DrainTimeout { path: PathBuf, secs: u64 },

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Another sync job is running for device: {device}")]
    JobConflict { device: String },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Destination collision: {first} and {second} both map to {destination}")]
    DestinationCollision {
        first: String,
        second: String,
        destination: String,
    },

    #[error("Store error: {0}")]
    Store(String),
}

impl SyncError {
    /// Whether this failure aborts the remaining file list of a job.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::SourceUnavailable { .. }
                | SyncError::DiskFull { .. }
                | SyncError::DrainTimeout { .. }
        )
    }
}

/// True when the OS reported that the destination medium is full.
pub fn is_out_of_space(err: &std::io::Error) -> bool {
    if err.kind() == std::io::ErrorKind::StorageFull {
        return true;
    }
    err.raw_os_error() == Some(nix::errno::Errno::ENOSPC as i32)
}

pub type Result<T> = std::result::Result<T, SyncError>;
