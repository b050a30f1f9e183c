//! File metadata handling for transfers.
//!
//! Camera files carry their capture time in the modification timestamp, so a
//! transfer records it before copying and writes it back onto the copy.

use filetime::FileTime;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::SystemTime;

/// Size and timestamps captured from a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStamp {
    /// File size in bytes
    pub size: u64,

    /// Last modified time
    pub modified: SystemTime,
}

impl FileStamp {
    /// Stat a file without blocking the runtime.
    pub async fn capture(path: &Path) -> std::io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            ));
        }
        Ok(Self {
            size: metadata.len(),
            modified: metadata.modified()?,
        })
    }

    /// Set both access and modification time of `path` to the captured mtime.
    pub fn apply_to_path(&self, path: &Path) -> std::io::Result<()> {
        let mtime = FileTime::from_system_time(self.modified);
        filetime::set_file_times(path, mtime, mtime)
    }
}
