//! Rename overlay: per-device destination names for source files.
//!
//! The persisted document is a flat JSON object keyed `"<deviceId>:<originalName>"`.
//! Only destination paths are affected; source files are never renamed.

use crate::utils::{Result, SyncError};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// Destination-name overrides for one device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenameOverlay {
    entries: HashMap<String, String>,
}

impl RenameOverlay {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Destination name for `relative_path` (the path itself when not renamed).
    pub fn destination_for<'a>(&'a self, relative_path: &'a str) -> &'a str {
        self.entries
            .get(relative_path)
            .map(String::as_str)
            .unwrap_or(relative_path)
    }

    /// Resolve the destination of every file, rejecting unsafe paths and
    /// files that would land on the same destination.
    pub fn destinations(&self, files: &[String]) -> Result<Vec<String>> {
        let mut seen: HashMap<&str, &str> = HashMap::with_capacity(files.len());
        let mut resolved = Vec::with_capacity(files.len());

        for file in files {
            if !is_safe_relative(file) {
                return Err(SyncError::InvalidPath(file.clone()));
            }
            let destination = self.destination_for(file);
            if !is_safe_relative(destination) {
                return Err(SyncError::InvalidPath(destination.to_string()));
            }
            if let Some(first) = seen.insert(destination, file) {
                return Err(SyncError::DestinationCollision {
                    first: first.to_string(),
                    second: file.clone(),
                    destination: destination.to_string(),
                });
            }
            resolved.push(destination.to_string());
        }

        Ok(resolved)
    }
}

/// True for non-empty relative paths that stay below their root.
pub fn is_safe_relative(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Reads the persisted rename cache
#[derive(Debug, Clone)]
pub struct RenameStore {
    path: PathBuf,
}

impl RenameStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The whole cache. Absent or unreadable documents read as empty.
    pub async fn load(&self) -> HashMap<String, String> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                warn!("Cannot read rename cache {}: {}", self.path.display(), e);
                return HashMap::new();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Ignoring malformed rename cache {}: {}", self.path.display(), e);
            HashMap::new()
        })
    }

    /// Entries belonging to `device_id`, keyed by original relative path.
    pub async fn overlay_for(&self, device_id: &str) -> RenameOverlay {
        let prefix = format!("{device_id}:");
        let entries = self
            .load()
            .await
            .into_iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(&prefix)
                    .map(|original| (original.to_string(), value))
            })
            .collect();
        RenameOverlay::new(entries)
    }
}
