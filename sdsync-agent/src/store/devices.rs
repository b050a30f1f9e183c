//! Device configuration store.

use crate::fs::inventory::IgnoreSet;
use crate::utils::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Where a device's files come from and go to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    #[serde(alias = "sourcePath")]
    pub source_root: PathBuf,

    #[serde(alias = "targetPath")]
    pub target_root: PathBuf,

    #[serde(default)]
    pub ignore_extensions: Vec<String>,
}

impl DeviceConfig {
    pub fn ignore_set(&self) -> IgnoreSet {
        IgnoreSet::new(&self.ignore_extensions)
    }
}

/// Reads `{deviceId: DeviceConfig}` from a JSON document
#[derive(Debug, Clone)]
pub struct DeviceStore {
    path: PathBuf,
}

impl DeviceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every configured device. An absent file is seeded with `{}`.
    pub async fn load(&self) -> Result<BTreeMap<String, DeviceConfig>> {
        if tokio::fs::metadata(&self.path).await.is_err() {
            if let Some(parent) = self.path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&self.path, b"{}\n").await?;
            info!("Created empty device store at {}", self.path.display());
            return Ok(BTreeMap::new());
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        serde_json::from_str(&content).map_err(|e| {
            SyncError::Store(format!("invalid device store {}: {}", self.path.display(), e))
        })
    }

    /// Look up one device by id.
    pub async fn get(&self, device_id: &str) -> Result<DeviceConfig> {
        self.load()
            .await?
            .remove(device_id)
            .ok_or_else(|| SyncError::DeviceNotFound(device_id.to_string()))
    }
}
