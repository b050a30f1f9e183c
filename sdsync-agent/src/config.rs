//! Configuration management for the sync agent.
//!
//! Built-in defaults are layered under an optional TOML file, and
//! `SDSYNC__`-prefixed environment variables override both
//! (e.g. `SDSYNC__SERVER__PORT=8080`).

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Smallest accepted transfer chunk.
pub const MIN_CHUNK_SIZE: usize = 64 * 1024;
/// Largest accepted transfer chunk.
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub sync: SyncConfig,
    pub store: StoreConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address to bind
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Read/write buffer size in bytes (default: 16MB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Minimum interval between progress events
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// How long a single write may wait for the destination before the job fails
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,

    /// How long `stop` waits for the engine to unwind
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,

    /// Recursion cap for inventory scans
    #[serde(default = "default_max_scan_depth")]
    pub max_scan_depth: usize,

    /// Capacity of the engine -> job manager event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Per-file bandwidth cap in bytes per second (0 = unlimited)
    #[serde(default)]
    pub rate_limit_bytes_per_sec: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the JSON stores
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Device configuration file, relative to `data_dir`
    #[serde(default = "default_devices_file")]
    pub devices_file: PathBuf,

    /// Rename overlay file, relative to `data_dir`
    #[serde(default = "default_renames_file")]
    pub renames_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_port() -> u16 {
    9991
}

fn default_bind() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_chunk_size() -> usize {
    MAX_CHUNK_SIZE
}

fn default_progress_interval_ms() -> u64 {
    500
}

fn default_drain_timeout_secs() -> u64 {
    30
}

fn default_stop_grace_ms() -> u64 {
    2000
}

fn default_max_scan_depth() -> usize {
    crate::fs::inventory::DEFAULT_MAX_DEPTH
}

fn default_event_buffer() -> usize {
    64
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_devices_file() -> PathBuf {
    PathBuf::from("devices.json")
}

fn default_renames_file() -> PathBuf {
    PathBuf::from("rename_cache.json")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            progress_interval_ms: default_progress_interval_ms(),
            drain_timeout_secs: default_drain_timeout_secs(),
            stop_grace_ms: default_stop_grace_ms(),
            max_scan_depth: default_max_scan_depth(),
            event_buffer: default_event_buffer(),
            rate_limit_bytes_per_sec: 0,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            devices_file: default_devices_file(),
            renames_file: default_renames_file(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration: defaults, then `path` (if any), then `SDSYNC__*` env vars.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let base = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                Self::from_toml(&content)
                    .with_context(|| format!("Invalid config file {}", path.display()))?
            }
            None => Config::default(),
        };

        let config: Config = ::config::Config::builder()
            .add_source(::config::Config::try_from(&base)?)
            .add_source(::config::Environment::with_prefix("SDSYNC").separator("__"))
            .build()?
            .try_deserialize()?;

        Ok(config.normalized())
    }

    /// Parse a TOML document directly, without env overrides.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config.normalized())
    }

    fn normalized(mut self) -> Self {
        self.sync.chunk_size = self.sync.chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        self.sync.event_buffer = self.sync.event_buffer.max(1);
        self
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.bind, self.server.port)
    }

    pub fn devices_path(&self) -> PathBuf {
        self.store.data_dir.join(&self.store.devices_file)
    }

    pub fn renames_path(&self) -> PathBuf {
        self.store.data_dir.join(&self.store.renames_file)
    }
}

impl SyncConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn rate_limit(&self) -> Option<u64> {
        Some(self.rate_limit_bytes_per_sec).filter(|rate| *rate > 0)
    }
}
