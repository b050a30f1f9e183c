//! Progress events and throughput sampling for file transfers.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Event emitted by the transfer engine
///
/// Per file attempt the order is `file-start`, any number of `progress`, then
/// exactly one of `file-complete` / `error` (or nothing if cancelled). A job
/// that ran to the end finishes with a single `complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncProgressEvent {
    #[serde(rename_all = "camelCase")]
    FileStart {
        file: String,
        current_file_index: usize,
        total_files: usize,
        total: u64,
    },

    #[serde(rename_all = "camelCase")]
    Progress {
        file: String,
        transferred: u64,
        total: u64,
        percentage: u8,
        #[serde(rename = "speedMBps")]
        speed_mbps: f64,
        current_file_index: usize,
        total_files: usize,
    },

    #[serde(rename_all = "camelCase")]
    FileComplete {
        file: String,
        current_file_index: usize,
        total_files: usize,
    },

    Error { file: String, error: String },

    Complete,
}

impl SyncProgressEvent {
    /// File this event refers to, if any.
    pub fn file(&self) -> Option<&str> {
        match self {
            SyncProgressEvent::FileStart { file, .. }
            | SyncProgressEvent::Progress { file, .. }
            | SyncProgressEvent::FileComplete { file, .. }
            | SyncProgressEvent::Error { file, .. } => Some(file),
            SyncProgressEvent::Complete => None,
        }
    }

    /// `file-complete` or `error`.
    pub fn is_file_terminal(&self) -> bool {
        matches!(
            self,
            SyncProgressEvent::FileComplete { .. } | SyncProgressEvent::Error { .. }
        )
    }
}

/// `floor(transferred / total * 100)`, with empty files counting as done.
pub fn percentage(transferred: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (transferred as u128 * 100) / total as u128;
    pct.min(100) as u8
}

/// Instantaneous throughput sampler for one file
pub struct ProgressSampler {
    interval: Duration,
    last_sample: Instant,
    last_bytes: u64,
}

/// A throughput reading taken by [`ProgressSampler`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub transferred: u64,
    pub speed_mbps: f64,
}

impl ProgressSampler {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    pub fn starting_at(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_sample: now,
            last_bytes: 0,
        }
    }

    /// Take a sample if the interval has elapsed since the previous one.
    pub fn sample(&mut self, transferred: u64) -> Option<Sample> {
        self.sample_at(transferred, Instant::now())
    }

    pub fn sample_at(&mut self, transferred: u64, now: Instant) -> Option<Sample> {
        let elapsed = now.duration_since(self.last_sample);
        if elapsed < self.interval {
            return None;
        }

        let delta = transferred.saturating_sub(self.last_bytes);
        let secs = elapsed.as_secs_f64();
        let speed_mbps = if secs > 0.0 {
            (delta as f64 / BYTES_PER_MB) / secs
        } else {
            0.0
        };

        self.last_sample = now;
        self.last_bytes = transferred;

        Some(Sample {
            transferred,
            speed_mbps,
        })
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
