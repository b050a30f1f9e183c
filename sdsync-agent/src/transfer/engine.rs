//! Sequential file transfer engine.
//!
//! Copies one file at a time from a source root to a target root, emitting
//! [`SyncProgressEvent`]s over a bounded channel. The bounded channel makes
//! event production lazy: the engine cannot run ahead of its consumer by
//! more than the channel capacity.
//!
//! Cancellation is observed before each file, at every chunk boundary and
//! while waiting on reads or writes. A cancelled file's partial destination is
//! removed and no further events are emitted.

use crate::config::SyncConfig;
use crate::fs::metadata::FileStamp;
use crate::store::RenameOverlay;
use crate::transfer::progress::{
    format_bytes, format_duration, percentage, ProgressSampler, SyncProgressEvent,
};
use crate::utils::errors::is_out_of_space;
use crate::utils::{Result, SyncError};
use bytes::BytesMut;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Tunables for a transfer run
#[derive(Debug, Clone)]
pub struct TransferSettings {
    /// Bytes moved per read/write round trip
    pub chunk_size: usize,

    /// Minimum spacing of `progress` events
    pub progress_interval: Duration,

    /// Longest a single write may block before the job is failed
    pub drain_timeout: Duration,

    /// Event channel capacity
    pub event_buffer: usize,

    /// Per-file bandwidth cap in bytes per second
    pub max_bytes_per_sec: Option<u64>,
}

impl From<&SyncConfig> for TransferSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            progress_interval: config.progress_interval(),
            drain_timeout: config.drain_timeout(),
            event_buffer: config.event_buffer,
            max_bytes_per_sec: config.rate_limit(),
        }
    }
}

/// What to transfer
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub source_root: PathBuf,
    pub target_root: PathBuf,
    /// Relative paths, transferred in this order
    pub files: Vec<String>,
    pub overlay: RenameOverlay,
}

/// How a run ended when no fatal error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Every file was attempted and `complete` was emitted
    Completed { transferred: usize, failed: usize },
    /// The run stopped early on request; no `complete` was emitted
    Cancelled,
}

/// A spawned run: drain `events`, then await `handle` for the outcome.
pub struct TransferRun {
    pub events: mpsc::Receiver<SyncProgressEvent>,
    pub handle: JoinHandle<Result<TransferOutcome>>,
}

enum FileOutcome {
    Done { bytes: u64 },
    Cancelled,
}

/// Position of a file within the run, 1-based for display
#[derive(Clone, Copy)]
struct Position {
    index: usize,
    total: usize,
}

/// Where copied bytes are written.
pub trait Destination: Send + Sync + 'static {
    type Writer: AsyncWrite + Send + Unpin;

    /// Create or truncate the file at `path`.
    fn create(&self, path: &Path) -> impl Future<Output = std::io::Result<Self::Writer>> + Send;
}

/// Files on a local or mounted filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDisk;

impl Destination for LocalDisk {
    type Writer = File;

    async fn create(&self, path: &Path) -> std::io::Result<File> {
        File::create(path).await
    }
}

pub struct TransferEngine<D = LocalDisk> {
    settings: TransferSettings,
    destination: Arc<D>,
}

impl<D> Clone for TransferEngine<D> {
    fn clone(&self) -> Self {
        Self {
            settings: self.settings.clone(),
            destination: Arc::clone(&self.destination),
        }
    }
}

impl TransferEngine {
    pub fn new(settings: TransferSettings) -> Self {
        Self::with_destination(settings, LocalDisk)
    }
}

impl<D: Destination> TransferEngine<D> {
    pub fn with_destination(settings: TransferSettings, destination: D) -> Self {
        Self {
            settings,
            destination: Arc::new(destination),
        }
    }

    /// Start `request` on a background task.
    pub fn spawn(&self, request: TransferRequest, cancel: CancellationToken) -> TransferRun {
        let (tx, rx) = mpsc::channel(self.settings.event_buffer.max(1));
        let engine = self.clone();
        let handle = tokio::spawn(async move { engine.run(&request, &cancel, &tx).await });
        TransferRun { events: rx, handle }
    }

    /// Transfer every file in `request`, in order.
    ///
    /// Per-file I/O failures become `error` events and the run continues.
    /// Fatal failures (source root gone, destination full, drain timeout)
    /// are returned as `Err` without a `complete` event.
    pub async fn run(
        &self,
        request: &TransferRequest,
        cancel: &CancellationToken,
        events: &mpsc::Sender<SyncProgressEvent>,
    ) -> Result<TransferOutcome> {
        let started = Instant::now();
        let total = request.files.len();
        let mut transferred = 0usize;
        let mut failed = 0usize;
        let mut bytes = 0u64;

        info!(
            "Starting transfer of {} files: {} -> {}",
            total,
            request.source_root.display(),
            request.target_root.display()
        );

        for (i, file) in request.files.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Transfer cancelled before {}", file);
                return Ok(TransferOutcome::Cancelled);
            }

            let position = Position { index: i + 1, total };
            let source_path = request.source_root.join(file);
            let destination_path = request
                .target_root
                .join(request.overlay.destination_for(file));

            let result = self
                .transfer_file(file, &source_path, &destination_path, position, cancel, events)
                .await;

            let event = match result {
                Ok(FileOutcome::Done { bytes: n }) => {
                    transferred += 1;
                    bytes += n;
                    SyncProgressEvent::FileComplete {
                        file: file.clone(),
                        current_file_index: position.index,
                        total_files: total,
                    }
                }
                Ok(FileOutcome::Cancelled) => {
                    info!("Transfer cancelled during {}", file);
                    return Ok(TransferOutcome::Cancelled);
                }
                Err(err) => {
                    let err = escalate(err, &request.source_root).await;
                    if err.is_fatal() {
                        error!("Aborting transfer at {}: {}", file, err);
                        return Err(err);
                    }
                    warn!("Failed to transfer {}: {}", file, err);
                    failed += 1;
                    SyncProgressEvent::Error {
                        file: file.clone(),
                        error: err.to_string(),
                    }
                }
            };

            if events.send(event).await.is_err() {
                debug!("Event consumer went away, stopping transfer");
                return Ok(TransferOutcome::Cancelled);
            }
        }

        if cancel.is_cancelled() {
            return Ok(TransferOutcome::Cancelled);
        }

        info!(
            "Transfer finished: {} ok, {} failed, {} in {}",
            transferred,
            failed,
            format_bytes(bytes),
            format_duration(started.elapsed().as_secs())
        );

        // A closed channel here only means nobody is listening for the summary
        let _ = events.send(SyncProgressEvent::Complete).await;
        Ok(TransferOutcome::Completed { transferred, failed })
    }

    async fn transfer_file(
        &self,
        file: &str,
        source_path: &Path,
        destination_path: &Path,
        position: Position,
        cancel: &CancellationToken,
        events: &mpsc::Sender<SyncProgressEvent>,
    ) -> Result<FileOutcome> {
        let stamp = FileStamp::capture(source_path).await?;

        let start = SyncProgressEvent::FileStart {
            file: file.to_string(),
            current_file_index: position.index,
            total_files: position.total,
            total: stamp.size,
        };
        if events.send(start).await.is_err() {
            return Ok(FileOutcome::Cancelled);
        }

        info!(
            "[{}/{}] {} ({}) -> {}",
            position.index,
            position.total,
            file,
            format_bytes(stamp.size),
            destination_path.display()
        );

        if let Some(parent) = destination_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| write_error(e, destination_path))?;
        }

        let result = self
            .pump(file, source_path, destination_path, &stamp, position, cancel, events)
            .await;

        match result {
            Ok(FileOutcome::Done { bytes }) => Ok(FileOutcome::Done { bytes }),
            other => {
                remove_partial(destination_path).await;
                other
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn pump(
        &self,
        file: &str,
        source_path: &Path,
        destination_path: &Path,
        stamp: &FileStamp,
        position: Position,
        cancel: &CancellationToken,
        events: &mpsc::Sender<SyncProgressEvent>,
    ) -> Result<FileOutcome> {
        let mut reader = File::open(source_path).await?;
        let mut writer = self
            .destination
            .create(destination_path)
            .await
            .map_err(|e| write_error(e, destination_path))?;

        let mut buf = BytesMut::with_capacity(self.settings.chunk_size);
        let mut sampler = ProgressSampler::new(self.settings.progress_interval);
        let mut transferred = 0u64;
        let file_started = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return Ok(FileOutcome::Cancelled);
            }

            buf.clear();
            let n = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(FileOutcome::Cancelled),
                read = reader.read_buf(&mut buf) => read?,
            };
            if n == 0 {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(FileOutcome::Cancelled),
                written = tokio::time::timeout(self.settings.drain_timeout, writer.write_all(&buf)) => {
                    self.check_drain(written, destination_path)?;
                }
            }

            transferred += n as u64;

            if let Some(delay) = self.pace(transferred, file_started.elapsed()) {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(FileOutcome::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            if let Some(sample) = sampler.sample(transferred) {
                let progress = SyncProgressEvent::Progress {
                    file: file.to_string(),
                    transferred,
                    total: stamp.size,
                    percentage: percentage(transferred, stamp.size),
                    speed_mbps: sample.speed_mbps,
                    current_file_index: position.index,
                    total_files: position.total,
                };
                if events.send(progress).await.is_err() {
                    return Ok(FileOutcome::Cancelled);
                }
            }
        }

        let flushed = tokio::time::timeout(self.settings.drain_timeout, writer.flush()).await;
        self.check_drain(flushed, destination_path)?;
        drop(writer);

        stamp.apply_to_path(destination_path)?;

        Ok(FileOutcome::Done { bytes: transferred })
    }

    /// How long to pause so that `transferred` bytes after `elapsed` stays under the rate cap.
    fn pace(&self, transferred: u64, elapsed: Duration) -> Option<Duration> {
        let rate = self.settings.max_bytes_per_sec.filter(|r| *r > 0)?;
        let due = Duration::from_secs_f64(transferred as f64 / rate as f64);
        due.checked_sub(elapsed).filter(|d| !d.is_zero())
    }

    fn check_drain(
        &self,
        result: std::result::Result<std::io::Result<()>, tokio::time::error::Elapsed>,
        destination_path: &Path,
    ) -> Result<()> {
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(write_error(e, destination_path)),
            Err(_) => Err(SyncError::DrainTimeout {
                path: destination_path.to_path_buf(),
                secs: self.settings.drain_timeout.as_secs(),
            }),
        }
    }
}

fn write_error(err: std::io::Error, destination_path: &Path) -> SyncError {
    if is_out_of_space(&err) {
        SyncError::DiskFull {
            path: destination_path.to_path_buf(),
        }
    } else {
        SyncError::Io(err)
    }
}

/// A per-file failure becomes fatal when the source root itself has vanished.
async fn escalate(err: SyncError, source_root: &Path) -> SyncError {
    if err.is_fatal() {
        return err;
    }
    match tokio::fs::metadata(source_root).await {
        Ok(_) => err,
        Err(_) => SyncError::SourceUnavailable {
            root: source_root.to_path_buf(),
        },
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to clean up partial file {}: {}", path.display(), e),
    }
}
