//! Process-wide owner of the (at most one) active sync job.
//!
//! The job slot is a mutex-guarded `Option`, so "one job at a time" is a
//! property of ownership rather than a convention callers must follow. The
//! job itself is only written by its driver task; status queries take a
//! snapshot under a read lock.

use super::{Job, JobStatus, StatusSnapshot};
use crate::config::SyncConfig;
use crate::store::RenameOverlay;
use crate::transfer::engine::{
    TransferEngine, TransferOutcome, TransferRequest, TransferRun, TransferSettings,
};
use crate::utils::{Result, SyncError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Everything needed to start a job for one device
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub device_id: String,
    pub source_root: PathBuf,
    pub target_root: PathBuf,
    pub files: Vec<String>,
    pub overlay: RenameOverlay,
}

struct ActiveJob {
    id: String,
    device_id: String,
    state: Arc<RwLock<Job>>,
    cancel: CancellationToken,
    /// Flips to `true` once the driver has recorded the run's outcome
    done: watch::Receiver<bool>,
}

pub struct JobManager {
    engine: TransferEngine,
    stop_grace: Duration,
    active: Mutex<Option<ActiveJob>>,
}

impl JobManager {
    pub fn new(engine: TransferEngine, stop_grace: Duration) -> Self {
        Self {
            engine,
            stop_grace,
            active: Mutex::new(None),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            TransferEngine::new(TransferSettings::from(config)),
            config.stop_grace(),
        )
    }

    /// Start a job and return its id without waiting for the transfer.
    ///
    /// Returns the running job's id if the same device is already syncing,
    /// and [`SyncError::JobConflict`] if a different device is.
    pub async fn start(&self, request: StartRequest) -> Result<String> {
        request.overlay.destinations(&request.files)?;

        let mut slot = self.active.lock().await;

        if let Some(active) = slot.as_ref() {
            let status = active.state.read().await.status;
            if status == JobStatus::Syncing {
                if active.device_id == request.device_id {
                    info!("Device {} already syncing as job {}", active.device_id, active.id);
                    return Ok(active.id.clone());
                }
                return Err(SyncError::JobConflict {
                    device: active.device_id.clone(),
                });
            }
        }

        let id = Uuid::new_v4().to_string();
        let state = Arc::new(RwLock::new(Job::new(
            id.clone(),
            request.device_id.clone(),
            request.files.clone(),
        )));
        let cancel = CancellationToken::new();

        let run = self.engine.spawn(
            TransferRequest {
                source_root: request.source_root,
                target_root: request.target_root,
                files: request.files,
                overlay: request.overlay,
            },
            cancel.clone(),
        );
        let (done_tx, done) = watch::channel(false);
        tokio::spawn(drive(Arc::clone(&state), run, done_tx));

        info!("Started job {} for device {}", id, request.device_id);

        *slot = Some(ActiveJob {
            id: id.clone(),
            device_id: request.device_id,
            state,
            cancel,
            done,
        });

        Ok(id)
    }

    /// Snapshot of the current job, if any.
    pub async fn status(&self) -> StatusSnapshot {
        let state = match self.active.lock().await.as_ref() {
            Some(active) => Arc::clone(&active.state),
            None => return StatusSnapshot::idle(),
        };
        let job = state.read().await.clone();
        StatusSnapshot {
            status: job.status,
            job: Some(job),
        }
    }

    /// Whether a job is currently transferring.
    pub async fn is_syncing(&self) -> bool {
        self.status().await.status == JobStatus::Syncing
    }

    /// Cancel the current job, wait up to the grace period for it to unwind,
    /// then discard it. Returns false when there was nothing to stop.
    ///
    /// Concurrent callers all wait on the same run, so none of them returns
    /// while the engine is still cleaning up inside the grace period.
    pub async fn stop(&self) -> bool {
        let (id, cancel, mut done) = {
            let slot = self.active.lock().await;
            match slot.as_ref() {
                Some(active) => (active.id.clone(), active.cancel.clone(), active.done.clone()),
                None => return false,
            }
        };

        info!("Stopping job {}", id);
        cancel.cancel();

        let finished = tokio::time::timeout(self.stop_grace, done.wait_for(|ready| *ready))
            .await
            .map(|waited| waited.is_ok());
        match finished {
            Ok(true) => info!("Job {} stopped", id),
            Ok(false) => error!("Job {} driver exited without recording an outcome", id),
            Err(_) => warn!(
                "Job {} did not unwind within {:?}, discarding it anyway",
                id, self.stop_grace
            ),
        }

        let mut slot = self.active.lock().await;
        if slot.as_ref().is_some_and(|active| active.id == id) {
            *slot = None;
        }
        true
    }
}

/// Drain engine events into the job, record how the run ended, then signal `done`.
async fn drive(state: Arc<RwLock<Job>>, run: TransferRun, done: watch::Sender<bool>) {
    record_outcome(&state, run).await;
    done.send_replace(true);
}

async fn record_outcome(state: &RwLock<Job>, run: TransferRun) {
    let TransferRun { mut events, handle } = run;

    while let Some(event) = events.recv().await {
        state.write().await.record(event);
    }

    let outcome = handle.await;
    let mut job = state.write().await;
    match outcome {
        Ok(Ok(TransferOutcome::Completed { transferred, failed })) => {
            info!(
                "Job {} completed: {} transferred, {} failed",
                job.id, transferred, failed
            );
            job.status = JobStatus::Completed;
        }
        Ok(Ok(TransferOutcome::Cancelled)) => {
            info!("Job {} cancelled", job.id);
            job.status = JobStatus::Idle;
        }
        Ok(Err(e)) => {
            error!("Job {} failed: {}", job.id, e);
            job.status = JobStatus::Error;
            job.error_message = Some(e.to_string());
        }
        Err(e) => {
            error!("Job {} transfer task failed: {}", job.id, e);
            job.status = JobStatus::Error;
            job.error_message = Some(format!("Transfer task failed: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::inventory::{diff, scan, IgnoreSet, ScanOptions};
    use crate::transfer::progress::SyncProgressEvent;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn manager(rate: Option<u64>) -> JobManager {
        JobManager::new(
            TransferEngine::new(TransferSettings {
                chunk_size: 64 * 1024,
                progress_interval: Duration::from_millis(50),
                drain_timeout: Duration::from_secs(30),
                event_buffer: 8,
                max_bytes_per_sec: rate,
            }),
            Duration::from_secs(2),
        )
    }

    fn write(root: &Path, rel: &str, len: usize) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![1u8; len]).unwrap();
    }

    fn start_request(device: &str, source: &Path, target: &Path, files: &[&str]) -> StartRequest {
        StartRequest {
            device_id: device.to_string(),
            source_root: source.to_path_buf(),
            target_root: target.to_path_buf(),
            files: files.iter().map(|f| f.to_string()).collect(),
            overlay: RenameOverlay::default(),
        }
    }

    async fn wait_until_settled(manager: &JobManager) -> StatusSnapshot {
        for _ in 0..200 {
            let snapshot = manager.status().await;
            if snapshot.status != JobStatus::Syncing {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job did not settle");
    }

    #[tokio::test]
    async fn test_idle_without_job() {
        let manager = manager(None);
        let snapshot = manager.status().await;
        assert_eq!(snapshot.status, JobStatus::Idle);
        assert!(snapshot.job.is_none());
        assert!(!manager.stop().await);
    }

    #[tokio::test]
    async fn test_job_runs_to_completion_and_rescan_is_empty() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        write(source.path(), "a.jpg", 1000);
        write(source.path(), "b.raw", 2000);
        write(target.path(), "a.jpg", 1000);

        let ignore = IgnoreSet::default();
        let opts = ScanOptions::default();
        let missing = diff(
            &scan(source.path(), &ignore, &opts).unwrap(),
            &scan(target.path(), &ignore, &opts).unwrap(),
        );
        assert_eq!(missing.files, vec!["b.raw".to_string()]);
        assert_eq!(missing.total_bytes, 2000);

        let manager = manager(None);
        let files: Vec<&str> = missing.files.iter().map(String::as_str).collect();
        let id = manager
            .start(start_request("cam", source.path(), target.path(), &files))
            .await
            .unwrap();

        let snapshot = wait_until_settled(&manager).await;
        assert_eq!(snapshot.status, JobStatus::Completed);
        let job = snapshot.job.unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.current_progress, Some(SyncProgressEvent::Complete));
        assert_eq!(
            job.history,
            vec![SyncProgressEvent::FileComplete {
                file: "b.raw".into(),
                current_file_index: 1,
                total_files: 1,
            }]
        );

        let rescan = diff(
            &scan(source.path(), &ignore, &opts).unwrap(),
            &scan(target.path(), &ignore, &opts).unwrap(),
        );
        assert!(rescan.files.is_empty());
    }

    #[tokio::test]
    async fn test_single_flight_conflict_and_idempotent_start() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        write(source.path(), "slow.mp4", 2 * 1024 * 1024);

        let manager = manager(Some(128 * 1024));
        let id = manager
            .start(start_request("camA", source.path(), target.path(), &["slow.mp4"]))
            .await
            .unwrap();

        let again = manager
            .start(start_request("camA", source.path(), target.path(), &["slow.mp4"]))
            .await
            .unwrap();
        assert_eq!(again, id);

        let err = manager
            .start(start_request("camB", source.path(), target.path(), &["slow.mp4"]))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::JobConflict { ref device } if device == "camA"));

        let snapshot = manager.status().await;
        assert_eq!(snapshot.status, JobStatus::Syncing);
        let job = snapshot.job.unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.device_id, "camA");

        assert!(manager.stop().await);
    }

    #[tokio::test]
    async fn test_stop_cancels_and_cleans_up() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        write(source.path(), "1.jpg", 100);
        write(source.path(), "2.mp4", 4 * 1024 * 1024);
        write(source.path(), "3.jpg", 100);

        let manager = manager(Some(256 * 1024));
        manager
            .start(start_request(
                "cam",
                source.path(),
                target.path(),
                &["1.jpg", "2.mp4", "3.jpg"],
            ))
            .await
            .unwrap();

        // Wait until the large file is in flight
        for _ in 0..200 {
            let snapshot = manager.status().await;
            let in_flight = snapshot
                .job
                .and_then(|job| job.current_progress)
                .and_then(|event| event.file().map(str::to_string));
            if in_flight.as_deref() == Some("2.mp4") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(manager.stop().await);

        let snapshot = manager.status().await;
        assert_eq!(snapshot.status, JobStatus::Idle);
        assert!(snapshot.job.is_none());

        assert_eq!(fs::metadata(target.path().join("1.jpg")).unwrap().len(), 100);
        assert!(!target.path().join("2.mp4").exists());
        assert!(!target.path().join("3.jpg").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_stops_both_wait_for_cleanup() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        write(source.path(), "big.mp4", 4 * 1024 * 1024);

        let manager = Arc::new(manager(Some(256 * 1024)));
        manager
            .start(start_request("cam", source.path(), target.path(), &["big.mp4"]))
            .await
            .unwrap();

        for _ in 0..200 {
            let snapshot = manager.status().await;
            let in_flight = snapshot
                .job
                .and_then(|job| job.current_progress)
                .is_some_and(|event| matches!(event, SyncProgressEvent::Progress { .. }));
            if in_flight {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let other = Arc::clone(&manager);
        let first = tokio::spawn(async move { other.stop().await });
        let second = manager.stop().await;

        // Whichever call returns first, the partial copy is already gone
        assert!(!target.path().join("big.mp4").exists());
        let first = first.await.unwrap();
        assert!(!target.path().join("big.mp4").exists());
        assert!(first || second);

        let snapshot = manager.status().await;
        assert_eq!(snapshot.status, JobStatus::Idle);
        assert!(snapshot.job.is_none());
    }

    #[tokio::test]
    async fn test_stop_after_finish_clears_job() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        write(source.path(), "a.jpg", 10);

        let manager = manager(None);
        manager
            .start(start_request("cam", source.path(), target.path(), &["a.jpg"]))
            .await
            .unwrap();
        assert_eq!(wait_until_settled(&manager).await.status, JobStatus::Completed);

        let started = std::time::Instant::now();
        assert!(manager.stop().await);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(manager.status().await.job.is_none());
    }

    #[tokio::test]
    async fn test_fatal_error_sets_error_status() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        let gone = source.path().join("ejected");

        let manager = manager(None);
        manager
            .start(start_request("cam", &gone, target.path(), &["a.jpg"]))
            .await
            .unwrap();

        let snapshot = wait_until_settled(&manager).await;
        assert_eq!(snapshot.status, JobStatus::Error);
        let message = snapshot.job.unwrap().error_message.unwrap();
        assert!(message.contains("Device disconnected"));
        assert!(message.contains("ejected"));
    }

    #[tokio::test]
    async fn test_new_device_replaces_finished_job() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        write(source.path(), "a.jpg", 10);

        let manager = manager(None);
        let first = manager
            .start(start_request("camA", source.path(), target.path(), &["a.jpg"]))
            .await
            .unwrap();
        assert_eq!(wait_until_settled(&manager).await.status, JobStatus::Completed);

        let second = manager
            .start(start_request("camB", source.path(), target.path(), &["a.jpg"]))
            .await
            .unwrap();
        assert_ne!(first, second);

        let snapshot = wait_until_settled(&manager).await;
        assert_eq!(snapshot.job.unwrap().device_id, "camB");
    }

    #[tokio::test]
    async fn test_collision_rejected_before_state_changes() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();

        let manager = manager(None);
        let mut request = start_request("cam", source.path(), target.path(), &["a.mp4", "b.mp4"]);
        request.overlay = RenameOverlay::new(
            [("a.mp4".to_string(), "b.mp4".to_string())].into_iter().collect(),
        );

        let err = manager.start(request).await.unwrap_err();
        assert!(matches!(err, SyncError::DestinationCollision { .. }));
        assert_eq!(manager.status().await.status, JobStatus::Idle);
    }
}
