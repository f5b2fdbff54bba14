//! Finished-download finalization
//!
//! A completion action resolves its (source, destination) pair up front and
//! hands it to a bounded background worker that runs the copy, so the request
//! path never waits on rsync. Job outcomes land in a status map instead of
//! disappearing with a detached thread; a failed copy is still terminal (no
//! retry, no compensation) but it is at least observable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::process::Command;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tracing::{error, info};

/// Media category of a tracked download; decides the library root the
/// finished files land under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Series,
    Movie,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Series => "series",
            Self::Movie => "movie",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown media type '{0}', expected 'series' or 'movie'")]
pub struct UnknownMediaType(pub String);

impl FromStr for MediaType {
    type Err = UnknownMediaType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "series" => Ok(Self::Series),
            "movie" => Ok(Self::Movie),
            other => Err(UnknownMediaType(other.to_string())),
        }
    }
}

/// Destination roots for the two media categories
#[derive(Debug, Clone)]
pub struct LibraryRoots {
    pub series: PathBuf,
    pub movies: PathBuf,
}

impl LibraryRoots {
    pub fn root_for(&self, media_type: MediaType) -> &Path {
        match media_type {
            MediaType::Series => &self.series,
            MediaType::Movie => &self.movies,
        }
    }
}

/// Executes the actual file transfer. Production uses rsync; tests inject
/// slow or failing fakes.
#[async_trait]
pub trait FileMover: Send + Sync {
    async fn copy(&self, source: &Path, destination: &Path) -> Result<()>;
}

/// Archive-mode rsync invocation. `-a` preserves structure, permissions and
/// timestamps, and is safe to re-run on a partially copied tree.
pub struct RsyncMover {
    rsync_path: String,
}

impl RsyncMover {
    pub fn new() -> Self {
        Self {
            rsync_path: "rsync".to_string(),
        }
    }

    /// Create with a custom rsync path
    pub fn with_rsync_path(rsync_path: impl Into<String>) -> Self {
        Self {
            rsync_path: rsync_path.into(),
        }
    }
}

impl Default for RsyncMover {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileMover for RsyncMover {
    async fn copy(&self, source: &Path, destination: &Path) -> Result<()> {
        let output = Command::new(&self.rsync_path)
            .arg("-a")
            .arg(source)
            .arg(destination)
            .output()
            .await
            .with_context(|| format!("Failed to execute {}", self.rsync_path))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            anyhow::bail!(
                "rsync '{}' -> '{}' failed (exit code {}): {}",
                source.display(),
                destination.display(),
                exit_code,
                if stderr.is_empty() {
                    "no error output"
                } else {
                    stderr.trim()
                }
            );
        }

        Ok(())
    }
}

/// A fully resolved move. Everything the worker needs is captured by value
/// before the record and the remote task are deleted.
#[derive(Debug, Clone)]
pub struct FinalizeJob {
    pub identifier: String,
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
}

/// Lifecycle of a finalize job, observable after the record is gone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FinalizeStatus {
    Queued,
    Running,
    Succeeded,
    Failed { error: String },
}

/// Worker sizing
#[derive(Debug, Clone)]
pub struct FinalizeWorkerConfig {
    /// Pending jobs the queue holds before submissions are refused
    pub queue_capacity: usize,
    /// Concurrent copies; each operates on its own path pair
    pub max_concurrent: usize,
}

impl Default for FinalizeWorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            max_concurrent: 2,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FinalizeQueueError {
    #[error("finalize queue is full")]
    Full,
    #[error("finalize worker is not running")]
    Closed,
}

type StatusMap = Arc<RwLock<HashMap<String, FinalizeStatus>>>;

/// Submission half of the finalize worker, handed to the download service
#[derive(Clone)]
pub struct FinalizeQueue {
    sender: mpsc::Sender<FinalizeJob>,
    statuses: StatusMap,
}

impl FinalizeQueue {
    /// Enqueue a job without blocking the request path
    pub fn enqueue(&self, job: FinalizeJob) -> Result<(), FinalizeQueueError> {
        let identifier = job.identifier.clone();
        self.statuses
            .write()
            .insert(identifier.clone(), FinalizeStatus::Queued);

        match self.sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.statuses.write().remove(&identifier);
                Err(FinalizeQueueError::Full)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.statuses.write().remove(&identifier);
                Err(FinalizeQueueError::Closed)
            }
        }
    }

    /// Snapshot of all job statuses
    pub fn statuses(&self) -> HashMap<String, FinalizeStatus> {
        self.statuses.read().clone()
    }

    pub fn status_of(&self, identifier: &str) -> Option<FinalizeStatus> {
        self.statuses.read().get(identifier).cloned()
    }
}

/// Handle for controlling the finalize worker
pub struct FinalizeWorkerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl FinalizeWorkerHandle {
    /// Stop the worker and wait for the loop to exit. Copies already running
    /// keep going on their own tasks.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for FinalizeWorkerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Spawn the finalize worker. Returns the queue handle for submitters and a
/// shutdown handle tied to the process lifecycle.
pub fn start_finalize_worker(
    config: FinalizeWorkerConfig,
    mover: Arc<dyn FileMover>,
) -> (FinalizeQueue, FinalizeWorkerHandle) {
    let (sender, mut receiver) = mpsc::channel::<FinalizeJob>(config.queue_capacity);
    let statuses: StatusMap = Arc::new(RwLock::new(HashMap::new()));
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

    let worker_statuses = statuses.clone();
    let task = tokio::spawn(async move {
        info!("Finalize worker started");

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Finalize worker shutting down");
                    break;
                }

                job = receiver.recv() => {
                    let Some(job) = job else {
                        info!("Finalize queue closed, stopping worker");
                        break;
                    };

                    let permit = semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .expect("Semaphore closed");
                    let mover = mover.clone();
                    let statuses = worker_statuses.clone();

                    tokio::spawn(async move {
                        let _permit = permit;
                        run_job(mover, statuses, job).await;
                    });
                }
            }
        }
    });

    (
        FinalizeQueue { sender, statuses },
        FinalizeWorkerHandle {
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        },
    )
}

async fn run_job(mover: Arc<dyn FileMover>, statuses: StatusMap, job: FinalizeJob) {
    statuses
        .write()
        .insert(job.identifier.clone(), FinalizeStatus::Running);

    info!(
        identifier = %job.identifier,
        source = %job.source_path.display(),
        destination = %job.destination_path.display(),
        "Moving finished download"
    );

    match mover.copy(&job.source_path, &job.destination_path).await {
        Ok(()) => {
            info!(identifier = %job.identifier, "Finished download moved");
            statuses
                .write()
                .insert(job.identifier, FinalizeStatus::Succeeded);
        }
        Err(e) => {
            error!(identifier = %job.identifier, error = %e, "Failed to move finished download");
            statuses.write().insert(
                job.identifier,
                FinalizeStatus::Failed {
                    error: e.to_string(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Duration;

    struct OkMover;

    #[async_trait]
    impl FileMover for OkMover {
        async fn copy(&self, _source: &Path, _destination: &Path) -> Result<()> {
            Ok(())
        }
    }

    struct FailingMover;

    #[async_trait]
    impl FileMover for FailingMover {
        async fn copy(&self, _source: &Path, _destination: &Path) -> Result<()> {
            anyhow::bail!("disk on fire")
        }
    }

    fn job(identifier: &str) -> FinalizeJob {
        FinalizeJob {
            identifier: identifier.to_string(),
            source_path: PathBuf::from("/staging/done"),
            destination_path: PathBuf::from("/library/series/ShowX/S01"),
        }
    }

    async fn wait_for<F>(queue: &FinalizeQueue, identifier: &str, predicate: F)
    where
        F: Fn(&FinalizeStatus) -> bool,
    {
        for _ in 0..200 {
            if let Some(status) = queue.status_of(identifier)
                && predicate(&status)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for finalize status of {identifier}");
    }

    #[test]
    fn test_media_type_parsing() {
        assert_eq!("series".parse::<MediaType>().unwrap(), MediaType::Series);
        assert_eq!("movie".parse::<MediaType>().unwrap(), MediaType::Movie);
        assert!("music".parse::<MediaType>().is_err());
        assert!("Series".parse::<MediaType>().is_err());
    }

    #[test]
    fn test_library_roots() {
        let roots = LibraryRoots {
            series: PathBuf::from("/library/series"),
            movies: PathBuf::from("/library/movies"),
        };
        assert_eq!(
            roots.root_for(MediaType::Series),
            Path::new("/library/series")
        );
        assert_eq!(
            roots.root_for(MediaType::Movie),
            Path::new("/library/movies")
        );
    }

    #[tokio::test]
    async fn test_rsync_nonzero_exit_is_an_error() {
        // `false` takes the same argv shape and always exits 1.
        let mover = RsyncMover::with_rsync_path("false");
        let result = mover
            .copy(Path::new("/staging/x"), Path::new("/library/x"))
            .await;
        let err = result.unwrap_err().to_string();
        assert!(err.contains("exit code 1"), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_rsync_zero_exit_is_ok() {
        let mover = RsyncMover::with_rsync_path("true");
        assert!(
            mover
                .copy(Path::new("/staging/x"), Path::new("/library/x"))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_worker_reports_success() {
        let (queue, handle) =
            start_finalize_worker(FinalizeWorkerConfig::default(), Arc::new(OkMover));

        queue.enqueue(job("id-ok")).unwrap();
        wait_for(&queue, "id-ok", |s| *s == FinalizeStatus::Succeeded).await;

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_worker_records_failure_and_keeps_running() {
        let (queue, handle) =
            start_finalize_worker(FinalizeWorkerConfig::default(), Arc::new(FailingMover));

        queue.enqueue(job("id-bad")).unwrap();
        wait_for(&queue, "id-bad", |s| {
            matches!(s, FinalizeStatus::Failed { error } if error.contains("disk on fire"))
        })
        .await;

        // A failed job must not take the worker down.
        queue.enqueue(job("id-bad-2")).unwrap();
        wait_for(&queue, "id-bad-2", |s| {
            matches!(s, FinalizeStatus::Failed { .. })
        })
        .await;

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_full_queue_refuses_without_leaking_status() {
        // No worker draining this channel, so the second enqueue must fail.
        let (sender, _receiver) = mpsc::channel::<FinalizeJob>(1);
        let queue = FinalizeQueue {
            sender,
            statuses: Arc::new(RwLock::new(HashMap::new())),
        };

        queue.enqueue(job("id-1")).unwrap();
        assert_matches!(queue.enqueue(job("id-2")), Err(FinalizeQueueError::Full));

        assert_eq!(queue.status_of("id-1"), Some(FinalizeStatus::Queued));
        assert_eq!(queue.status_of("id-2"), None);
    }

    #[tokio::test]
    async fn test_closed_queue_reports_worker_gone() {
        let (sender, receiver) = mpsc::channel::<FinalizeJob>(1);
        drop(receiver);
        let queue = FinalizeQueue {
            sender,
            statuses: Arc::new(RwLock::new(HashMap::new())),
        };

        assert_matches!(queue.enqueue(job("id-1")), Err(FinalizeQueueError::Closed));
        assert_eq!(queue.status_of("id-1"), None);
    }
}
