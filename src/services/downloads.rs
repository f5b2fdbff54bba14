//! Download tracking orchestration
//!
//! Owns the record store, the remote client, and the finalize queue; request
//! handlers call into this service and nothing else. All collaborators are
//! injected at construction, there are no ambient globals.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use super::finalizer::{
    FinalizeJob, FinalizeQueue, FinalizeQueueError, FinalizeStatus, LibraryRoots, MediaType,
    UnknownMediaType,
};
use super::magnet::magnet_identifier;
use super::reconciler::{ReconciledDownload, reconcile};
use super::transmission::DownloadClient;
use crate::db::{Database, DownloadRecord, NewDownload};

/// Errors surfaced to the request layer
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("no tracked download with identifier {0}")]
    NotTracked(String),

    #[error("a download with identifier {0} is already tracked")]
    AlreadyTracked(String),

    #[error(transparent)]
    InvalidMediaType(#[from] UnknownMediaType),

    #[error("no remote task matches identifier {0}, completion aborted")]
    TaskNotFound(String),

    #[error("finalize queue is full, retry later")]
    QueueFull,

    #[error("finalize worker is not running")]
    WorkerStopped,

    #[error("remote download service error: {0}")]
    Remote(#[source] anyhow::Error),

    #[error("database error: {0}")]
    Database(#[source] anyhow::Error),
}

/// The dashboard core: submit, list, complete
pub struct DownloadService {
    db: Database,
    client: Arc<dyn DownloadClient>,
    finalize: FinalizeQueue,
    roots: LibraryRoots,
}

impl DownloadService {
    pub fn new(
        db: Database,
        client: Arc<dyn DownloadClient>,
        finalize: FinalizeQueue,
        roots: LibraryRoots,
    ) -> Self {
        Self {
            db,
            client,
            finalize,
            roots,
        }
    }

    /// Track a new download and hand it to the remote client
    pub async fn submit(
        &self,
        media_type: &str,
        url: &str,
        target_location: &str,
    ) -> Result<DownloadRecord, DownloadError> {
        let media_type: MediaType = media_type.parse()?;
        let identifier = magnet_identifier(url);

        if self
            .db
            .downloads()
            .get_by_identifier(&identifier)
            .await
            .map_err(DownloadError::Database)?
            .is_some()
        {
            return Err(DownloadError::AlreadyTracked(identifier));
        }

        self.client
            .add_task(url)
            .await
            .map_err(DownloadError::Remote)?;

        let record = self
            .db
            .downloads()
            .insert(NewDownload {
                identifier,
                media_type: media_type.as_str().to_string(),
                source_url: url.to_string(),
                target_location: target_location.to_string(),
            })
            .await
            .map_err(DownloadError::Database)?;

        info!(
            identifier = %record.identifier,
            media_type = %record.media_type,
            target_location = %record.target_location,
            "Download tracked"
        );
        Ok(record)
    }

    /// Dashboard listing: every tracked record, with live task data attached
    /// where the identifiers line up. A client failure degrades to a listing
    /// without live status rather than an empty dashboard.
    pub async fn list_reconciled(&self) -> Result<Vec<ReconciledDownload>, DownloadError> {
        let records = self
            .db
            .downloads()
            .list_all()
            .await
            .map_err(DownloadError::Database)?;

        let tasks = match self.client.list_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(error = %e, "Remote download service unreachable, listing without live status");
                Vec::new()
            }
        };

        Ok(reconcile(records, tasks))
    }

    /// Accept a completion action for a tracked download.
    ///
    /// Ordering is deliberate: the move job is enqueued with every path it
    /// needs captured by value, then the record is deleted and the remote
    /// task removed (keeping its data, the copy still reads it). The caller
    /// returns as soon as the job is queued; the copy runs in the background
    /// and its outcome lands in the finalize status map.
    pub async fn complete(&self, identifier: &str) -> Result<(), DownloadError> {
        let record = self
            .db
            .downloads()
            .get_by_identifier(identifier)
            .await
            .map_err(DownloadError::Database)?
            .ok_or_else(|| DownloadError::NotTracked(identifier.to_string()))?;

        // A record with an unrecognized category must abort before any move
        // is attempted.
        let media_type: MediaType = record.media_type.parse()?;

        let tasks = self
            .client
            .list_tasks()
            .await
            .map_err(DownloadError::Remote)?;
        let task = tasks
            .into_iter()
            .find(|task| magnet_identifier(&task.magnet_link) == record.identifier)
            .ok_or_else(|| DownloadError::TaskNotFound(identifier.to_string()))?;

        let source_path = PathBuf::from(&task.download_dir).join(&task.name);
        let destination_path = self
            .roots
            .root_for(media_type)
            .join(&record.target_location);

        self.finalize
            .enqueue(FinalizeJob {
                identifier: record.identifier.clone(),
                source_path,
                destination_path,
            })
            .map_err(|e| match e {
                FinalizeQueueError::Full => DownloadError::QueueFull,
                FinalizeQueueError::Closed => DownloadError::WorkerStopped,
            })?;

        self.db
            .downloads()
            .delete_by_identifier(&record.identifier)
            .await
            .map_err(DownloadError::Database)?;

        self.client
            .remove_task(task.id, false)
            .await
            .map_err(DownloadError::Remote)?;

        info!(identifier = %record.identifier, "Completion accepted, move queued");
        Ok(())
    }

    /// Snapshot of finalize job outcomes
    pub fn finalize_statuses(&self) -> HashMap<String, FinalizeStatus> {
        self.finalize.statuses()
    }
}
