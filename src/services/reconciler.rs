//! Display-side join between tracked downloads and the remote task list

use std::collections::HashMap;

use serde::Serialize;

use super::magnet::magnet_identifier;
use super::transmission::RemoteTask;
use crate::db::DownloadRecord;

/// A tracked download together with its live remote task, when one matches
#[derive(Debug, Clone, Serialize)]
pub struct ReconciledDownload {
    #[serde(flatten)]
    pub record: DownloadRecord,
    pub remote: Option<RemoteTask>,
}

/// Join records to remote tasks by derived identifier.
///
/// Tasks are keyed by the identifier of their magnet link; two tasks that
/// collide keep the later one. Records with no live task are returned with
/// `remote: None` so the dashboard still lists them, minus live status.
pub fn reconcile(records: Vec<DownloadRecord>, tasks: Vec<RemoteTask>) -> Vec<ReconciledDownload> {
    let mut by_identifier: HashMap<String, RemoteTask> = HashMap::with_capacity(tasks.len());
    for task in tasks {
        by_identifier.insert(magnet_identifier(&task.magnet_link), task);
    }

    records
        .into_iter()
        .map(|record| {
            let remote = by_identifier.get(&record.identifier).cloned();
            ReconciledDownload { record, remote }
        })
        .collect()
}
