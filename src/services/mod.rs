//! Domain services: identifier derivation, the remote client seam,
//! reconciliation, and finished-download finalization

pub mod downloads;
pub mod finalizer;
pub mod magnet;
pub mod reconciler;
pub mod transmission;

pub use downloads::{DownloadError, DownloadService};
pub use finalizer::{
    FinalizeStatus, FinalizeWorkerConfig, LibraryRoots, RsyncMover, start_finalize_worker,
};
pub use reconciler::ReconciledDownload;
pub use transmission::TransmissionClient;
