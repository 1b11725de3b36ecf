use thiserror::Error;

use super::SyncReport;
use crate::catalog::CatalogFetchError;
use crate::icloud::ICloudError;

/// Failures that stop a sync run. None of them are retried within the run.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Catalog(#[from] CatalogFetchError),

    #[error("Failed to download {id}: {source}")]
    Fetch { id: String, source: ICloudError },

    #[error("Download of {path} truncated: expected {expected} bytes, received {received}")]
    Truncated {
        path: String,
        expected: u64,
        received: u64,
    },

    #[error("Disk error at {path}: {source}")]
    Disk {
        path: String,
        source: std::io::Error,
    },
}

impl DownloadError {
    pub(crate) fn disk(path: &std::path::Path, source: std::io::Error) -> Self {
        DownloadError::Disk {
            path: path.display().to_string(),
            source,
        }
    }
}

/// A run that stopped on an error, with the counts reached before it.
#[derive(Debug, Error)]
#[error("Sync aborted after {} downloads: {source}", .report.downloaded)]
pub struct SyncAborted {
    pub report: SyncReport,
    pub source: DownloadError,
}
