//! Error types for tiered backend operations.

use std::io;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors that can occur while talking to a remote tier.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BackendError {
    /// The remote store could not be reached or refused the credentials.
    #[error("failed to connect to {storage} at '{endpoint}': {source:#}")]
    ConnectionError {
        storage: String,
        endpoint: String,
        source: anyhow::Error,
    },

    /// No factory is registered for the requested storage type.
    #[error("unknown storage type: {storage_type}")]
    UnknownBackendType { storage_type: String },

    /// A configuration value is missing or malformed.
    #[error("invalid configuration for key '{key}': {reason}")]
    InvalidConfiguration { key: String, reason: String },

    #[error("failed to upload {path} as {key}: {source:#}")]
    UploadError {
        key: String,
        path: String,
        source: anyhow::Error,
    },

    #[error("failed to download {key} to {path}: {source:#}")]
    DownloadError {
        key: String,
        path: String,
        source: anyhow::Error,
    },

    #[error("failed to delete {key}: {source:#}")]
    DeleteError { key: String, source: anyhow::Error },

    /// A range request failed or returned no data.
    #[error("failed to read {length} bytes of {key} at offset {offset}: {source:#}")]
    RangeReadError {
        key: String,
        offset: u64,
        length: u64,
        source: anyhow::Error,
    },

    /// The tier descriptor bound to a file handle carries no file entries.
    #[error("remote file info not found for {key}")]
    MissingMetadata { key: String },

    /// Remote objects are write-once; in-place mutation is rejected.
    #[error("{operation} is not implemented for remote storage files")]
    NotImplemented { operation: &'static str },

    /// The progress callback asked the transfer to stop.
    #[error("transfer aborted by progress callback: {source:#}")]
    ProgressAborted { source: anyhow::Error },
}

impl BackendError {
    /// Identifies failures caused by the transport that a caller may
    /// choose to retry. Nothing in this crate retries on its own.
    ///
    /// Transfers that failed on a missing or inaccessible local file are
    /// not retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::UploadError { source, .. } | Self::DownloadError { source, .. } => {
                !is_local_file_error(source)
            }
            Self::ConnectionError { .. } |
            Self::DeleteError { .. } |
            Self::RangeReadError { .. } => true,
            _ => false,
        }
    }

    /// Identifies failures that MUST NOT be retried.
    pub fn is_permanent(&self) -> bool {
        !self.is_retryable()
    }
}

fn is_local_file_error(source: &anyhow::Error) -> bool {
    source.chain().any(|cause| {
        cause.downcast_ref::<io::Error>().is_some_and(|e| {
            matches!(
                e.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            )
        })
    })
}
