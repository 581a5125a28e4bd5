//! Progress reporting for uploads and downloads.

use std::sync::Arc;

/// Cumulative progress of a single transfer, computed per chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferProgress {
    /// Bytes moved so far.
    pub bytes_transferred: u64,

    /// `bytes_transferred * 100 / total`. Not clamped: a remote store that
    /// misreports the object size can push this past 100.
    pub percentage: f32,
}

impl TransferProgress {
    pub fn new(bytes_transferred: u64, total: u64) -> Self {
        Self {
            bytes_transferred,
            percentage: (bytes_transferred * 100) as f32 / total as f32,
        }
    }
}

/// Callback invoked after every transferred chunk.
///
/// Returning an error aborts the transfer; the error becomes the
/// transfer's result. This is the only way to cancel a transfer.
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, progress: TransferProgress) -> anyhow::Result<()>;
}

impl<F> ProgressCallback for F
where
    F: Fn(TransferProgress) -> anyhow::Result<()> + Send + Sync,
{
    fn on_progress(&self, progress: TransferProgress) -> anyhow::Result<()> {
        self(progress)
    }
}

/// Optional, shareable progress callback.
pub type ProgressFn = Option<Arc<dyn ProgressCallback>>;

/// Helper to create an Arc-wrapped callback from a closure.
pub fn progress_fn<F>(f: F) -> ProgressFn
where
    F: Fn(TransferProgress) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Some(Arc::new(f))
}
