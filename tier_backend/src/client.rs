//! Remote file-transfer protocol client trait.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use tokio::io::AsyncRead;

/// Stream of object bytes returned by read operations.
pub type RemoteStream = BoxStream<'static, Result<Bytes>>;

/// Body handed to [`RemoteClient::write_stream`].
pub type UploadBody = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Result of a remote stat call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteStat {
    /// Size in bytes as reported by the remote store.
    pub size: u64,
}

/// Path-addressed primitives every remote store must provide.
///
/// Implementations are shared by a backend storage and all of its file
/// handles, so they must be safe for concurrent use.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Verify that the remote store is reachable with the configured
    /// credentials.
    async fn connect(&self) -> Result<()>;

    /// Read `length` bytes starting at `offset`.
    ///
    /// Requesting a range that starts past the end of the object is an
    /// error.
    async fn read_range(&self, path: &str, offset: u64, length: u64) -> Result<RemoteStream>;

    /// Read the whole object.
    async fn read_stream(&self, path: &str) -> Result<RemoteStream>;

    /// Write `body` to `path`, replacing any existing object.
    async fn write_stream(&self, path: &str, body: UploadBody, size: u64) -> Result<()>;

    /// Returns `None` if the object doesn't exist.
    async fn stat(&self, path: &str) -> Result<Option<RemoteStat>>;

    /// Remove the object and anything nested under it. Removing a path
    /// that doesn't exist succeeds.
    async fn remove_all(&self, path: &str) -> Result<()>;
}
