//! File handles over objects stored on a remote tier.

use std::{sync::Arc, time::SystemTime};

use anyhow::anyhow;
use async_trait::async_trait;
use futures::StreamExt;
use tracing::trace;

use crate::{client::RemoteClient, tier::TierFileInfo, BackendError, BackendResult};

/// Local-file-like view of a volume, as the storage engine sees it.
#[async_trait]
pub trait BackendStorageFile: Send + Sync {
    /// Read up to `buf.len()` bytes starting at `offset`.
    ///
    /// May return fewer bytes than requested when the object ends inside
    /// the range.
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> BackendResult<usize>;

    async fn write_at(&self, buf: &[u8], offset: u64) -> BackendResult<usize>;

    async fn truncate(&self, size: u64) -> BackendResult<()>;

    async fn close(&self) -> BackendResult<()>;

    async fn sync(&self) -> BackendResult<()>;

    /// Size and modification time of the volume.
    fn stat(&self) -> BackendResult<(u64, SystemTime)>;

    fn name(&self) -> &str;
}

/// Read-only handle on one remote object.
///
/// Shares the client of the storage that created it. Holds no cursor:
/// every read is addressed by offset, so one handle may serve concurrent
/// readers.
pub struct RemoteStorageFile {
    client: Arc<dyn RemoteClient>,
    key: String,
    tier_info: Option<TierFileInfo>,
}

impl RemoteStorageFile {
    pub(crate) fn new(
        client: Arc<dyn RemoteClient>,
        key: String,
        tier_info: Option<TierFileInfo>,
    ) -> Self {
        Self {
            client,
            key,
            tier_info,
        }
    }

    fn range_error(&self, offset: u64, length: u64, source: anyhow::Error) -> BackendError {
        BackendError::RangeReadError {
            key: self.key.clone(),
            offset,
            length,
            source,
        }
    }
}

#[async_trait]
impl BackendStorageFile for RemoteStorageFile {
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> BackendResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let length = buf.len() as u64;

        let mut stream = self
            .client
            .read_range(&self.key, offset, length)
            .await
            .map_err(|e| self.range_error(offset, length, e))?;

        trace!(key = %self.key, offset, length, "read range");

        let mut n = 0;
        while n < buf.len() {
            let Some(chunk) = stream.next().await else {
                break;
            };
            let chunk = chunk.map_err(|e| self.range_error(offset, length, e))?;
            let take = chunk.len().min(buf.len() - n);
            buf[n..n + take].copy_from_slice(&chunk[..take]);
            n += take;
        }

        // End of data is only a normal termination once something was read.
        if n == 0 {
            return Err(self.range_error(
                offset,
                length,
                anyhow!("no data returned for range"),
            ));
        }
        Ok(n)
    }

    async fn write_at(&self, _buf: &[u8], _offset: u64) -> BackendResult<usize> {
        Err(BackendError::NotImplemented {
            operation: "write_at",
        })
    }

    async fn truncate(&self, _size: u64) -> BackendResult<()> {
        Err(BackendError::NotImplemented {
            operation: "truncate",
        })
    }

    async fn close(&self) -> BackendResult<()> {
        Ok(())
    }

    async fn sync(&self) -> BackendResult<()> {
        Ok(())
    }

    fn stat(&self) -> BackendResult<(u64, SystemTime)> {
        let file = self
            .tier_info
            .as_ref()
            .and_then(TierFileInfo::first)
            .ok_or_else(|| BackendError::MissingMetadata {
                key: self.key.clone(),
            })?;
        Ok((file.file_size, file.modified_at()))
    }

    fn name(&self) -> &str {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use bytes::Bytes;

    use super::*;
    use crate::{backends::webdav::WebDavClient, testing::TestWebDavServer};

    fn handle_on(
        server: &TestWebDavServer,
        key: &str,
        tier_info: Option<TierFileInfo>,
    ) -> RemoteStorageFile {
        let client = WebDavClient::new(&server.endpoint(), "", "").unwrap();
        RemoteStorageFile::new(Arc::new(client), key.to_string(), tier_info)
    }

    #[tokio::test]
    async fn test_read_at_full_and_short() {
        let server = TestWebDavServer::start().await;
        server.insert("vol", Bytes::from_static(b"abcdefghij"));
        let file = handle_on(&server, "vol", None);

        let mut buf = [0u8; 4];
        assert_eq!(file.read_at(&mut buf, 2).await.unwrap(), 4);
        assert_eq!(&buf, b"cdef");

        // The object ends inside the requested range.
        let mut buf = [0u8; 8];
        assert_eq!(file.read_at(&mut buf, 6).await.unwrap(), 4);
        assert_eq!(&buf[..4], b"ghij");
    }

    #[tokio::test]
    async fn test_read_at_past_end_is_range_error() {
        let server = TestWebDavServer::start().await;
        server.insert("vol", Bytes::from_static(b"abcdefghij"));
        let file = handle_on(&server, "vol", None);

        let mut buf = [0u8; 4];
        let err = file.read_at(&mut buf, 10).await.unwrap_err();
        assert!(
            matches!(err, BackendError::RangeReadError { ref key, offset: 10, length: 4, .. } if key == "vol"),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn test_read_at_end_of_offset_space() {
        let server = TestWebDavServer::start().await;
        server.insert("vol", Bytes::from_static(b"abcdefghij"));
        let file = handle_on(&server, "vol", None);

        let mut buf = [0u8; 16];
        let err = file.read_at(&mut buf, u64::MAX - 4).await.unwrap_err();
        assert!(
            matches!(err, BackendError::RangeReadError { offset, length: 16, .. } if offset == u64::MAX - 4),
            "{err:?}"
        );
        // Rejected before any request is sent.
        assert_eq!(server.request_count(), 0);
    }

    #[tokio::test]
    async fn test_read_at_empty_buffer() {
        let server = TestWebDavServer::start().await;
        let file = handle_on(&server, "missing", None);
        let mut buf = [0u8; 0];
        assert_eq!(file.read_at(&mut buf, 0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mutation_is_rejected() {
        let server = TestWebDavServer::start().await;
        let file = handle_on(&server, "vol", None);

        assert!(matches!(
            file.write_at(b"x", 0).await,
            Err(BackendError::NotImplemented {
                operation: "write_at"
            })
        ));
        assert!(matches!(
            file.truncate(0).await,
            Err(BackendError::NotImplemented {
                operation: "truncate"
            })
        ));
        file.close().await.unwrap();
        file.sync().await.unwrap();
    }

    #[tokio::test]
    async fn test_stat_uses_tier_info() {
        let server = TestWebDavServer::start().await;
        let mtime = UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        let info = TierFileInfo::single("webdav", "default", "vol", 1234, mtime);
        let file = handle_on(&server, "vol", Some(info));

        assert_eq!(file.stat().unwrap(), (1234, mtime));
        assert_eq!(file.name(), "vol");
        // No request reaches the server for a stat.
        assert_eq!(server.request_count(), 0);

        let file = handle_on(&server, "vol", Some(TierFileInfo::default()));
        assert!(matches!(
            file.stat(),
            Err(BackendError::MissingMetadata { .. })
        ));
        let file = handle_on(&server, "vol", None);
        assert!(matches!(
            file.stat(),
            Err(BackendError::MissingMetadata { .. })
        ));
    }
}
