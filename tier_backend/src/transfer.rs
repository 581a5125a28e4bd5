//! Streaming uploads and downloads with progress reporting.
//!
//! Both directions stream through small buffers so a volume is never held
//! in memory. Progress is observed by decorators layered over the local
//! file: [`UploadProgressReader`] on the way up and
//! [`DownloadProgressWriter`] on the way down.

use std::{
    collections::HashSet,
    io,
    path::Path,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    task::{ready, Context, Poll},
};

use anyhow::{anyhow, Context as _};
use futures::TryStreamExt;
use pin_project_lite::pin_project;
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncWrite, AsyncWriteExt, ReadBuf},
};
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::{
    client::RemoteClient,
    progress::{ProgressFn, TransferProgress},
    BackendError,
    BackendResult,
};

/// Window used to copy a remote object into its local file. Kept small so
/// memory stays bounded and progress is reported often.
pub const DOWNLOAD_BUFFER_SIZE: usize = 8 * 1024;

/// Per-transfer state shared between a decorator and the code driving the
/// transfer.
#[derive(Default)]
struct TransferTracker {
    counted: Mutex<Counted>,
    aborted: Mutex<Option<anyhow::Error>>,
}

#[derive(Default)]
struct Counted {
    seen_offsets: HashSet<u64>,
    bytes: u64,
}

impl TransferTracker {
    /// Count `n` bytes read at `offset`, unless that offset was already
    /// counted. Returns the cumulative total.
    fn count_once(&self, offset: u64, n: u64) -> u64 {
        let mut counted = self.counted.lock().unwrap_or_else(PoisonError::into_inner);
        if counted.seen_offsets.insert(offset) {
            counted.bytes += n;
        }
        counted.bytes
    }

    fn count(&self, n: u64) -> u64 {
        let mut counted = self.counted.lock().unwrap_or_else(PoisonError::into_inner);
        counted.bytes += n;
        counted.bytes
    }

    fn bytes(&self) -> u64 {
        self.counted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .bytes
    }

    fn abort(&self, err: anyhow::Error) -> io::Error {
        let message = format!("{err:#}");
        *self.aborted.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
        io::Error::other(message)
    }

    fn take_abort(&self) -> Option<anyhow::Error> {
        self.aborted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Observer for a transfer whose decorator has been handed off to a client.
#[derive(Clone)]
pub struct TransferHandle {
    tracker: Arc<TransferTracker>,
}

impl TransferHandle {
    /// Bytes counted so far.
    pub fn bytes_transferred(&self) -> u64 {
        self.tracker.bytes()
    }

    /// The error returned by the progress callback, if it stopped the
    /// transfer.
    pub fn take_abort_error(&self) -> Option<anyhow::Error> {
        self.tracker.take_abort()
    }
}

pin_project! {
    /// Reader that reports upload progress after every chunk.
    ///
    /// Protocol clients may rewind and re-read a range (retries, request
    /// signing). Bytes are counted only the first time a starting offset is
    /// read, so retries never inflate the progress.
    pub struct UploadProgressReader<R> {
        #[pin]
        inner: R,
        position: u64,
        size: u64,
        callback: ProgressFn,
        tracker: Arc<TransferTracker>,
    }
}

impl<R> UploadProgressReader<R> {
    pub fn new(inner: R, size: u64, callback: ProgressFn) -> Self {
        Self {
            inner,
            position: 0,
            size,
            callback,
            tracker: Arc::default(),
        }
    }

    pub fn handle(&self) -> TransferHandle {
        TransferHandle {
            tracker: self.tracker.clone(),
        }
    }
}

impl<R: AsyncRead> AsyncRead for UploadProgressReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        ready!(this.inner.poll_read(cx, buf))?;

        let n = (buf.filled().len() - before) as u64;
        let offset = *this.position;
        *this.position += n;
        if n == 0 {
            return Poll::Ready(Ok(()));
        }

        // The lock only covers the counter; the callback runs after it is
        // released.
        let read = this.tracker.count_once(offset, n);
        if let Some(callback) = this.callback.as_ref() {
            if let Err(err) = callback.on_progress(TransferProgress::new(read, *this.size)) {
                return Poll::Ready(Err(this.tracker.abort(err)));
            }
        }

        Poll::Ready(Ok(()))
    }
}

impl<R: AsyncSeek> AsyncSeek for UploadProgressReader<R> {
    fn start_seek(self: Pin<&mut Self>, position: io::SeekFrom) -> io::Result<()> {
        self.project().inner.start_seek(position)
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        let this = self.project();
        let position = ready!(this.inner.poll_complete(cx))?;
        *this.position = position;
        Poll::Ready(Ok(position))
    }
}

pin_project! {
    /// Writer that reports download progress after every written chunk.
    pub struct DownloadProgressWriter<W> {
        #[pin]
        inner: W,
        size: u64,
        callback: ProgressFn,
        tracker: Arc<TransferTracker>,
    }
}

impl<W> DownloadProgressWriter<W> {
    pub fn new(inner: W, size: u64, callback: ProgressFn) -> Self {
        Self {
            inner,
            size,
            callback,
            tracker: Arc::default(),
        }
    }

    pub fn handle(&self) -> TransferHandle {
        TransferHandle {
            tracker: self.tracker.clone(),
        }
    }
}

impl<W: AsyncWrite> AsyncWrite for DownloadProgressWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        let n = ready!(this.inner.poll_write(cx, buf))?;
        if n == 0 {
            return Poll::Ready(Ok(0));
        }

        let written = this.tracker.count(n as u64);
        if let Some(callback) = this.callback.as_ref() {
            if let Err(err) = callback.on_progress(TransferProgress::new(written, *this.size)) {
                return Poll::Ready(Err(this.tracker.abort(err)));
            }
        }

        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}

/// Stream a local file to `key` on the remote store in a single write.
///
/// Returns the local file size. On failure the remote object may be left
/// partially written.
pub async fn upload_file(
    client: &dyn RemoteClient,
    local_path: &Path,
    key: &str,
    progress: ProgressFn,
) -> BackendResult<u64> {
    let upload_error = |source: anyhow::Error| BackendError::UploadError {
        key: key.to_string(),
        path: local_path.display().to_string(),
        source,
    };

    let file = File::open(local_path)
        .await
        .with_context(|| format!("failed to open file {}", local_path.display()))
        .map_err(upload_error)?;
    let size = file
        .metadata()
        .await
        .with_context(|| format!("failed to stat file {}", local_path.display()))
        .map_err(upload_error)?
        .len();

    let reader = UploadProgressReader::new(file, size, progress);
    let handle = reader.handle();

    if let Err(err) = client.write_stream(key, Box::new(reader), size).await {
        if let Some(source) = handle.take_abort_error() {
            return Err(BackendError::ProgressAborted { source });
        }
        return Err(upload_error(err));
    }

    debug!(
        path = %local_path.display(),
        key,
        size,
        "file uploaded"
    );
    Ok(size)
}

/// Stream `key` from the remote store into `local_path`, creating or
/// truncating it.
///
/// Returns the size reported by the remote store. Any error means the
/// local file contents are unreliable.
pub async fn download_file(
    client: &dyn RemoteClient,
    local_path: &Path,
    key: &str,
    progress: ProgressFn,
) -> BackendResult<u64> {
    let download_error = |source: anyhow::Error| BackendError::DownloadError {
        key: key.to_string(),
        path: local_path.display().to_string(),
        source,
    };

    let size = client
        .stat(key)
        .await
        .map_err(download_error)?
        .ok_or_else(|| download_error(anyhow!("remote object {key} not found")))?
        .size;

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(local_path)
        .await
        .with_context(|| format!("failed to open file {}", local_path.display()))
        .map_err(download_error)?;

    let mut writer = DownloadProgressWriter::new(file, size, progress);
    let handle = writer.handle();

    let stream = client.read_stream(key).await.map_err(download_error)?;
    let mut reader = StreamReader::new(stream.map_err(io::Error::other));

    let mut buf = vec![0u8; DOWNLOAD_BUFFER_SIZE];
    let copied: io::Result<()> = async {
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).await?;
        }
        writer.flush().await
    }
    .await;

    if let Err(err) = copied {
        if let Some(source) = handle.take_abort_error() {
            return Err(BackendError::ProgressAborted { source });
        }
        return Err(download_error(
            anyhow::Error::from(err).context(format!("failed to download /{key}")),
        ));
    }

    debug!(path = %local_path.display(), key, size, "file downloaded");
    Ok(size)
}
