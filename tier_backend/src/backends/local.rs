//! Local directory remote tier.
//!
//! Treats a directory (typically a mounted network share) as the remote
//! store. Object keys are paths relative to that directory.

use std::{
    collections::HashMap,
    io::SeekFrom,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::{
    client::{RemoteClient, RemoteStat, RemoteStream, UploadBody},
    config::BackendConfiguration,
    registry::BackendFactory,
    storage::{BackendStorage, RemoteBackendStorage},
    BackendError,
    BackendResult,
    StorageType,
};

pub const STORAGE_TYPE: &str = "local";

/// Builds [`RemoteBackendStorage`] instances backed by [`LocalDirClient`].
#[derive(Debug, Default)]
pub struct LocalBackendFactory;

#[async_trait]
impl BackendFactory for LocalBackendFactory {
    fn storage_type(&self) -> StorageType {
        StorageType::from(STORAGE_TYPE)
    }

    async fn build_storage(
        &self,
        configuration: &BackendConfiguration,
        config_prefix: &str,
        id: &str,
    ) -> BackendResult<Arc<dyn BackendStorage>> {
        let key = format!("{config_prefix}directory");
        let directory = configuration.get_string(&key);
        if directory.is_empty() {
            return Err(BackendError::InvalidConfiguration {
                key,
                reason: "directory is required".to_string(),
            });
        }

        let client = LocalDirClient::new(&directory);
        client
            .connect()
            .await
            .map_err(|source| BackendError::ConnectionError {
                storage: format!("{STORAGE_TYPE}.{id}"),
                endpoint: directory.clone(),
                source,
            })?;

        info!(id, %directory, "created backend storage {STORAGE_TYPE}.{id}");

        Ok(Arc::new(RemoteBackendStorage::new(
            self.storage_type(),
            id,
            HashMap::from([("directory".to_string(), directory)]),
            Arc::new(client),
        )))
    }
}

/// Filesystem implementation of the remote primitives.
pub struct LocalDirClient {
    root: PathBuf,
}

impl LocalDirClient {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a key below the root, rejecting keys that escape it or
    /// name the root itself.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        let mut components = relative.components().peekable();
        if components.peek().is_none() ||
            components.any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("invalid object path '{path}'");
        }
        Ok(self.root.join(relative))
    }

    async fn open(&self, path: &str) -> Result<tokio::fs::File> {
        let local = self.resolve(path)?;
        tokio::fs::File::open(&local)
            .await
            .with_context(|| format!("failed to open {}", local.display()))
    }
}

#[async_trait]
impl RemoteClient for LocalDirClient {
    async fn connect(&self) -> Result<()> {
        let metadata = tokio::fs::metadata(&self.root)
            .await
            .with_context(|| format!("failed to stat {}", self.root.display()))?;
        if !metadata.is_dir() {
            bail!("{} is not a directory", self.root.display());
        }
        Ok(())
    }

    async fn read_range(&self, path: &str, offset: u64, length: u64) -> Result<RemoteStream> {
        let mut file = self.open(path).await?;
        let size = file.metadata().await?.len();
        if length > 0 && offset >= size {
            return Err(anyhow!(
                "range not satisfiable: offset {offset} of {path} with size {size}"
            ));
        }
        file.seek(SeekFrom::Start(offset)).await?;
        Ok(Box::pin(
            ReaderStream::new(file.take(length)).map_err(anyhow::Error::from),
        ))
    }

    async fn read_stream(&self, path: &str) -> Result<RemoteStream> {
        let file = self.open(path).await?;
        Ok(Box::pin(
            ReaderStream::new(file).map_err(anyhow::Error::from),
        ))
    }

    async fn write_stream(&self, path: &str, mut body: UploadBody, _size: u64) -> Result<()> {
        let local = self.resolve(path)?;
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let mut file = tokio::fs::File::create(&local)
            .await
            .with_context(|| format!("failed to create {}", local.display()))?;
        tokio::io::copy(&mut body, &mut file)
            .await
            .with_context(|| format!("failed to write {}", local.display()))?;
        file.sync_all().await?;
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<Option<RemoteStat>> {
        let local = self.resolve(path)?;
        match tokio::fs::metadata(&local).await {
            Ok(metadata) => Ok(Some(RemoteStat {
                size: metadata.len(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::Error::from(e).context(format!("failed to stat {path}"))),
        }
    }

    async fn remove_all(&self, path: &str) -> Result<()> {
        let local = self.resolve(path)?;
        let metadata = match tokio::fs::symlink_metadata(&local).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let removed = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&local).await
        } else {
            tokio::fs::remove_file(&local).await
        };
        match removed {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                Err(anyhow::Error::from(e).context(format!("failed to remove {path}")))
            }
            _ => Ok(()),
        }
    }
}
