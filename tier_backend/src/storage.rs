//! Configured connections to remote tiers.

use std::{collections::HashMap, path::Path, sync::Arc};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use tracing::debug;

use crate::{
    client::RemoteClient,
    file::{BackendStorageFile, RemoteStorageFile},
    progress::ProgressFn,
    tier::TierFileInfo,
    transfer,
    BackendError,
    BackendResult,
    StorageType,
};

/// One configured remote tier.
///
/// Instances are built once by a [`BackendFactory`](crate::BackendFactory)
/// and shared for the life of the process. All operations may run
/// concurrently; a failed transfer leaves the storage usable.
#[async_trait]
pub trait BackendStorage: Send + Sync {
    fn id(&self) -> &str;

    fn storage_type(&self) -> &StorageType;

    /// `<type>.<id>`, the name volumes use to refer to this tier.
    fn name(&self) -> String {
        format!("{}.{}", self.storage_type(), self.id())
    }

    /// The unprefixed configuration this storage was built from.
    fn to_properties(&self) -> HashMap<String, String>;

    /// Bind a handle to `key`. No I/O is performed.
    fn new_file_handle(
        &self,
        key: &str,
        tier_info: Option<TierFileInfo>,
    ) -> Box<dyn BackendStorageFile>;

    /// Upload a local file under a freshly generated key.
    ///
    /// Returns the key and the number of bytes uploaded. On failure the
    /// remote object may be partially written; callers that care should
    /// [`delete_file`](Self::delete_file) it.
    async fn copy_file(&self, local_path: &Path, progress: ProgressFn)
        -> BackendResult<(String, u64)>;

    /// Download `key` into `local_path`, creating or truncating it.
    async fn download_file(
        &self,
        local_path: &Path,
        key: &str,
        progress: ProgressFn,
    ) -> BackendResult<u64>;

    /// Remove `key` and anything below it. Deleting an absent key succeeds.
    async fn delete_file(&self, key: &str) -> BackendResult<()>;
}

/// [`BackendStorage`] over any [`RemoteClient`].
pub struct RemoteBackendStorage {
    storage_type: StorageType,
    id: String,
    properties: HashMap<String, String>,
    client: Arc<dyn RemoteClient>,
}

impl RemoteBackendStorage {
    pub fn new(
        storage_type: StorageType,
        id: &str,
        properties: HashMap<String, String>,
        client: Arc<dyn RemoteClient>,
    ) -> Self {
        Self {
            storage_type,
            id: id.to_string(),
            properties,
            client,
        }
    }

    fn generate_key() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

#[async_trait]
impl BackendStorage for RemoteBackendStorage {
    fn id(&self) -> &str {
        &self.id
    }

    fn storage_type(&self) -> &StorageType {
        &self.storage_type
    }

    fn to_properties(&self) -> HashMap<String, String> {
        self.properties.clone()
    }

    fn new_file_handle(
        &self,
        key: &str,
        tier_info: Option<TierFileInfo>,
    ) -> Box<dyn BackendStorageFile> {
        let key = key.strip_prefix('/').unwrap_or(key);
        Box::new(RemoteStorageFile::new(
            self.client.clone(),
            key.to_string(),
            tier_info,
        ))
    }

    async fn copy_file(
        &self,
        local_path: &Path,
        progress: ProgressFn,
    ) -> BackendResult<(String, u64)> {
        let key = Self::generate_key();

        debug!(
            path = %local_path.display(),
            storage = %self.name(),
            key = %key,
            "copying file to remote tier"
        );

        let size = transfer::upload_file(self.client.as_ref(), local_path, &key, progress).await?;
        Ok((key, size))
    }

    async fn download_file(
        &self,
        local_path: &Path,
        key: &str,
        progress: ProgressFn,
    ) -> BackendResult<u64> {
        debug!(
            path = %local_path.display(),
            storage = %self.name(),
            key,
            "downloading file from remote tier"
        );

        transfer::download_file(self.client.as_ref(), local_path, key, progress).await
    }

    async fn delete_file(&self, key: &str) -> BackendResult<()> {
        debug!(storage = %self.name(), key, "deleting file from remote tier");

        // An empty key addresses the tier root.
        if key.trim_matches('/').is_empty() {
            return Err(BackendError::DeleteError {
                key: key.to_string(),
                source: anyhow!("refusing to delete the root of {}", self.name()),
            });
        }

        self.client
            .remove_all(key)
            .await
            .with_context(|| format!("remove {key} from {}", self.name()))
            .map_err(|source| BackendError::DeleteError {
                key: key.to_string(),
                source,
            })
    }
}
