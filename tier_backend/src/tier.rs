//! Descriptors of volumes that already live on a remote tier.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// One uploaded object as recorded by the storage engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub backend_type: String,
    pub backend_id: String,
    pub key: String,
    #[serde(default)]
    pub offset: u64,
    pub file_size: u64,
    /// Unix seconds.
    pub modified_time: u64,
    #[serde(default)]
    pub extension: String,
}

impl RemoteFile {
    pub fn modified_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.modified_time)
    }
}

/// Tier metadata supplied by the caller when it opens a remote volume.
///
/// File handles trust this descriptor for size and modification time
/// instead of asking the remote store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierFileInfo {
    #[serde(default)]
    pub files: Vec<RemoteFile>,
    #[serde(default)]
    pub version: u32,
}

impl TierFileInfo {
    /// Descriptor for a single object copied to `backend_type.backend_id`.
    pub fn single(
        backend_type: &str,
        backend_id: &str,
        key: &str,
        file_size: u64,
        modified_time: SystemTime,
    ) -> Self {
        let modified_time = modified_time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            files: vec![RemoteFile {
                backend_type: backend_type.to_string(),
                backend_id: backend_id.to_string(),
                key: key.to_string(),
                file_size,
                modified_time,
                ..Default::default()
            }],
            version: 0,
        }
    }

    pub fn first(&self) -> Option<&RemoteFile> {
        self.files.first()
    }
}
