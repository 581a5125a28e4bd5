//! Remote storage tiers for volume files.
//!
//! This crate moves sealed volume files between local disk and a remote
//! store, and lets a volume that lives remotely be read in place. It
//! provides:
//!
//! - A registry of backend factories, keyed by storage type
//! - Streaming uploads and downloads with per-chunk progress callbacks
//! - Read-only file handles serving positional range reads
//! - WebDAV and local directory backends
//!
//! # Architecture
//!
//! Each backend kind implements the small [`RemoteClient`] trait (range
//! read, streaming write, stat, remove). [`RemoteBackendStorage`] layers the
//! volume-level operations of [`BackendStorage`] over any client, and the
//! [`BackendRegistry`] maps a storage type to the [`BackendFactory`] that
//! builds it from a [`BackendConfiguration`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use tier_backend::{progress_fn, BackendConfiguration, BackendRegistry};
//!
//! # async fn example() -> Result<(), tier_backend::BackendError> {
//! let configuration = BackendConfiguration::from_iter([
//!     ("storage.backend.webdav.default.endpoint", "http://localhost:8080/dav/"),
//!     ("storage.backend.webdav.default.username", "admin"),
//!     ("storage.backend.webdav.default.password", "secret"),
//! ]);
//!
//! let registry = BackendRegistry::with_defaults();
//! let storage = registry
//!     .build(
//!         "webdav",
//!         &configuration,
//!         "storage.backend.webdav.default.",
//!         "default",
//!     )
//!     .await?;
//!
//! // Upload a sealed volume and report progress as it goes
//! let (key, size) = storage
//!     .copy_file(
//!         Path::new("/data/1.dat"),
//!         progress_fn(|p| {
//!             println!("{} bytes ({:.1}%)", p.bytes_transferred, p.percentage);
//!             Ok(())
//!         }),
//!     )
//!     .await?;
//!
//! // Read a needle straight from the remote copy
//! let file = storage.new_file_handle(&key, None);
//! let mut buf = vec![0u8; 512];
//! let n = file.read_at(&mut buf, 8).await?;
//! # let _ = (size, n);
//! # Ok(())
//! # }
//! ```

pub mod backends;
mod client;
mod config;
mod error;
mod file;
mod progress;
mod registry;
mod storage;
mod tier;
pub mod transfer;

#[cfg(test)]
mod testing;

pub use backends::{
    local::{LocalBackendFactory, LocalDirClient},
    webdav::{WebDavBackendFactory, WebDavClient, WebDavConfig},
};
pub use client::{RemoteClient, RemoteStat, RemoteStream, UploadBody};
pub use config::BackendConfiguration;
pub use error::{BackendError, BackendResult};
pub use file::{BackendStorageFile, RemoteStorageFile};
pub use progress::{progress_fn, ProgressCallback, ProgressFn, TransferProgress};
pub use registry::{BackendFactory, BackendRegistry, BackendStorages, StorageType};
pub use storage::{BackendStorage, RemoteBackendStorage};
pub use tier::{RemoteFile, TierFileInfo};
pub use transfer::DOWNLOAD_BUFFER_SIZE;
