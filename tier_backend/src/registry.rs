//! Registry of backend factories, keyed by storage type.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    sync::Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    backends::{local::LocalBackendFactory, webdav::WebDavBackendFactory},
    config::BackendConfiguration,
    storage::BackendStorage,
    BackendError,
    BackendResult,
};

/// Name of a backend kind, e.g. `webdav`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageType(String);

impl StorageType {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StorageType {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StorageType {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Constructor for one kind of backend storage.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    fn storage_type(&self) -> StorageType;

    /// Build and connect a storage from the keys under `config_prefix`.
    async fn build_storage(
        &self,
        configuration: &BackendConfiguration,
        config_prefix: &str,
        id: &str,
    ) -> BackendResult<Arc<dyn BackendStorage>>;
}

/// Table of backend factories.
///
/// Built once at startup and read-only afterwards; pass it by reference to
/// whatever needs to build storages.
#[derive(Default)]
pub struct BackendRegistry {
    factories: HashMap<StorageType, Arc<dyn BackendFactory>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every backend kind this crate ships.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(WebDavBackendFactory));
        registry.register(Arc::new(LocalBackendFactory));
        registry
    }

    /// Register a factory under its storage type. A factory registered
    /// later for the same type replaces the earlier one.
    pub fn register(&mut self, factory: Arc<dyn BackendFactory>) {
        let storage_type = factory.storage_type();
        debug!(%storage_type, "registering backend factory");
        self.factories.insert(storage_type, factory);
    }

    pub fn storage_types(&self) -> Vec<StorageType> {
        let mut types: Vec<StorageType> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn contains(&self, storage_type: &str) -> bool {
        self.factories.contains_key(&StorageType::from(storage_type))
    }

    /// Build a storage of kind `storage_type`. Connection failures are
    /// returned as-is; nothing is retried.
    pub async fn build(
        &self,
        storage_type: &str,
        configuration: &BackendConfiguration,
        config_prefix: &str,
        id: &str,
    ) -> BackendResult<Arc<dyn BackendStorage>> {
        let factory = self
            .factories
            .get(&StorageType::from(storage_type))
            .ok_or_else(|| BackendError::UnknownBackendType {
                storage_type: storage_type.to_string(),
            })?;
        factory.build_storage(configuration, config_prefix, id).await
    }

    /// Build every backend instance configured under `root_prefix`.
    ///
    /// Keys are expected as `<root_prefix><type>.<id>.<field>`. Instances
    /// whose `enabled` field is `false` are skipped.
    pub async fn load_storages(
        &self,
        configuration: &BackendConfiguration,
        root_prefix: &str,
    ) -> BackendResult<BackendStorages> {
        let mut instances = BTreeSet::new();
        for key in configuration.keys() {
            let Some(rest) = key.strip_prefix(root_prefix) else {
                continue;
            };
            let mut parts = rest.splitn(3, '.');
            if let (Some(storage_type), Some(id), Some(_field)) =
                (parts.next(), parts.next(), parts.next())
            {
                instances.insert((storage_type.to_string(), id.to_string()));
            }
        }

        let mut storages = BackendStorages::default();
        for (storage_type, id) in instances {
            let prefix = format!("{root_prefix}{storage_type}.{id}.");
            if configuration.get(&format!("{prefix}enabled")) == Some("false") {
                info!(%storage_type, %id, "backend storage disabled");
                continue;
            }
            let storage = self.build(&storage_type, configuration, &prefix, &id).await?;
            storages.insert(storage);
        }
        Ok(storages)
    }
}

/// Backend storages built from configuration, keyed by `<type>.<id>`.
#[derive(Default, Clone)]
pub struct BackendStorages {
    storages: BTreeMap<String, Arc<dyn BackendStorage>>,
}

impl BackendStorages {
    pub fn insert(&mut self, storage: Arc<dyn BackendStorage>) {
        self.storages.insert(storage.name(), storage);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn BackendStorage>> {
        self.storages.get(name).cloned()
    }

    pub fn get_typed(&self, storage_type: &str, id: &str) -> Option<Arc<dyn BackendStorage>> {
        self.get(&format!("{storage_type}.{id}"))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn BackendStorage>)> {
        self.storages.iter().map(|(name, s)| (name.as_str(), s))
    }

    pub fn len(&self) -> usize {
        self.storages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Factory that records how often it was invoked.
    struct CountingFactory {
        storage_type: &'static str,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BackendFactory for CountingFactory {
        fn storage_type(&self) -> StorageType {
            StorageType::from(self.storage_type)
        }

        async fn build_storage(
            &self,
            configuration: &BackendConfiguration,
            config_prefix: &str,
            id: &str,
        ) -> BackendResult<Arc<dyn BackendStorage>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            LocalBackendFactory
                .build_storage(configuration, config_prefix, id)
                .await
        }
    }

    #[tokio::test]
    async fn test_unknown_type_never_builds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(CountingFactory {
            storage_type: "counting",
            calls: calls.clone(),
        }));

        let result = registry
            .build("ftp", &BackendConfiguration::default(), "", "default")
            .await;
        assert!(matches!(
            result,
            Err(BackendError::UnknownBackendType { ref storage_type }) if storage_type == "ftp"
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(CountingFactory {
            storage_type: "local",
            calls: first.clone(),
        }));
        registry.register(Arc::new(CountingFactory {
            storage_type: "local",
            calls: second.clone(),
        }));

        let dir = tempfile::tempdir().unwrap();
        let configuration = BackendConfiguration::from_iter([(
            "local.directory",
            dir.path().display().to_string(),
        )]);
        registry
            .build("local", &configuration, "local.", "default")
            .await
            .unwrap();

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(registry.storage_types(), vec![StorageType::from("local")]);
    }

    #[tokio::test]
    async fn test_default_types() {
        let registry = BackendRegistry::with_defaults();
        assert_eq!(
            registry.storage_types(),
            vec![StorageType::from("local"), StorageType::from("webdav")]
        );
        assert!(registry.contains("webdav"));
        assert!(!registry.contains("s3"));
    }

    #[tokio::test]
    async fn test_load_storages() {
        let cold = tempfile::tempdir().unwrap();
        let archive = tempfile::tempdir().unwrap();
        let configuration = BackendConfiguration::from_iter([
            (
                "storage.backend.local.cold.directory".to_string(),
                cold.path().display().to_string(),
            ),
            (
                "storage.backend.local.archive.directory".to_string(),
                archive.path().display().to_string(),
            ),
            (
                "storage.backend.local.off.directory".to_string(),
                "/does/not/matter".to_string(),
            ),
            (
                "storage.backend.local.off.enabled".to_string(),
                "false".to_string(),
            ),
            ("unrelated.key".to_string(), "x".to_string()),
        ]);

        let storages = BackendRegistry::with_defaults()
            .load_storages(&configuration, "storage.backend.")
            .await
            .unwrap();

        assert_eq!(storages.len(), 2);
        let cold_storage = storages.get_typed("local", "cold").unwrap();
        assert_eq!(cold_storage.id(), "cold");
        assert_eq!(
            cold_storage.to_properties(),
            configuration.scoped("storage.backend.local.cold.")
        );
        assert!(storages.get("local.off").is_none());
        let names: Vec<&str> = storages.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["local.archive", "local.cold"]);
    }

    #[tokio::test]
    async fn test_load_storages_unknown_type() {
        let configuration =
            BackendConfiguration::from_iter([("storage.backend.s3.default.bucket", "b")]);
        let result = BackendRegistry::with_defaults()
            .load_storages(&configuration, "storage.backend.")
            .await;
        assert!(matches!(
            result,
            Err(BackendError::UnknownBackendType { .. })
        ));
    }
}
