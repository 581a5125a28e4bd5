use std::path::Path;

use anyhow::{bail, Result};
use figment::{
    providers::{Env, Format, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tier_backend::BackendConfiguration;

/// Prefix of environment variables overriding the config file. Nested keys
/// are separated by `__`, e.g.
/// `VOLUME_TIER_STORAGE__BACKEND__WEBDAV__DEFAULT__PASSWORD`.
pub const ENV_PREFIX: &str = "VOLUME_TIER_";

pub const DEFAULT_ROOT_PREFIX: &str = "storage.backend.";

fn default_root_prefix() -> String {
    DEFAULT_ROOT_PREFIX.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    #[serde(default)]
    pub structured_logging: bool,

    /// Backend instances are read from `<root_prefix><type>.<id>.<field>`.
    #[serde(default = "default_root_prefix")]
    pub root_prefix: String,

    /// Every configured value, flattened to dotted keys.
    #[serde(skip)]
    pub backends: BackendConfiguration,
}

impl Default for TierConfig {
    fn default() -> Self {
        TierConfig {
            structured_logging: false,
            root_prefix: default_root_prefix(),
            backends: BackendConfiguration::default(),
        }
    }
}

impl TierConfig {
    /// Load the config file at `path`, if any, with environment overrides
    /// on top. The file format follows the extension: `.toml` is TOML,
    /// anything else is YAML.
    pub fn load(path: Option<&Path>) -> Result<TierConfig> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            if !path.exists() {
                bail!("config file {} does not exist", path.display());
            }
            figment = match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => figment.merge(Toml::file(path)),
                _ => figment.merge(Yaml::file(path)),
            };
        }
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn from_figment(figment: Figment) -> Result<TierConfig> {
        let mut config: TierConfig = figment.extract()?;
        config.backends = BackendConfiguration::from_figment(&figment)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.root_prefix.is_empty() && !self.root_prefix.ends_with('.') {
            bail!(
                "root_prefix must be empty or end with '.': {}",
                self.root_prefix
            );
        }
        Ok(())
    }
}
