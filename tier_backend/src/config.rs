//! Prefix-scoped string properties used to configure backends.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Flat string-to-string configuration shared by all backend instances.
///
/// Keys are dotted paths such as `storage.backend.webdav.default.endpoint`.
/// Each backend reads its own keys through a prefix and never mutates the
/// configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendConfiguration {
    values: BTreeMap<String, String>,
}

impl BackendConfiguration {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }

    /// Returns the value for `key`, or an empty string if it is absent.
    pub fn get_string(&self, key: &str) -> String {
        self.values.get(key).cloned().unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All values under `prefix`, keyed by the remainder of their key.
    pub fn scoped(&self, prefix: &str) -> HashMap<String, String> {
        self.values
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(prefix)
                    .filter(|rest| !rest.is_empty())
                    .map(|rest| (rest.to_string(), value.clone()))
            })
            .collect()
    }

    /// Flatten every value a figment provides into dotted keys.
    ///
    /// Nested tables become `parent.child` keys, numbers and booleans are
    /// rendered as strings, arrays are indexed (`list.0`).
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let root: serde_json::Value = figment.extract()?;
        let mut values = BTreeMap::new();
        flatten("", &root, &mut values);
        Ok(Self { values })
    }
}

fn flatten(prefix: &str, value: &serde_json::Value, out: &mut BTreeMap<String, String>) {
    let child = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        }
    };
    match value {
        serde_json::Value::Object(map) => {
            for (key, value) in map {
                flatten(&child(key), value, out);
            }
        }
        serde_json::Value::Array(items) => {
            for (index, value) in items.iter().enumerate() {
                flatten(&child(&index.to_string()), value, out);
            }
        }
        serde_json::Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        serde_json::Value::Null => {}
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

impl<K, V> FromIterator<(K, V)> for BackendConfiguration
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
