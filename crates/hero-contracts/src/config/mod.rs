mod hero;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use hero::{paths, HeroConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed reading config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config {path} is invalid: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Hierarchical key/value configuration.
///
/// Values are addressed by slash-separated paths. A lookup with a scope code
/// prefers the scope's own value and falls back to the default scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigStore {
    #[serde(default)]
    default: Map<String, Value>,
    #[serde(default)]
    scopes: BTreeMap<String, Map<String, Value>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a store from disk. A missing file is an empty store.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn get(&self, path: &str, scope: Option<&str>) -> Option<&Value> {
        scope
            .and_then(|code| self.scopes.get(code))
            .and_then(|values| values.get(path))
            .filter(|value| !value.is_null())
            .or_else(|| self.default.get(path).filter(|value| !value.is_null()))
    }

    pub fn set_default(&mut self, path: &str, value: Value) {
        self.default.insert(path.to_string(), value);
    }

    pub fn set_scoped(&mut self, scope: &str, path: &str, value: Value) {
        self.scopes
            .entry(scope.to_string())
            .or_default()
            .insert(path.to_string(), value);
    }

    pub fn with_default(mut self, path: &str, value: Value) -> Self {
        self.set_default(path, value);
        self
    }

    /// Fills absent default-scope keys from non-empty environment variables.
    pub fn fill_from_env(&mut self, mapping: &[(&str, &str)]) {
        for (path, var) in mapping {
            if self.default.contains_key(*path) {
                continue;
            }
            if let Some(value) = non_empty_env(var) {
                self.default.insert(path.to_string(), Value::String(value));
            }
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
