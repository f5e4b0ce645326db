use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

use super::ConfigStore;

pub mod paths {
    pub const ENABLED: &str = "ai_category_hero/general/enabled";
    pub const API_KEY: &str = "ai_category_hero/general/api_key";
    pub const ORGANIZATION_ID: &str = "ai_category_hero/general/organization_id";

    pub const MODEL: &str = "ai_category_hero/generation/model";
    pub const IMAGE_SIZE: &str = "ai_category_hero/generation/size";
    pub const QUALITY: &str = "ai_category_hero/generation/quality";
    pub const API_BASE: &str = "ai_category_hero/generation/api_base";
    pub const TIMEOUT_SECONDS: &str = "ai_category_hero/generation/timeout_seconds";
    pub const TRANSPORT_RETRIES: &str = "ai_category_hero/generation/transport_retries";
    pub const RETRY_BACKOFF_SECONDS: &str = "ai_category_hero/generation/retry_backoff_seconds";

    pub const MEDIA_ROOT: &str = "ai_category_hero/media/root";
    pub const MEDIA_BASE_URL: &str = "ai_category_hero/media/base_url";
}

pub const DEFAULT_MODEL: &str = "gpt-image-1";
pub const DEFAULT_IMAGE_SIZE: &str = "1024x1024";
pub const DEFAULT_QUALITY: &str = "high";
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT_SECONDS: f64 = 300.0;
const DEFAULT_TRANSPORT_RETRIES: f64 = 1.0;
const DEFAULT_RETRY_BACKOFF_SECONDS: f64 = 1.0;

/// Typed view over the hero-image settings in a [`ConfigStore`].
///
/// Every accessor is a pure read: absent or unparsable values resolve to
/// `None`, `false`, or the documented default.
#[derive(Debug, Clone, Default)]
pub struct HeroConfig {
    store: ConfigStore,
}

impl HeroConfig {
    pub fn new(store: ConfigStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn is_enabled(&self, scope: Option<&str>) -> bool {
        self.store
            .get(paths::ENABLED, scope)
            .and_then(value_as_bool)
            .unwrap_or(false)
    }

    pub fn api_key(&self, scope: Option<&str>) -> Option<String> {
        self.string(paths::API_KEY, scope)
    }

    pub fn organization_id(&self, scope: Option<&str>) -> Option<String> {
        self.string(paths::ORGANIZATION_ID, scope)
    }

    pub fn model(&self, scope: Option<&str>) -> String {
        self.string(paths::MODEL, scope)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn image_size(&self, scope: Option<&str>) -> String {
        self.string(paths::IMAGE_SIZE, scope)
            .unwrap_or_else(|| DEFAULT_IMAGE_SIZE.to_string())
    }

    pub fn quality(&self, scope: Option<&str>) -> String {
        self.string(paths::QUALITY, scope)
            .unwrap_or_else(|| DEFAULT_QUALITY.to_string())
    }

    pub fn api_base(&self, scope: Option<&str>) -> String {
        self.string(paths::API_BASE, scope)
            .map(|value| value.trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
    }

    pub fn request_timeout(&self, scope: Option<&str>) -> Duration {
        let seconds = self.number(
            paths::TIMEOUT_SECONDS,
            scope,
            DEFAULT_TIMEOUT_SECONDS,
            1.0,
            3600.0,
        );
        Duration::from_secs_f64(seconds)
    }

    pub fn transport_retries(&self, scope: Option<&str>) -> usize {
        self.number(
            paths::TRANSPORT_RETRIES,
            scope,
            DEFAULT_TRANSPORT_RETRIES,
            0.0,
            5.0,
        )
        .round() as usize
    }

    pub fn retry_backoff(&self, scope: Option<&str>) -> Duration {
        let seconds = self.number(
            paths::RETRY_BACKOFF_SECONDS,
            scope,
            DEFAULT_RETRY_BACKOFF_SECONDS,
            0.0,
            60.0,
        );
        Duration::from_secs_f64(seconds)
    }

    pub fn media_root(&self, scope: Option<&str>) -> PathBuf {
        self.string(paths::MEDIA_ROOT, scope)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("media"))
    }

    /// Public base URL of the media root; empty when not configured.
    pub fn media_base_url(&self, scope: Option<&str>) -> String {
        self.string(paths::MEDIA_BASE_URL, scope).unwrap_or_default()
    }

    fn string(&self, path: &str, scope: Option<&str>) -> Option<String> {
        self.store
            .get(path, scope)
            .and_then(value_as_string)
            .filter(|value| !value.is_empty())
    }

    fn number(&self, path: &str, scope: Option<&str>, default: f64, min: f64, max: f64) -> f64 {
        self.store
            .get(path, scope)
            .and_then(value_as_f64)
            .filter(|value| value.is_finite())
            .map(|value| value.clamp(min, max))
            .unwrap_or(default)
    }
}

fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(value) => Some(*value),
        Value::Number(value) => value.as_f64().map(|number| number != 0.0),
        Value::String(value) => Some(matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )),
        _ => None,
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(value) => Some(value.trim().to_string()),
        Value::Number(value) => Some(value.to_string()),
        Value::Bool(value) => Some(value.to_string()),
        _ => None,
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(value) => value.as_f64(),
        Value::String(value) => value.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::{paths, HeroConfig};
    use crate::config::ConfigStore;

    #[test]
    fn empty_store_is_disabled_without_credentials() {
        let config = HeroConfig::default();
        assert!(!config.is_enabled(None));
        assert_eq!(config.api_key(None), None);
        assert_eq!(config.organization_id(Some("en")), None);
        assert_eq!(config.model(None), "gpt-image-1");
        assert_eq!(config.image_size(None), "1024x1024");
        assert_eq!(config.quality(None), "high");
        assert_eq!(config.request_timeout(None), Duration::from_secs(300));
        assert_eq!(config.transport_retries(None), 1);
        assert_eq!(config.media_base_url(None), "");
    }

    #[test]
    fn enabled_flag_accepts_loose_truthy_values() {
        for (raw, expected) in [
            (json!(true), true),
            (json!(1), true),
            (json!("1"), true),
            (json!("Yes"), true),
            (json!("0"), false),
            (json!(0), false),
            (json!("off"), false),
            (json!([]), false),
        ] {
            let config = HeroConfig::new(ConfigStore::new().with_default(paths::ENABLED, raw));
            assert_eq!(config.is_enabled(None), expected);
        }
    }

    #[test]
    fn blank_api_key_reads_as_absent_and_scope_overrides() {
        let mut store = ConfigStore::new().with_default(paths::API_KEY, json!("   "));
        store.set_scoped("en", paths::API_KEY, json!("sk-en"));
        store.set_scoped("en", paths::ORGANIZATION_ID, json!("org-1"));
        let config = HeroConfig::new(store);

        assert_eq!(config.api_key(None), None);
        assert_eq!(config.api_key(Some("en")), Some("sk-en".to_string()));
        assert_eq!(config.organization_id(Some("en")), Some("org-1".to_string()));
    }

    #[test]
    fn numeric_settings_are_clamped() {
        let store = ConfigStore::new()
            .with_default(paths::TIMEOUT_SECONDS, json!("0"))
            .with_default(paths::TRANSPORT_RETRIES, json!(99))
            .with_default(paths::API_BASE, json!("http://localhost:9000/v1/"));
        let config = HeroConfig::new(store);
        assert_eq!(config.request_timeout(None), Duration::from_secs(1));
        assert_eq!(config.transport_retries(None), 5);
        assert_eq!(config.api_base(None), "http://localhost:9000/v1");
    }
}
