//! Configuration management for the TV client.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Default API base URL (can be overridden at compile time via PIXLME_API_BASE_URL env var).
pub const DEFAULT_API_BASE_URL: &str = match option_env!("PIXLME_API_BASE_URL") {
    Some(url) => url,
    None => "https://api.pixlme.com/",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Name reported to the backend when pairing or registering this device.
pub const DEFAULT_DEVICE_NAME: &str = "PixlMe TV";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PUSH_RENEWAL_MINUTES: u64 = 55;

/// Main client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Base URL every API path is joined onto.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Fixed device identifier. When unset, one is generated and persisted.
    #[serde(default)]
    pub device_id: Option<String>,
    /// Human readable device name sent during pairing.
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// Per-request HTTP timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Upper bound on a token refresh round trip.
    #[serde(default = "default_refresh_timeout_secs")]
    pub refresh_timeout_secs: u64,
    /// How often the push subscription descriptor is renewed.
    #[serde(default = "default_push_renewal_minutes")]
    pub push_renewal_minutes: u64,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_device_name() -> String {
    DEFAULT_DEVICE_NAME.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_refresh_timeout_secs() -> u64 {
    DEFAULT_REFRESH_TIMEOUT_SECS
}

fn default_push_renewal_minutes() -> u64 {
    DEFAULT_PUSH_RENEWAL_MINUTES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_base_url: default_api_base_url(),
            device_id: None,
            device_name: default_device_name(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_timeout_secs: DEFAULT_REFRESH_TIMEOUT_SECS,
            push_renewal_minutes: DEFAULT_PUSH_RENEWAL_MINUTES,
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults.
    /// Environment variables take precedence over the file.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            debug!(path = %config_path.display(), "Loading config file");
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `PIXLME_*` overrides from the given lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(level) = lookup("PIXLME_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(url) = lookup("PIXLME_API_BASE_URL") {
            self.api_base_url = url;
        }
        if let Some(device_id) = lookup("PIXLME_DEVICE_ID") {
            self.device_id = Some(device_id);
        }
    }

    /// Parsed API base URL. A trailing slash is added so relative paths join
    /// underneath it instead of replacing the last segment.
    pub fn api_base_url(&self) -> CoreResult<Url> {
        let raw = if self.api_base_url.ends_with('/') {
            self.api_base_url.clone()
        } else {
            format!("{}/", self.api_base_url)
        };
        let url = Url::parse(&raw)?;
        if url.cannot_be_a_base() {
            return Err(CoreError::Config(format!(
                "api_base_url cannot be used as a base: {}",
                self.api_base_url
            )));
        }
        Ok(url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    pub fn push_renewal_interval(&self) -> Duration {
        Duration::from_secs(self.push_renewal_minutes * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.device_id, None);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.refresh_timeout(), Duration::from_secs(10));
        assert_eq!(config.push_renewal_interval(), Duration::from_secs(55 * 60));
    }

    #[test]
    fn test_config_load_from_file_fills_missing_fields() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, r#"{ "log_level": "debug" }"#).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.device_name, DEFAULT_DEVICE_NAME);
        assert_eq!(config.push_renewal_minutes, 55);
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config {
            device_id: Some("tv-1234".to_string()),
            api_base_url: "http://localhost:8080/".to_string(),
            ..Config::default()
        };
        config.save(&paths).unwrap();

        let loaded = Config::load_from_file(&paths.config_file()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.device_name, DEFAULT_DEVICE_NAME);
    }

    #[test]
    fn test_overrides_replace_fields() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PIXLME_LOG_LEVEL", "trace"),
            ("PIXLME_API_BASE_URL", "http://127.0.0.1:9000"),
            ("PIXLME_DEVICE_ID", "abc"),
        ]);
        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.log_level, "trace");
        assert_eq!(config.api_base_url, "http://127.0.0.1:9000");
        assert_eq!(config.device_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_blank_overrides_are_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|_| Some("   ".to_string()));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_api_base_url_gets_trailing_slash() {
        let config = Config {
            api_base_url: "https://example.com/v2".to_string(),
            ..Config::default()
        };
        let url = config.api_base_url().unwrap();
        assert_eq!(
            url.join("api/auth/signin").unwrap().as_str(),
            "https://example.com/v2/api/auth/signin"
        );
    }

    #[test]
    fn test_api_base_url_invalid() {
        let config = Config {
            api_base_url: "not a valid url".to_string(),
            ..Config::default()
        };
        assert!(config.api_base_url().is_err());
    }
}
