//! Configuration settings for outbound.
//!
//! Settings are loaded from `~/.outbound/config.yaml`.

use serde::{Deserialize, Serialize};

use crate::cli::args::OutputFormat;
use crate::error::OutboundError;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// General settings.
    pub general: GeneralConfig,
    /// Replay and eviction settings.
    pub sync: SyncConfig,
    /// Remote persistence service settings.
    pub remote: RemoteConfig,
    /// Connectivity probing settings.
    pub connectivity: ConnectivityConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default output format.
    #[serde(default = "default_output_format")]
    pub default_output: OutputFormat,
}

/// Replay and eviction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Attempts after which a transiently failing item is evicted.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay before an automatic retry pass, in seconds.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    /// Upper bound for the retry delay, in seconds.
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
}

/// Remote persistence service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the REST endpoint, e.g. `https://api.example.com/rest/v1`.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Bearer token sent with every request.
    #[serde(default)]
    pub token: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Field of a create response holding the server-assigned id.
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Path probed to decide whether the remote is reachable.
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

/// Connectivity probing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Seconds between reachability probes in `watch` mode.
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
}

// Default value functions for serde
const fn default_output_format() -> OutputFormat {
    OutputFormat::Pretty
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_backoff_base() -> u64 {
    5
}

const fn default_backoff_max() -> u64 {
    300
}

const fn default_timeout() -> u64 {
    15
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_health_path() -> String {
    "/".to_string()
}

const fn default_probe_interval() -> u64 {
    10
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_output: default_output_format(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base(),
            backoff_max_secs: default_backoff_max(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            timeout_secs: default_timeout(),
            id_field: default_id_field(),
            health_path: default_health_path(),
        }
    }
}

impl RemoteConfig {
    /// The configured base URL, trimmed.
    ///
    /// # Errors
    ///
    /// Returns an error if no remote has been configured.
    pub fn require_base_url(&self) -> Result<&str, OutboundError> {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                OutboundError::Config(
                    "remote.base_url is not set; add it to config.yaml".to_string(),
                )
            })
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval(),
        }
    }
}

impl Config {
    /// Load configuration from a specific path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load_from_path(path: &std::path::Path) -> Result<Self, OutboundError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            OutboundError::Config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        serde_yaml::from_str(&contents).map_err(|e| {
            OutboundError::Config(format!(
                "Failed to parse config file {}: {e}",
                path.display()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.general.default_output, OutputFormat::Pretty);
        assert_eq!(config.sync.max_attempts, 3);
        assert_eq!(config.sync.backoff_base_secs, 5);
        assert_eq!(config.remote.id_field, "id");
        assert_eq!(config.connectivity.probe_interval_secs, 10);
        assert!(config.remote.base_url.is_none());
    }

    #[test]
    fn test_load_missing_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let config = Config::load_from_path(&config_path).unwrap();

        assert_eq!(config.sync.max_attempts, 3);
    }

    #[test]
    fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut config = Config::default();
        config.sync.max_attempts = 5;
        config.remote.base_url = Some("http://localhost:3000".to_string());

        std::fs::write(&config_path, serde_yaml::to_string(&config).unwrap()).unwrap();

        let loaded = Config::load_from_path(&config_path).unwrap();

        assert_eq!(loaded.sync.max_attempts, 5);
        assert_eq!(loaded.remote.require_base_url().unwrap(), "http://localhost:3000");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        std::fs::write(&config_path, "sync:\n  max_attempts: 7\n").unwrap();

        let config = Config::load_from_path(&config_path).unwrap();

        assert_eq!(config.sync.max_attempts, 7);
        assert_eq!(config.sync.backoff_max_secs, 300);
        assert_eq!(config.remote.timeout_secs, 15);
    }

    #[test]
    fn test_invalid_config_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        std::fs::write(&config_path, "sync: [not, a, map").unwrap();

        let err = Config::load_from_path(&config_path).unwrap_err();
        assert!(matches!(err, OutboundError::Config(_)));
    }

    #[test]
    fn test_require_base_url_missing() {
        let mut remote = RemoteConfig::default();
        assert!(remote.require_base_url().is_err());

        remote.base_url = Some("   ".to_string());
        let err = remote.require_base_url().unwrap_err();
        assert!(err.to_string().contains("remote.base_url"));
    }
}
