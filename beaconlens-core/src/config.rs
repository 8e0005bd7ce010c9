//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/beaconlens/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/beaconlens/` (~/.config/beaconlens/)
//! - Data: `$XDG_DATA_HOME/beaconlens/` (~/.local/share/beaconlens/)
//! - State/Logs: `$XDG_STATE_HOME/beaconlens/` (~/.local/state/beaconlens/)

use crate::error::{Error, Result};
use crate::types::DomainId;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// HTTP listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Database location override
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Ingestion pipeline tuning
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Aggregation defaults
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Domains known to the registry adapter
    #[serde(default)]
    pub domains: Vec<DomainEntry>,

    /// API keys and the domains each may query
    #[serde(default)]
    pub api_keys: Vec<ApiKeyEntry>,
}

/// HTTP listener settings
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Socket address to bind, e.g. `127.0.0.1:8787`
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

/// Database settings
#[derive(Debug, Deserialize, Default, Clone)]
pub struct DatabaseConfig {
    /// Override for the SQLite file (defaults to the XDG data dir)
    pub path: Option<PathBuf>,
}

/// Ingestion pipeline settings
#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Number of beacon worker shards
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Total beacon queue capacity, split evenly across shards
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Max milliseconds the beacon handler waits for queue capacity
    #[serde(default = "default_beacon_deadline_ms")]
    pub beacon_deadline_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            beacon_deadline_ms: default_beacon_deadline_ms(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    4096
}

fn default_beacon_deadline_ms() -> u64 {
    50
}

/// Longest configurable analytics window, in days.
pub const MAX_WINDOW_DAYS: i64 = 36_500;

/// Aggregation defaults
#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    /// Length of ranked lists (exit pages, page views)
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Window used by the summary query when no dates are given
    #[serde(default = "default_window_days")]
    pub default_window_days: i64,

    /// Window used by the heatmap query when `days` is absent
    #[serde(default = "default_heatmap_days")]
    pub default_heatmap_days: i64,

    /// Sessions listed by the summary query when `limit` is absent
    #[serde(default = "default_session_limit")]
    pub default_session_limit: usize,

    /// Upper bound for `limit`
    #[serde(default = "default_max_session_limit")]
    pub max_session_limit: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            default_window_days: default_window_days(),
            default_heatmap_days: default_heatmap_days(),
            default_session_limit: default_session_limit(),
            max_session_limit: default_max_session_limit(),
        }
    }
}

fn default_top_n() -> usize {
    10
}

fn default_window_days() -> i64 {
    30
}

fn default_heatmap_days() -> i64 {
    7
}

fn default_session_limit() -> usize {
    100
}

fn default_max_session_limit() -> usize {
    1000
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,

    /// Mirror log output to stderr
    #[serde(default)]
    pub stderr: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
            stderr: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// A domain as supplied by the external registry
#[derive(Debug, Deserialize, Clone)]
pub struct DomainEntry {
    pub id: DomainId,
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// An API key and the domains it may query
#[derive(Debug, Deserialize, Clone)]
pub struct ApiKeyEntry {
    pub key: String,
    #[serde(default)]
    pub domains: Vec<DomainId>,
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints, returning the first problem found
    pub fn validate(&self) -> Result<()> {
        if self.ingest.workers == 0 {
            return Err(Error::Config("ingest.workers must be at least 1".to_string()));
        }
        if self.ingest.queue_capacity < self.ingest.workers {
            return Err(Error::Config(
                "ingest.queue_capacity must be at least ingest.workers".to_string(),
            ));
        }
        if self.analytics.top_n == 0 {
            return Err(Error::Config("analytics.top_n must be at least 1".to_string()));
        }
        for (name, days) in [
            ("analytics.default_window_days", self.analytics.default_window_days),
            ("analytics.default_heatmap_days", self.analytics.default_heatmap_days),
        ] {
            if !(1..=MAX_WINDOW_DAYS).contains(&days) {
                return Err(Error::Config(format!(
                    "{} must be between 1 and {}",
                    name, MAX_WINDOW_DAYS
                )));
            }
        }

        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for domain in &self.domains {
            if !ids.insert(domain.id) {
                return Err(Error::Config(format!("duplicate domain id {}", domain.id)));
            }
            if !names.insert(domain.name.to_ascii_lowercase()) {
                return Err(Error::Config(format!(
                    "duplicate domain name {}",
                    domain.name
                )));
            }
        }

        for api_key in &self.api_keys {
            if api_key.key.trim().is_empty() {
                return Err(Error::Config("api_keys entries need a key".to_string()));
            }
            if let Some(missing) = api_key.domains.iter().find(|id| !ids.contains(id)) {
                return Err(Error::Config(format!(
                    "api key references unknown domain id {}",
                    missing
                )));
            }
        }

        Ok(())
    }

    /// Resolved database path: explicit override or the XDG default
    pub fn resolved_database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(Self::database_path)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/beaconlens/config.toml` (~/.config/beaconlens/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("beaconlens").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("beaconlens")
    }

    /// Returns the state directory path (for logs)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("beaconlens")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/beaconlens/data.db` (~/.local/share/beaconlens/data.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("data.db")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join(crate::logging::LOG_FILE_NAME)
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// Binaries call this before anything else reads these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.bind, "127.0.0.1:8787");
        assert_eq!(config.ingest.workers, 4);
        assert_eq!(config.ingest.beacon_deadline_ms, 50);
        assert_eq!(config.analytics.top_n, 10);
        assert!(config.domains.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
bind = "0.0.0.0:9000"

[ingest]
workers = 8
beacon_deadline_ms = 20

[analytics]
default_heatmap_days = 14

[logging]
level = "debug"

[[domains]]
id = 1
name = "shop.example.com"

[[domains]]
id = 2
name = "blog.example.com"
active = false

[[api_keys]]
key = "k-owner"
domains = [1, 2]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.ingest.workers, 8);
        assert_eq!(config.ingest.queue_capacity, 4096);
        assert_eq!(config.analytics.default_heatmap_days, 14);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.domains.len(), 2);
        assert!(config.domains[0].active);
        assert!(!config.domains[1].active);
        assert_eq!(config.api_keys[0].domains, vec![1, 2]);
    }

    #[test]
    fn test_validation_rejects_duplicates_and_dangling_keys() {
        let dup: Config = toml::from_str(
            r#"
[[domains]]
id = 1
name = "a.example"
[[domains]]
id = 1
name = "b.example"
"#,
        )
        .unwrap();
        assert!(dup.validate().is_err());

        let dangling: Config = toml::from_str(
            r#"
[[domains]]
id = 1
name = "a.example"
[[api_keys]]
key = "k"
domains = [7]
"#,
        )
        .unwrap();
        assert!(dangling.validate().is_err());

        let zero_workers = Config {
            ingest: IngestConfig {
                workers: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(zero_workers.validate().is_err());
    }

    #[test]
    fn test_validation_bounds_window_days() {
        for days in [0, -3, MAX_WINDOW_DAYS + 1, i64::MAX] {
            let config = Config {
                analytics: AnalyticsConfig {
                    default_window_days: days,
                    ..Default::default()
                },
                ..Default::default()
            };
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("analytics.default_window_days"));
        }

        let heatmap: Config = toml::from_str("[analytics]\ndefault_heatmap_days = 100000\n").unwrap();
        assert!(heatmap.validate().is_err());

        let widest = Config {
            analytics: AnalyticsConfig {
                default_window_days: MAX_WINDOW_DAYS,
                ..Default::default()
            },
            ..Default::default()
        };
        widest.validate().unwrap();
    }

    #[test]
    fn test_database_path_override() {
        let config = Config {
            database: DatabaseConfig {
                path: Some(PathBuf::from("/tmp/custom.db")),
            },
            ..Default::default()
        };
        assert_eq!(
            config.resolved_database_path(),
            PathBuf::from("/tmp/custom.db")
        );
        assert!(Config::database_path().ends_with("beaconlens/data.db"));
    }
}
