//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;
use crate::protocol::{
    CodecConfig, DEFAULT_MAX_BODY_BYTES, DEFAULT_MAX_METADATA_BYTES, PROTOCOL_TAG,
};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub influxdb: InfluxDbConfig,

    #[serde(default)]
    pub realtime: RealtimeConfig,

    #[serde(default)]
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// InfluxDB connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct InfluxDbConfig {
    #[serde(default = "default_influxdb_url")]
    pub url: String,

    /// Database used when the search does not name one
    #[serde(default)]
    pub database: Option<String>,

    #[serde(default)]
    pub retention_policy: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Points per chunk requested from the server
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_influxdb_url() -> String {
    "http://localhost:8086".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_chunk_size() -> usize {
    10_000
}

impl Default for InfluxDbConfig {
    fn default() -> Self {
        Self {
            url: default_influxdb_url(),
            database: None,
            retention_policy: None,
            request_timeout_secs: default_request_timeout(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl InfluxDbConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Continuous search configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// How far behind the wall clock each window ends
    #[serde(default = "default_min_lag")]
    pub min_lag_ms: u64,

    /// Minimum time between two window queries; must be non-zero
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_min_lag() -> u64 {
    1000
}

fn default_poll_interval() -> u64 {
    1000
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            min_lag_ms: default_min_lag(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl RealtimeConfig {
    pub fn min_lag(&self) -> Duration {
        Duration::from_millis(self.min_lag_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Wire protocol configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default = "default_tag")]
    pub tag: String,

    #[serde(default = "default_max_metadata_bytes")]
    pub max_metadata_bytes: usize,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_tag() -> String {
    PROTOCOL_TAG.to_string()
}

fn default_max_metadata_bytes() -> usize {
    DEFAULT_MAX_METADATA_BYTES
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            tag: default_tag(),
            max_metadata_bytes: default_max_metadata_bytes(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ProtocolConfig {
    pub fn codec(&self) -> CodecConfig {
        CodecConfig {
            tag: self.tag.clone(),
            max_metadata_bytes: self.max_metadata_bytes,
            max_body_bytes: self.max_body_bytes,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log file; stderr when unset
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Result<Self, ConfigError> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("tsbridge").join("config.toml")),
            Some(PathBuf::from("/etc/tsbridge/config.toml")),
            Some(PathBuf::from("./tsbridge.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                let config = Self::load_with_env(path)?;
                tracing::debug!("Loaded config from {:?}", path);
                return Ok(config);
            }
        }

        tracing::debug!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Reject values the session cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        // a zero interval would re-query without pause
        if self.realtime.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "realtime.poll_interval_ms".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // InfluxDB overrides
        if let Some(url) = var("TSBRIDGE_INFLUXDB_URL") {
            self.influxdb.url = url;
        }
        if let Some(database) = var("TSBRIDGE_INFLUXDB_DATABASE") {
            self.influxdb.database = Some(database);
        }

        // Realtime overrides
        if let Some(lag) = var("TSBRIDGE_REALTIME_MIN_LAG_MS") {
            self.realtime.min_lag_ms = lag.parse().map_err(|_| ConfigError::Env {
                key: "TSBRIDGE_REALTIME_MIN_LAG_MS".to_string(),
                value: lag,
            })?;
        }

        // Logging overrides
        if let Some(level) = var("TSBRIDGE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("TSBRIDGE_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid value {value:?} for {key}")]
    Env { key: String, value: String },

    #[error("Invalid {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::config(err.to_string())
    }
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# tsbridge Configuration
#
# Environment variables override these settings:
# - TSBRIDGE_INFLUXDB_URL
# - TSBRIDGE_INFLUXDB_DATABASE
# - TSBRIDGE_REALTIME_MIN_LAG_MS
# - TSBRIDGE_LOG_LEVEL
# - TSBRIDGE_LOG_FORMAT

[influxdb]
# InfluxDB HTTP API address
url = "http://localhost:8086"

# Default database when the search has no db= option
# database = "telegraf"

# Default retention policy when the search has no rp= option
# retention_policy = "autogen"

# Request timeout in seconds
request_timeout_secs = 300

# Points per chunk requested from InfluxDB
chunk_size = 10000

[realtime]
# How far behind the wall clock each real-time window ends (ms)
min_lag_ms = 1000

# Minimum time between two real-time window queries (ms)
poll_interval_ms = 1000

[protocol]
# Transport tag expected in every frame header
tag = "chunked 1.0"

# Largest accepted metadata section (bytes)
max_metadata_bytes = 8388608

# Largest accepted body section (bytes)
max_body_bytes = 67108864

[logging]
# Log level: trace, debug, info, warn, error
level = "warn"

# Log format: pretty or json
format = "pretty"

# Optional log file path; logs go to stderr when unset.
# stdout is reserved for the protocol.
# file = "/var/log/tsbridge/tsbridge.log"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.influxdb.url, "http://localhost:8086");
        assert_eq!(config.influxdb.database, None);
        assert_eq!(config.realtime.min_lag(), Duration::from_secs(1));
        assert_eq!(config.protocol.tag, "chunked 1.0");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_generated_config_parses_to_defaults() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        let defaults = Config::default();
        assert_eq!(config.influxdb.url, defaults.influxdb.url);
        assert_eq!(config.influxdb.chunk_size, defaults.influxdb.chunk_size);
        assert_eq!(config.realtime.poll_interval_ms, defaults.realtime.poll_interval_ms);
        assert_eq!(config.protocol.tag, defaults.protocol.tag);
        assert_eq!(config.protocol.max_metadata_bytes, defaults.protocol.max_metadata_bytes);
        assert_eq!(config.protocol.max_body_bytes, defaults.protocol.max_body_bytes);
        assert_eq!(config.logging.level, defaults.logging.level);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[influxdb]\nurl = \"http://influx:8086\"\ndatabase = \"telegraf\"\n\n[protocol]\ntag = \"v1\""
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.influxdb.url, "http://influx:8086");
        assert_eq!(config.influxdb.database.as_deref(), Some("telegraf"));
        assert_eq!(config.influxdb.chunk_size, 10_000);
        assert_eq!(config.protocol.codec().tag, "v1");
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(Config::load(&missing), Err(ConfigError::Io { .. })));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[influxdb\nurl = 1").unwrap();
        let err = Config::load(&bad).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        let err: Error = err.into();
        assert!(err.is(ErrorKind::Config));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TSBRIDGE_INFLUXDB_URL", "http://other:8086"),
            ("TSBRIDGE_INFLUXDB_DATABASE", "metrics"),
            ("TSBRIDGE_REALTIME_MIN_LAG_MS", "250"),
            ("TSBRIDGE_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.influxdb.url, "http://other:8086");
        assert_eq!(config.influxdb.database.as_deref(), Some("metrics"));
        assert_eq!(config.realtime.min_lag_ms, 250);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_invalid_override() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|key| {
                (key == "TSBRIDGE_REALTIME_MIN_LAG_MS").then(|| "soon".to_string())
            })
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[realtime]\npoll_interval_ms = 0").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { ref key, .. } if key == "realtime.poll_interval_ms"
        ));
        assert_eq!(
            err.to_string(),
            "Invalid realtime.poll_interval_ms: must be at least 1"
        );
        assert!(Config::load_with_env(file.path()).is_err());

        let err: Error = err.into();
        assert!(err.is(ErrorKind::Config));
        assert!(Config::default().validate().is_ok());
    }
}
