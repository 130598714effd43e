//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::TokenIdentity;
use crate::event::KIND_JOB;
use crate::permission::GroupGrant;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub permissions: Vec<GroupGrant>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP / WebSocket server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Upgrades are refused once this many sessions are live
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_max_connections() -> usize {
    1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Broker actor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Capacity of the inbound event queue
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,

    /// How often the live session gauge is sampled (seconds)
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,
}

fn default_inbound_capacity() -> usize {
    1024
}

fn default_metrics_interval() -> u64 {
    10
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: default_inbound_capacity(),
            metrics_interval_secs: default_metrics_interval(),
        }
    }
}

impl BrokerConfig {
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs.max(1))
    }
}

/// Pub/sub bridge configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Pub/sub channel the control plane publishes events on
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Polling cadence (ms); at most one message is pulled per tick
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Event kinds that are never forwarded
    #[serde(default = "default_suppressed_kinds")]
    pub suppressed_kinds: Vec<String>,
}

fn default_channel() -> String {
    "events_pubsub".to_string()
}

fn default_poll_interval() -> u64 {
    50
}

fn default_suppressed_kinds() -> Vec<String> {
    vec![KIND_JOB.to_string()]
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            poll_interval_ms: default_poll_interval(),
            suppressed_kinds: default_suppressed_kinds(),
        }
    }
}

impl BridgeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Viewer authentication configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: Vec<TokenIdentity>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
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

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from the first default location that exists, else environment only.
    ///
    /// A file that exists but cannot be read or parsed is an error rather
    /// than a silent fallback to defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("pipewatch").join("config.toml")),
            Some(PathBuf::from("/etc/pipewatch/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];
        Self::load_first(config_paths.iter().flatten())
    }

    fn load_first<'a>(paths: impl IntoIterator<Item = &'a PathBuf>) -> Result<Self, ConfigError> {
        for path in paths {
            if path.exists() {
                let config = Self::load_with_env(path)?;
                tracing::info!("Loaded config from {:?}", path);
                return Ok(config);
            }
        }

        tracing::info!("Using default config with environment overrides");
        Ok(Self::from_env())
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("PIPEWATCH_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_parse("PIPEWATCH_PORT") {
            self.server.port = port;
        }
        if let Some(max) = env_parse("PIPEWATCH_MAX_CONNECTIONS") {
            self.server.max_connections = max;
        }

        if let Ok(channel) = std::env::var("PIPEWATCH_CHANNEL") {
            self.bridge.channel = channel;
        }
        if let Some(interval) = env_parse("PIPEWATCH_POLL_INTERVAL_MS") {
            self.bridge.poll_interval_ms = interval;
        }

        if let Ok(level) = std::env::var("PIPEWATCH_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("PIPEWATCH_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Pipewatch Configuration
#
# Environment variables override these settings:
# - PIPEWATCH_HOST
# - PIPEWATCH_PORT
# - PIPEWATCH_MAX_CONNECTIONS
# - PIPEWATCH_CHANNEL
# - PIPEWATCH_POLL_INTERVAL_MS
# - PIPEWATCH_LOG_LEVEL
# - PIPEWATCH_LOG_FORMAT

[server]
# Bind address
host = "0.0.0.0"
port = 8081

# Upgrades are refused with 503 once this many viewers are connected
max_connections = 1000

# Allowed CORS origins (empty = permissive)
cors_origins = []

[broker]
# Capacity of the inbound event queue
inbound_capacity = 1024

# Live session gauge sampling interval (seconds)
metrics_interval_secs = 10

[bridge]
# Pub/sub channel the control plane publishes events on
channel = "events_pubsub"

# Polling cadence (ms); one message is pulled per tick
poll_interval_ms = 50

# Event kinds that are never forwarded to viewers
suppressed_kinds = ["sdk.EventJob"]

# Bearer tokens accepted on the /ws upgrade
# [[auth.tokens]]
# token = "change-me"
# username = "alice"
# groups = ["devs"]
# role = "user"          # user | maintainer | admin
# favorites = [{ project_key = "PROJ", workflow_name = "build" }]

# Group grants consulted by the permission oracle
# [[permissions]]
# group = "devs"
# project_key = "PROJ"
# level = "read"         # none | read | read_execute | read_write_execute
#
# [[permissions]]
# group = "devs"
# project_key = "PROJ"
# workflow_name = "deploy"
# level = "read_execute"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{PermissionLevel, Role};
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.bridge.channel, "events_pubsub");
        assert_eq!(config.bridge.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.bridge.suppressed_kinds, vec!["sdk.EventJob"]);
        assert_eq!(config.broker.metrics_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_generated_config_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.server.addr(), "0.0.0.0:8081");
        assert_eq!(config.broker.inbound_capacity, 1024);
        assert!(config.auth.tokens.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
port = 9000

[[auth.tokens]]
token = "t1"
username = "alice"
groups = ["devs"]
role = "maintainer"

[[permissions]]
group = "devs"
project_key = "P1"
workflow_name = "deploy"
level = "read_execute"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.auth.tokens.len(), 1);
        assert_eq!(config.auth.tokens[0].role, Role::Maintainer);
        assert_eq!(config.permissions[0].level, PermissionLevel::ReadExecute);
        assert_eq!(config.permissions[0].workflow_name.as_deref(), Some("deploy"));
    }

    #[test]
    fn test_first_existing_default_location_wins() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let present = dir.path().join("config.toml");
        std::fs::write(&present, "[server]\nport = 9100\n").unwrap();

        let config = Config::load_first([&missing, &present]).unwrap();
        assert_eq!(config.server.port, 9100);
    }

    #[test]
    fn test_invalid_file_at_default_location_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("config.toml");
        let valid = dir.path().join("valid.toml");
        std::fs::write(&broken, "[server\nport = ").unwrap();
        std::fs::write(&valid, "[server]\nport = 9100\n").unwrap();

        let result = Config::load_first([&broken, &valid]);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_no_default_location_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let config = Config::load_first([&missing]).unwrap();
        assert!(config.auth.tokens.is_empty());
    }

    #[test]
    fn test_load_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[server\nport = ").unwrap();
        let result = Config::load(file.path());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));

        let missing = Config::load(Path::new("/nonexistent/pipewatch.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
