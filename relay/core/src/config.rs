//! Relay Configuration
//!
//! Loads registry and stream defaults from an optional TOML file at
//! `~/.config/relay/relay.toml`, then lets environment variables override it.
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. CLI arguments (applied by the binary after loading)
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [registry]
//! max_connections = 100
//! run_stream_base_url = "https://agents.example.com/api/stream"
//!
//! [stream]
//! reconnect = true
//! max_reconnect_attempts = 5
//! reconnect_interval_ms = 1000
//! max_reconnect_interval_ms = 30000
//! connect_timeout_ms = 30000
//! with_credentials = true
//!
//! [http]
//! bearer_token = "..."
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Field |
//! |---|---|
//! | `RELAY_MAX_CONNECTIONS` | registry ceiling |
//! | `RELAY_STREAM_BASE_URL` | run stream base URL |
//! | `RELAY_RECONNECT` | `reconnect` (`0`/`false` disable) |
//! | `RELAY_MAX_RECONNECT_ATTEMPTS` | `max_reconnect_attempts` |
//! | `RELAY_RECONNECT_INTERVAL_MS` | `reconnect_interval` |
//! | `RELAY_MAX_RECONNECT_INTERVAL_MS` | `max_reconnect_interval` |
//! | `RELAY_CONNECT_TIMEOUT_MS` | `connect_timeout` |
//! | `RELAY_WITH_CREDENTIALS` | `with_credentials` |
//! | `RELAY_BEARER_TOKEN` | HTTP bearer token |
//!
//! Unparsable values are ignored.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::RegistryConfig;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[registry]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryToml {
    /// Ceiling on registered connections
    pub max_connections: Option<usize>,

    /// Base URL for run streams
    pub run_stream_base_url: Option<String>,
}

/// `[stream]` section: default options for new connections
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamToml {
    /// Whether to reconnect on transport errors
    pub reconnect: Option<bool>,

    /// Reconnect attempts before giving up
    pub max_reconnect_attempts: Option<u32>,

    /// Base reconnect delay in milliseconds
    pub reconnect_interval_ms: Option<u64>,

    /// Reconnect delay ceiling in milliseconds
    pub max_reconnect_interval_ms: Option<u64>,

    /// Connect timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,

    /// Whether requests carry credentials
    pub with_credentials: Option<bool>,
}

/// `[http]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpToml {
    /// Bearer token for credentialed requests
    pub bearer_token: Option<String>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayToml {
    /// Registry section
    pub registry: RegistryToml,

    /// Stream defaults section
    pub stream: StreamToml,

    /// HTTP transport section
    pub http: HttpToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved relay configuration
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Registry ceiling, run stream base URL and default stream options
    pub registry: RegistryConfig,

    /// Bearer token for the HTTP transport
    pub bearer_token: Option<String>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Highest-priority source that contributed a value
    source: ConfigSource,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            bearer_token: None,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RelayConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by environment variables, no file
    ///
    /// Falls back to defaults (with a warning) if the result does not validate.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        apply_env_config(&mut config, |key| std::env::var(key).ok());

        if let Err(e) = config.validate() {
            tracing::warn!(error = %e, "Ignoring invalid environment configuration");
            return Self::default();
        }
        config
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// `ConfigError::ValidationError` if the ceiling is zero or the base
    /// reconnect interval exceeds its ceiling.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registry.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections must be greater than 0".to_string(),
            ));
        }

        let options = &self.registry.default_options;
        if options.reconnect_interval > options.max_reconnect_interval {
            return Err(ConfigError::ValidationError(format!(
                "reconnect_interval ({:?}) exceeds max_reconnect_interval ({:?})",
                options.reconnect_interval, options.max_reconnect_interval
            )));
        }

        if self.registry.run_stream_base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "run_stream_base_url must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/relay/relay.toml` or
/// `~/.config/relay/relay.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("relay").join("relay.toml"))
}

/// Load configuration from the default file and the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be read or parsed,
/// or if the result does not validate. A missing file is not an error.
pub fn load_config() -> Result<RelayConfig, ConfigError> {
    load_config_from_path(default_config_path().as_deref())
}

/// Load configuration from a specific file and the environment
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or the result
/// does not validate.
pub fn load_config_from_path(path: Option<&Path>) -> Result<RelayConfig, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// Load with an injectable environment lookup
fn load_config_with<F>(path: Option<&Path>, lookup: F) -> Result<RelayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = RelayConfig::default();

    if let Some(config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.to_path_buf(),
                    source: e,
                })?;

            let toml_config: RelayToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.to_path_buf());
            config.source = ConfigSource::File;

            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, lookup);
    config.validate()?;
    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut RelayConfig, toml: &RelayToml) {
    if let Some(max) = toml.registry.max_connections {
        config.registry.max_connections = max;
    }
    if let Some(ref base) = toml.registry.run_stream_base_url {
        config.registry.run_stream_base_url = base.clone();
    }

    let options = &mut config.registry.default_options;
    if let Some(reconnect) = toml.stream.reconnect {
        options.reconnect = reconnect;
    }
    if let Some(attempts) = toml.stream.max_reconnect_attempts {
        options.max_reconnect_attempts = attempts;
    }
    if let Some(ms) = toml.stream.reconnect_interval_ms {
        options.reconnect_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.stream.max_reconnect_interval_ms {
        options.max_reconnect_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.stream.connect_timeout_ms {
        options.connect_timeout = Duration::from_millis(ms);
    }
    if let Some(with_credentials) = toml.stream.with_credentials {
        options.with_credentials = with_credentials;
    }

    if toml.http.bearer_token.is_some() {
        config.bearer_token = toml.http.bearer_token.clone();
    }
}

fn parse_flag(value: &str) -> bool {
    value != "0" && value.to_lowercase() != "false"
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut RelayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(n) = lookup("RELAY_MAX_CONNECTIONS").and_then(|v| v.parse::<usize>().ok()) {
        config.registry.max_connections = n;
        config.source = ConfigSource::Env;
    }
    if let Some(base) = lookup("RELAY_STREAM_BASE_URL") {
        config.registry.run_stream_base_url = base;
        config.source = ConfigSource::Env;
    }

    let options = &mut config.registry.default_options;
    let mut touched = false;
    if let Some(value) = lookup("RELAY_RECONNECT") {
        options.reconnect = parse_flag(&value);
        touched = true;
    }
    if let Some(n) = lookup("RELAY_MAX_RECONNECT_ATTEMPTS").and_then(|v| v.parse::<u32>().ok()) {
        options.max_reconnect_attempts = n;
        touched = true;
    }
    if let Some(ms) = lookup("RELAY_RECONNECT_INTERVAL_MS").and_then(|v| v.parse::<u64>().ok()) {
        options.reconnect_interval = Duration::from_millis(ms);
        touched = true;
    }
    if let Some(ms) = lookup("RELAY_MAX_RECONNECT_INTERVAL_MS").and_then(|v| v.parse::<u64>().ok())
    {
        options.max_reconnect_interval = Duration::from_millis(ms);
        touched = true;
    }
    if let Some(ms) = lookup("RELAY_CONNECT_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
        options.connect_timeout = Duration::from_millis(ms);
        touched = true;
    }
    if let Some(value) = lookup("RELAY_WITH_CREDENTIALS") {
        options.with_credentials = parse_flag(&value);
        touched = true;
    }

    if let Some(token) = lookup("RELAY_BEARER_TOKEN").filter(|t| !t.is_empty()) {
        config.bearer_token = Some(token);
        touched = true;
    }

    if touched {
        config.source = ConfigSource::Env;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_file() {
        let config = load_config_with(None, env(&[])).unwrap();
        assert_eq!(config.registry, RegistryConfig::default());
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.bearer_token.is_none());
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");

        let config = load_config_with(Some(&path), env(&[])).unwrap();
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_file_values_applied() {
        let file = write_config(
            r#"
[registry]
max_connections = 8
run_stream_base_url = "https://agents.test/api/stream"

[stream]
reconnect = false
reconnect_interval_ms = 250
connect_timeout_ms = 5000

[http]
bearer_token = "from-file"
"#,
        );

        let config = load_config_with(Some(file.path()), env(&[])).unwrap();
        assert_eq!(config.registry.max_connections, 8);
        assert_eq!(config.registry.run_stream_base_url, "https://agents.test/api/stream");
        assert!(!config.registry.default_options.reconnect);
        assert_eq!(
            config.registry.default_options.reconnect_interval,
            Duration::from_millis(250)
        );
        assert_eq!(
            config.registry.default_options.connect_timeout,
            Duration::from_secs(5)
        );
        assert_eq!(config.bearer_token.as_deref(), Some("from-file"));
        assert_eq!(config.source(), ConfigSource::File);
        assert_eq!(config.config_file_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_config("[registry]\nmax_connections = 8\n");

        let config = load_config_with(
            Some(file.path()),
            env(&[
                ("RELAY_MAX_CONNECTIONS", "3"),
                ("RELAY_RECONNECT", "false"),
                ("RELAY_MAX_RECONNECT_ATTEMPTS", "9"),
                ("RELAY_BEARER_TOKEN", "from-env"),
            ]),
        )
        .unwrap();

        assert_eq!(config.registry.max_connections, 3);
        assert!(!config.registry.default_options.reconnect);
        assert_eq!(config.registry.default_options.max_reconnect_attempts, 9);
        assert_eq!(config.bearer_token.as_deref(), Some("from-env"));
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_unparsable_env_ignored() {
        let config = load_config_with(
            None,
            env(&[
                ("RELAY_MAX_CONNECTIONS", "lots"),
                ("RELAY_CONNECT_TIMEOUT_MS", "-1"),
            ]),
        )
        .unwrap();

        assert_eq!(config.registry.max_connections, 100);
        assert_eq!(
            config.registry.default_options.connect_timeout,
            Duration::from_millis(30_000)
        );
    }

    #[test]
    fn test_invalid_toml() {
        let file = write_config("[registry\nmax_connections = ");
        let result = load_config_with(Some(file.path()), env(&[]));
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_validation() {
        let result = load_config_with(None, env(&[("RELAY_MAX_CONNECTIONS", "0")]));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));

        let result = load_config_with(
            None,
            env(&[
                ("RELAY_RECONNECT_INTERVAL_MS", "5000"),
                ("RELAY_MAX_RECONNECT_INTERVAL_MS", "1000"),
            ]),
        );
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_config_source_display() {
        assert_eq!(ConfigSource::Cli.to_string(), "CLI");
        assert_eq!(ConfigSource::Env.to_string(), "environment");
    }
}
