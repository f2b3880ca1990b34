//! Configuration Module
//!
//! Provides TOML-based configuration for the bridge with support for:
//! - Broker connection settings
//! - Slack credentials and target channel
//! - Relay queue sizing and an optional startup timeout
//! - Environment variable overrides (BRIDGE__* prefix)
//!
//! The settings are read once at startup. Every required field is checked
//! here so the bridge core can assume a complete record.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use secrecy::ExposeSecret;
use serde::Deserialize;

pub use broker::BrokerConfig;
pub use chat::{ChatConfig, DEFAULT_API_URL};

mod broker;
mod chat;


/// Environment variable naming the settings file
pub const CONFIG_PATH_ENV: &str = "BRIDGE_CONFIG";

/// Settings file used when `BRIDGE_CONFIG` is not set
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")
        .map_err(|e| ConfigError::Validation(format!("env substitution pattern: {}", e)))?;
    Ok(re
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .to_string())
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error reading config file
    #[error("IO error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// TOML parsing error
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Config crate error
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// MQTT broker side
    pub broker: BrokerConfig,
    /// Slack side
    pub chat: ChatConfig,
    /// Relay queues and startup behaviour
    pub relay: RelayConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Relay configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Capacity of each direction's relay queue
    pub queue_capacity: usize,
    /// Fail startup if both connectors are not ready within this time
    #[serde(with = "humantime_serde")]
    pub startup_timeout: Option<Duration>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 23,
            startup_timeout: None,
        }
    }
}

impl Config {
    /// Path of the settings file: `$BRIDGE_CONFIG` or `config.toml`
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `BRIDGE__` prefix with double underscores for nesting:
    ///    - `BRIDGE__BROKER__TOPIC=home/chat` overrides `broker.topic`
    ///    - `BRIDGE__CHAT__SECRET=xoxb-...` overrides `chat.secret`
    ///
    /// A missing file is an error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::build(&substitute_env_vars(&content)?)
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn build(content: &str) -> Result<Self, ConfigError> {
        let builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("broker.port", 1883)?
            .set_default("relay.queue_capacity", 23)?
            .add_source(File::from_str(content, FileFormat::Toml));

        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("BRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("broker.address", self.broker.address.as_str()),
            ("broker.client_id", self.broker.client_id.as_str()),
            ("broker.topic", self.broker.topic.as_str()),
            ("chat.secret", self.chat.secret.expose_secret().as_str()),
            ("chat.channel", self.chat.channel.as_str()),
            ("chat.api_url", self.chat.api_url.as_str()),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!("{} is required", name)));
            }
        }

        // A bare "#" would leave nothing to match against
        if self.chat.channel.trim_start_matches('#').is_empty() {
            return Err(ConfigError::Validation(
                "chat.channel must name a channel".to_string(),
            ));
        }

        if self.broker.port == 0 {
            return Err(ConfigError::Validation(
                "broker.port must be non-zero".to_string(),
            ));
        }
        if self.broker.inbound_depth == 0 {
            return Err(ConfigError::Validation(
                "broker.inbound_depth must be greater than 0".to_string(),
            ));
        }
        if self.broker.ack_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "broker.ack_timeout must be greater than 0".to_string(),
            ));
        }
        if self.broker.keep_alive.as_secs() > u16::MAX as u64 {
            return Err(ConfigError::Validation(
                "broker.keep_alive must fit in 65535 seconds".to_string(),
            ));
        }
        if self.relay.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "relay.queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.relay.startup_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::Validation(
                "relay.startup_timeout must be greater than 0 when set".to_string(),
            ));
        }

        Ok(())
    }
}
