//! Chat Configuration
//!
//! Settings for the Slack side of the bridge.

use std::time::Duration;

use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;

/// Default Slack Web API base URL
pub const DEFAULT_API_URL: &str = "https://slack.com/api";

/// Configuration for the Slack connection
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Bot token used for every Web API call
    pub secret: Secret<String>,

    /// Channel to bridge, with or without the leading `#`
    pub channel: String,

    /// Echo every received chat message to the log
    pub debug: bool,

    /// Web API base URL
    pub api_url: String,

    /// Initial reconnect interval for the event stream
    #[serde(with = "humantime_serde")]
    pub reconnect_interval: Duration,

    /// Maximum reconnect interval for the event stream
    #[serde(with = "humantime_serde")]
    pub max_reconnect_interval: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            secret: Secret::new(String::new()),
            channel: String::new(),
            debug: false,
            api_url: DEFAULT_API_URL.to_string(),
            reconnect_interval: Duration::from_secs(1),
            max_reconnect_interval: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatConfig")
            .field("secret", &"[REDACTED]")
            .field("channel", &self.channel)
            .field("debug", &self.debug)
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl ChatConfig {
    /// Placeholder for the token that is safe to log
    pub fn redacted_secret(&self) -> String {
        format!("[REDACTED; {} chars]", self.secret.expose_secret().len())
    }
}
