//! Bridge Errors
//!
//! Every variant here is fatal: the supervisor hands it back to `main`,
//! which logs it and terminates the process. Transient failures (a publish
//! acknowledgment timeout, a rejected chat post) never become a
//! `BridgeError`; the connectors log them and move on.

use crate::config::ConfigError;
use crate::mqtt::MqttError;
use crate::slack::SlackError;

/// Fatal bridge error
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Settings missing, unreadable or invalid
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    /// The broker could not be reached or refused the session
    #[error("broker connect failed: {0}")]
    BrokerConnect(#[source] MqttError),

    /// The broker rejected or never acknowledged the subscription
    #[error("broker subscribe to '{topic}' failed: {source}")]
    BrokerSubscribe {
        topic: String,
        #[source]
        source: MqttError,
    },

    /// The chat service rejected the credentials
    #[error("chat authentication failed: {0}")]
    ChatAuth(#[source] SlackError),

    /// Listing channels failed
    #[error("chat channel lookup failed: {0}")]
    ChannelLookup(#[source] SlackError),

    /// No visible channel carries the configured name
    #[error("chat channel '{0}' not found")]
    ChannelNotFound(String),

    /// The chat client could not be built or its event stream opened
    #[error("chat transport failed: {0}")]
    ChatTransport(#[source] SlackError),

    /// The chat event stream reported an unrecoverable error
    #[error("chat transport error: {0}")]
    ChatFatal(String),

    /// The chat service invalidated the credentials while running
    #[error("chat credentials are invalid")]
    ChatInvalidAuth,

    /// Connectors did not both become ready in time
    #[error("connectors not ready after {0:?}")]
    StartupTimeout(std::time::Duration),

    /// A connector task ended although connectors run forever
    #[error("{0} connector stopped")]
    ConnectorExited(&'static str),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
