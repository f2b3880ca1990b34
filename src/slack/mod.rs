//! Slack Chat Transport
//!
//! Implements [`crate::transport::ChatTransport`] on top of the Slack Web
//! API (`auth.test`, `conversations.list`, `chat.postMessage`) and the RTM
//! websocket for the live event stream.
//!
//! The event stream reconnects on its own: a `goodbye` frame, a closed
//! socket or a failed `rtm.connect` all lead to a new `rtm.connect` after
//! a backoff. Rejected credentials end the stream with
//! [`ChatEvent::InvalidAuth`](crate::transport::ChatEvent::InvalidAuth).

mod api;
mod events;
mod rtm;

pub use api::SlackClient;
pub use events::{parse_frame, RtmFrame};

/// Error codes Slack uses for rejected credentials
const AUTH_ERRORS: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "account_inactive",
    "token_revoked",
    "token_expired",
];

/// Error type for Slack operations
#[derive(Debug, thiserror::Error)]
pub enum SlackError {
    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The API answered `ok: false`
    #[error("{method} failed: {error}")]
    Api { method: &'static str, error: String },
    /// The token was rejected
    #[error("invalid credentials")]
    InvalidAuth,
    /// Websocket failure on the RTM stream
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),
    /// Unexpected response body
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SlackError {
    /// Classify an `ok: false` response
    pub fn from_api(method: &'static str, error: &str) -> Self {
        if AUTH_ERRORS.contains(&error) {
            SlackError::InvalidAuth
        } else {
            SlackError::Api {
                method,
                error: error.to_string(),
            }
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SlackError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SlackError::WebSocket(Box::new(e))
    }
}
