//! Chat transport capabilities and event types

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::slack::SlackError;

/// Who the bridge is on the chat service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub user_id: String,
    pub user_name: String,
    /// Set for bot tokens; bot-authored messages may carry this instead of
    /// a user id
    pub bot_id: Option<String>,
}

/// A channel visible to the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
}

/// A message posted in some channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub channel: String,
    /// Author, absent for some integration messages
    pub user: Option<String>,
    /// Posting bot, for `bot_message` subtypes
    pub bot_id: Option<String>,
    pub text: String,
}

/// Everything the chat event stream can deliver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// The stream (re)connected; carries the bridge's own user id
    Connected { self_id: String },
    /// A plain message in a channel
    Message(ChatMessage),
    /// The transport hit an error it cannot recover from
    Fatal(String),
    /// The credentials were rejected
    InvalidAuth,
    /// Any other event kind
    Ignored,
}

/// Live event stream; the producer handles its own reconnection
pub type ChatEventStream = mpsc::Receiver<ChatEvent>;

/// Team chat capabilities
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Check the credentials and learn the bridge's own identity
    async fn authenticate(&self) -> Result<BotIdentity, SlackError>;

    /// Every channel the bridge can see
    async fn list_channels(&self) -> Result<Vec<ChannelInfo>, SlackError>;

    /// Post `text` into `channel_id` as the bridge itself
    async fn post_message(&self, channel_id: &str, text: &str) -> Result<(), SlackError>;

    /// Open the live event stream
    async fn events(&self) -> Result<ChatEventStream, SlackError>;
}
