//! Chat-side connector

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::ConnectorLinks;
use crate::config::ChatConfig;
use crate::error::BridgeError;
use crate::relay::{RelayMessage, RelayReceiver, RelaySender};
use crate::slack::SlackClient;
use crate::transport::{ChannelInfo, ChatEvent, ChatEventStream, ChatMessage, ChatTransport};

/// Look up a channel by name. A single leading `#` on `name` is ignored.
pub fn find_channel<'a>(channels: &'a [ChannelInfo], name: &str) -> Option<&'a ChannelInfo> {
    let wanted = name.strip_prefix('#').unwrap_or(name);
    channels.iter().find(|channel| channel.name == wanted)
}

/// The bridged channel and the bridge's own user on the chat service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelIdentity {
    pub channel_id: String,
    pub channel_name: String,
    /// Unknown until the service told us who we are. While unknown only the
    /// channel filter applies.
    pub self_id: Option<String>,
    /// Bot id behind the bridge's token, if it is a bot token
    pub self_bot_id: Option<String>,
}

impl ChannelIdentity {
    /// Whether a message belongs on the broker: it was posted in the bridged
    /// channel by someone other than the bridge itself
    pub fn should_relay(&self, message: &ChatMessage) -> bool {
        if message.channel != self.channel_id {
            return false;
        }
        if let (Some(own), Some(bot)) = (&self.self_bot_id, &message.bot_id) {
            if own == bot {
                return false;
            }
        }
        match (&self.self_id, &message.user) {
            (Some(self_id), Some(user)) => user != self_id,
            _ => true,
        }
    }

    fn set_self_id(&mut self, self_id: String) {
        if self.self_id.as_deref() != Some(self_id.as_str()) {
            debug!("Slack: Own user id is {}", self_id);
            self.self_id = Some(self_id);
        }
    }
}

/// Relays between one chat channel and the relay queues
pub struct ChatConnector<T> {
    transport: Arc<T>,
    channel_name: String,
    debug: bool,
}

impl ChatConnector<SlackClient> {
    /// Build the Slack client described by `config`
    pub fn connect(config: &ChatConfig) -> Result<Self, BridgeError> {
        if config.debug {
            info!("Slack: Using secret {}", config.redacted_secret());
        }
        let client = SlackClient::new(config).map_err(BridgeError::ChatTransport)?;
        Ok(Self::new(Arc::new(client), config.channel.clone(), config.debug))
    }
}

impl<T: ChatTransport> ChatConnector<T> {
    pub fn new(transport: Arc<T>, channel_name: impl Into<String>, debug: bool) -> Self {
        Self {
            transport,
            channel_name: channel_name.into(),
            debug,
        }
    }

    /// Authenticate, resolve the channel, report ready, then relay in both
    /// directions until the event stream fails.
    pub async fn run(self, links: ConnectorLinks) -> Result<(), BridgeError> {
        let ConnectorLinks {
            outbound: to_broker,
            inbound: to_chat,
            ready,
        } = links;

        let mut identity = self.resolve().await?;
        ready.signal();

        let events = self
            .transport
            .events()
            .await
            .map_err(BridgeError::ChatTransport)?;

        let channel_id = identity.channel_id.clone();
        tokio::select! {
            result = self.run_event_loop(&mut identity, events, &to_broker) => result,
            () = self.run_send_loop(&channel_id, to_chat) => {
                Err(BridgeError::ConnectorExited("broker"))
            }
        }
    }

    /// Check the credentials and find the configured channel
    pub async fn resolve(&self) -> Result<ChannelIdentity, BridgeError> {
        let bot = self
            .transport
            .authenticate()
            .await
            .map_err(BridgeError::ChatAuth)?;
        info!("Slack: Authenticated as {} ({})", bot.user_name, bot.user_id);

        let channels = self
            .transport
            .list_channels()
            .await
            .map_err(BridgeError::ChannelLookup)?;
        let channel = find_channel(&channels, &self.channel_name)
            .ok_or_else(|| BridgeError::ChannelNotFound(self.channel_name.clone()))?;
        info!("Slack: Bridging channel #{} ({})", channel.name, channel.id);

        Ok(ChannelIdentity {
            channel_id: channel.id.clone(),
            channel_name: channel.name.clone(),
            self_id: Some(bot.user_id),
            self_bot_id: bot.bot_id,
        })
    }

    /// Post every message from `to_chat` into the channel until the queue
    /// closes. A failed post is logged and the message dropped.
    pub async fn run_send_loop(&self, channel_id: &str, mut to_chat: RelayReceiver) {
        while let Some(message) = to_chat.recv().await {
            if let Err(e) = self.transport.post_message(channel_id, &message.text()).await {
                warn!("Slack: Failed to post message: {}", e);
            }
        }
        debug!("Slack: {} queue closed", to_chat.name());
    }

    /// Consume the event stream, enqueueing channel messages onto
    /// `to_broker`. Only returns with an error.
    pub async fn run_event_loop(
        &self,
        identity: &mut ChannelIdentity,
        mut events: ChatEventStream,
        to_broker: &RelaySender,
    ) -> Result<(), BridgeError> {
        while let Some(event) = events.recv().await {
            match event {
                ChatEvent::Connected { self_id } => identity.set_self_id(self_id),
                ChatEvent::Message(message) => {
                    if self.debug {
                        info!("Slack: Message: {}", message.text);
                    }
                    if !identity.should_relay(&message) {
                        continue;
                    }
                    to_broker
                        .send(RelayMessage::from(message.text))
                        .await
                        .map_err(|_| BridgeError::ConnectorExited("broker"))?;
                }
                ChatEvent::Fatal(reason) => return Err(BridgeError::ChatFatal(reason)),
                ChatEvent::InvalidAuth => return Err(BridgeError::ChatInvalidAuth),
                ChatEvent::Ignored => {}
            }
        }
        Err(BridgeError::ChatFatal("event stream ended".to_string()))
    }
}
