//! Transport Abstraction
//!
//! The capabilities the connectors need from each side of the bridge. The
//! MQTT client ([`crate::mqtt::MqttClient`]) and the Slack client
//! ([`crate::slack::SlackClient`]) implement these traits; the connectors
//! only ever see the traits, which keeps them testable with in-memory
//! transports.

mod chat;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::sync::oneshot;

use crate::mqtt::{MqttError, QoS};

pub use chat::{
    BotIdentity, ChannelInfo, ChatEvent, ChatEventStream, ChatMessage, ChatTransport,
};

/// A message received on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

/// Callback for messages on a subscribed topic.
///
/// The transport awaits the returned future before delivering the next
/// message, so a handler that waits applies backpressure to the broker.
pub type InboundHandler = Arc<dyn Fn(InboundMessage) -> BoxFuture<'static, ()> + Send + Sync>;

/// Completion of a publish, resolved when the broker finishes the QoS flow
#[derive(Debug)]
pub struct PublishToken {
    packet_id: Option<u16>,
    ack: oneshot::Receiver<Result<(), MqttError>>,
}

impl PublishToken {
    pub fn new(packet_id: Option<u16>, ack: oneshot::Receiver<Result<(), MqttError>>) -> Self {
        Self { packet_id, ack }
    }

    /// A token that is already acknowledged
    pub fn acknowledged(packet_id: Option<u16>) -> Self {
        let (tx, ack) = oneshot::channel();
        let _ = tx.send(Ok(()));
        Self { packet_id, ack }
    }

    /// Packet identifier of the publish, `None` for QoS 0
    pub fn packet_id(&self) -> Option<u16> {
        self.packet_id
    }

    /// Wait for the broker's acknowledgment
    pub async fn wait(self) -> Result<(), MqttError> {
        self.ack.await.unwrap_or(Err(MqttError::Closed))
    }

    /// Wait for the broker's acknowledgment for at most `limit`
    pub async fn wait_timeout(self, limit: Duration) -> Result<(), MqttError> {
        tokio::time::timeout(limit, self.wait())
            .await
            .map_err(|_| MqttError::Timeout("publish acknowledgment"))?
    }
}

/// Publish/subscribe broker capabilities
///
/// Connecting is left to the implementation's constructor; a value of this
/// trait is always an established session that reconnects on its own.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Subscribe to `filter`, resolving with the granted QoS once the broker
    /// acknowledged the subscription
    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        handler: InboundHandler,
    ) -> Result<QoS, MqttError>;

    /// Queue a publish and return the token tracking its acknowledgment
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<PublishToken, MqttError>;
}
