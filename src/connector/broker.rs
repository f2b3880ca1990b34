//! Broker-side connector

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tracing::{debug, info, warn};

use super::ConnectorLinks;
use crate::config::BrokerConfig;
use crate::error::BridgeError;
use crate::mqtt::{MqttClient, MqttError, MqttOptions, QoS};
use crate::relay::{RelayMessage, RelayReceiver, RelaySender};
use crate::transport::{BrokerTransport, InboundHandler, InboundMessage};

/// QoS used for the subscription and for every publish
pub const RELAY_QOS: QoS = QoS::ExactlyOnce;

/// Relays between one broker topic and the relay queues
pub struct BrokerConnector<T> {
    transport: Arc<T>,
    topic: String,
    ack_timeout: Duration,
}

impl BrokerConnector<MqttClient> {
    /// Open the MQTT session described by `config`
    pub async fn connect(config: &BrokerConfig) -> Result<Self, BridgeError> {
        let options = MqttOptions::from_config(config);
        info!(
            "MQTT: Connecting to {} as '{}'",
            options.address, options.client_id
        );
        let client = MqttClient::connect(options)
            .await
            .map_err(BridgeError::BrokerConnect)?;

        Ok(Self::new(
            Arc::new(client),
            config.topic.clone(),
            config.ack_timeout,
        ))
    }
}

impl<T: BrokerTransport> BrokerConnector<T> {
    pub fn new(transport: Arc<T>, topic: impl Into<String>, ack_timeout: Duration) -> Self {
        Self {
            transport,
            topic: topic.into(),
            ack_timeout,
        }
    }

    /// Subscribe, report ready, then publish until the queue closes.
    ///
    /// Returns only on failure: a refused subscription, or the chat side
    /// of the bridge going away.
    pub async fn run(self, links: ConnectorLinks) -> Result<(), BridgeError> {
        let ConnectorLinks {
            outbound: to_chat,
            inbound: to_broker,
            ready,
        } = links;

        self.subscribe(to_chat).await?;
        ready.signal();

        self.run_publish_loop(to_broker).await;
        Err(BridgeError::ConnectorExited("chat"))
    }

    /// Subscribe to the topic, enqueueing every received payload onto
    /// `to_chat`. Resolves once the broker acknowledged the subscription.
    pub async fn subscribe(&self, to_chat: RelaySender) -> Result<QoS, BridgeError> {
        let handler: InboundHandler = Arc::new(move |message: InboundMessage| {
            let to_chat = to_chat.clone();
            async move {
                debug!(
                    "MQTT: Received {} bytes on '{}'",
                    message.payload.len(),
                    message.topic
                );
                if to_chat.send(RelayMessage::new(message.payload)).await.is_err() {
                    warn!("MQTT: Chat relay closed, dropping message from '{}'", message.topic);
                }
            }
            .boxed()
        });

        let granted = self
            .transport
            .subscribe(&self.topic, RELAY_QOS, handler)
            .await
            .map_err(|source| BridgeError::BrokerSubscribe {
                topic: self.topic.clone(),
                source,
            })?;
        info!("MQTT: Subscribed to '{}' (granted {:?})", self.topic, granted);
        Ok(granted)
    }

    /// Publish every message from `to_broker` until the queue closes
    pub async fn run_publish_loop(&self, mut to_broker: RelayReceiver) {
        while let Some(message) = to_broker.recv().await {
            self.publish(message).await;
        }
        debug!("MQTT: {} queue closed", to_broker.name());
    }

    /// Publish one message and wait for the broker's acknowledgment.
    ///
    /// Failures are logged and the message is dropped; the caller moves on
    /// to the next message either way.
    async fn publish(&self, message: RelayMessage) {
        let token = match self
            .transport
            .publish(&self.topic, message.into_payload(), RELAY_QOS, false)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                warn!("MQTT: Publish to '{}' failed: {}", self.topic, e);
                return;
            }
        };

        let mid = token.packet_id();
        debug!("MQTT: Publishing (mid={:?})", mid);
        match token.wait_timeout(self.ack_timeout).await {
            Ok(()) => debug!("MQTT: Published (mid={:?})", mid),
            Err(MqttError::Timeout(_)) => {
                warn!("MQTT: Timeout waiting to publish (mid={:?})", mid)
            }
            Err(e) => warn!("MQTT: Publish (mid={:?}) not acknowledged: {}", mid, e),
        }
    }
}
