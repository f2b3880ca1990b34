//! mqtt-slack-bridge - relay messages between an MQTT topic and a Slack channel
//!
//! Everything published on the configured topic is posted into the
//! configured channel, and everything said in the channel (except by the
//! bridge itself) is published on the topic.

pub mod config;
pub mod connector;
pub mod error;
pub mod mqtt;
pub mod readiness;
pub mod relay;
pub mod slack;
pub mod supervisor;
pub mod transport;

pub use config::Config;
pub use connector::{BrokerConnector, ChatConnector, ConnectorLinks};
pub use error::BridgeError;
pub use mqtt::{MqttClient, MqttError, MqttOptions, QoS};
pub use readiness::{ReadinessBarrier, ReadySignal};
pub use relay::{relay_queue, RelayMessage, RelayReceiver, RelaySender};
pub use slack::{SlackClient, SlackError};
pub use supervisor::Supervisor;
pub use transport::{BrokerTransport, ChatTransport};
