//! Connectors
//!
//! A connector owns one side of the bridge. It connects its transport,
//! reports readiness once it can relay, then moves messages between the
//! transport and the two relay queues until something fatal happens.
//!
//! - [`BrokerConnector`]: subscribes to the configured topic, feeds the
//!   chat-bound queue and publishes everything from the broker-bound queue
//! - [`ChatConnector`]: resolves the configured channel, feeds the
//!   broker-bound queue and posts everything from the chat-bound queue

mod broker;
mod chat;

pub use broker::{BrokerConnector, RELAY_QOS};
pub use chat::{find_channel, ChannelIdentity, ChatConnector};

use crate::readiness::ReadySignal;
use crate::relay::{RelayReceiver, RelaySender};

/// The queue ends and readiness signal handed to one connector
#[derive(Debug)]
pub struct ConnectorLinks {
    /// Messages this connector received, bound for the other side
    pub outbound: RelaySender,
    /// Messages the other side received, to be delivered by this connector
    pub inbound: RelayReceiver,
    pub ready: ReadySignal,
}
