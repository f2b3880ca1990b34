//! MQTT Broker Transport
//!
//! A small MQTT v3.1.1 client used as the bridge's broker transport. It
//! keeps one session to the broker alive: keep-alive pings, QoS 1/2
//! acknowledgment flows in both directions, and automatic reconnection
//! with re-subscription once the first connection has succeeded.
//!
//! Inbound messages pass through a bounded buffer (`inbound_depth`) to the
//! subscription handlers. A slow handler fills the buffer, which stops the
//! client reading from the socket until the handler catches up. Keep-alive
//! pings and outbound publishes go on meanwhile.

mod client;
mod codec;
mod packet;

#[cfg(test)]
mod tests;

pub use client::{ConnectionStatus, MqttClient, MqttOptions};
pub use codec::{DecodeError, Decoder, EncodeError, Encoder, DEFAULT_MAX_PACKET_SIZE};
pub use packet::{
    topic_matches_filter, ConnAck, Connect, ConnectReturnCode, Packet, Publish, QoS, SubAck,
    Subscribe, SUBACK_FAILURE,
};

/// Error type for broker transport operations
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    /// Socket-level failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The broker did not answer in time
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    /// CONNACK carried a non-zero return code
    #[error("connection refused: {0}")]
    Rejected(ConnectReturnCode),
    /// SUBACK refused the filter
    #[error("subscription to '{0}' refused")]
    SubscribeRejected(String),
    /// Connection dropped while the operation was outstanding
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    /// Broker sent something the session did not expect
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    /// The client session task is gone
    #[error("client closed")]
    Closed,
}
