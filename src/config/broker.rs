//! Broker Configuration
//!
//! Connection settings for the MQTT side of the bridge.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the MQTT broker connection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker host name or IP address
    pub address: String,

    /// Broker TCP port
    pub port: u16,

    /// Client identifier presented in CONNECT
    pub client_id: String,

    /// Topic relayed in both directions
    pub topic: String,

    /// Username for authentication
    pub username: Option<String>,

    /// Password for authentication
    pub password: Option<String>,

    /// Keep-alive interval
    #[serde(with = "humantime_serde")]
    pub keep_alive: Duration,

    /// How long a publish waits for the broker to acknowledge it
    #[serde(with = "humantime_serde")]
    pub ack_timeout: Duration,

    /// Inbound messages buffered by the client before the socket is throttled
    pub inbound_depth: usize,

    /// Initial reconnect interval after a dropped connection
    #[serde(with = "humantime_serde")]
    pub reconnect_interval: Duration,

    /// Maximum reconnect interval (for exponential backoff)
    #[serde(with = "humantime_serde")]
    pub max_reconnect_interval: Duration,

    /// TCP connect and CONNACK timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

fn default_port() -> u16 {
    1883
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: default_port(),
            client_id: String::new(),
            topic: String::new(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(20),
            inbound_depth: 42,
            reconnect_interval: Duration::from_secs(1),
            max_reconnect_interval: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl BrokerConfig {
    /// `host:port` string for the TCP connect
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}
