//! Supervisor
//!
//! Wires the two relay queues and the readiness barrier between the
//! connectors, starts both connector tasks and watches them. Connectors run
//! forever, so the supervisor only ever returns the error that stopped one
//! of them; the other task is aborted on the way out.

use std::future::Future;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info};

use crate::config::{BrokerConfig, ChatConfig, Config, RelayConfig};
use crate::connector::{BrokerConnector, ChatConnector, ConnectorLinks};
use crate::error::BridgeError;
use crate::readiness::ReadinessBarrier;
use crate::relay::relay_queue;

const BROKER: &str = "broker";
const CHAT: &str = "chat";

/// Aborts the wrapped task when dropped
struct TaskGuard(JoinHandle<Result<(), BridgeError>>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs the two connectors against a shared pair of relay queues
#[derive(Debug, Clone)]
pub struct Supervisor {
    queue_capacity: usize,
    startup_timeout: Option<Duration>,
}

impl Supervisor {
    pub fn new(relay: &RelayConfig) -> Self {
        Self {
            queue_capacity: relay.queue_capacity,
            startup_timeout: relay.startup_timeout,
        }
    }

    /// Start both connector units and supervise them.
    ///
    /// `broker` and `chat` receive their [`ConnectorLinks`] and must run
    /// until failure. Logs "Ready" once both have signalled readiness.
    /// Returns the first fatal error from either unit.
    pub async fn run<B, BF, C, CF>(&self, broker: B, chat: C) -> BridgeError
    where
        B: FnOnce(ConnectorLinks) -> BF,
        BF: Future<Output = Result<(), BridgeError>> + Send + 'static,
        C: FnOnce(ConnectorLinks) -> CF,
        CF: Future<Output = Result<(), BridgeError>> + Send + 'static,
    {
        let (to_chat_tx, to_chat_rx) = relay_queue("to_chat", self.queue_capacity);
        let (to_broker_tx, to_broker_rx) = relay_queue("to_broker", self.queue_capacity);
        let (barrier, [broker_ready, chat_ready]) = ReadinessBarrier::new([BROKER, CHAT]);

        let mut broker_task = TaskGuard(tokio::spawn(broker(ConnectorLinks {
            outbound: to_chat_tx,
            inbound: to_broker_rx,
            ready: broker_ready,
        })));
        let mut chat_task = TaskGuard(tokio::spawn(chat(ConnectorLinks {
            outbound: to_broker_tx,
            inbound: to_chat_rx,
            ready: chat_ready,
        })));

        let startup = async {
            match self.startup_timeout {
                Some(limit) => {
                    if barrier.wait_timeout(limit).await {
                        Ok(())
                    } else {
                        Err(BridgeError::StartupTimeout(limit))
                    }
                }
                None => {
                    barrier.wait().await;
                    Ok(())
                }
            }
        };

        tokio::select! {
            result = startup => match result {
                Ok(()) => info!("Ready"),
                Err(e) => return e,
            },
            result = &mut broker_task.0 => return unit_stopped(BROKER, result),
            result = &mut chat_task.0 => return unit_stopped(CHAT, result),
        }

        tokio::select! {
            result = &mut broker_task.0 => unit_stopped(BROKER, result),
            result = &mut chat_task.0 => unit_stopped(CHAT, result),
        }
    }
}

/// Turn a finished connector task into the error that ends the bridge
fn unit_stopped(
    unit: &'static str,
    result: Result<Result<(), BridgeError>, JoinError>,
) -> BridgeError {
    match result {
        Ok(Err(e)) => e,
        Ok(Ok(())) => BridgeError::ConnectorExited(unit),
        Err(e) => {
            error!("{} connector task failed: {}", unit, e);
            BridgeError::ConnectorExited(unit)
        }
    }
}

/// Run the MQTT/Slack bridge described by `config` until a fatal error
pub async fn run(config: Config) -> BridgeError {
    let Config {
        broker,
        chat,
        relay,
        ..
    } = config;

    Supervisor::new(&relay)
        .run(
            move |links| run_broker(broker, links),
            move |links| run_chat(chat, links),
        )
        .await
}

async fn run_broker(config: BrokerConfig, links: ConnectorLinks) -> Result<(), BridgeError> {
    BrokerConnector::connect(&config).await?.run(links).await
}

async fn run_chat(config: ChatConfig, links: ConnectorLinks) -> Result<(), BridgeError> {
    ChatConnector::connect(&config)?.run(links).await
}
