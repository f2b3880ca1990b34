//! MQTT Client Session
//!
//! Connects to the broker and runs the session task. The public
//! [`MqttClient`] handle only talks to that task through a command channel.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use super::codec::{Decoder, Encoder};
use super::packet::{
    topic_matches_filter, Connect, ConnectReturnCode, Packet, Publish, QoS, Subscribe,
};
use super::MqttError;
use crate::config::BrokerConfig;
use crate::transport::{BrokerTransport, InboundHandler, InboundMessage, PublishToken};

/// Commands buffered between the client handle and the session task
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Connection settings for [`MqttClient`]
#[derive(Debug, Clone)]
pub struct MqttOptions {
    /// `host:port` of the broker
    pub address: String,
    pub client_id: String,
    pub keep_alive: Duration,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Inbound messages buffered ahead of the handlers
    pub inbound_depth: usize,
    pub reconnect_interval: Duration,
    pub max_reconnect_interval: Duration,
    pub connect_timeout: Duration,
}

impl MqttOptions {
    pub fn new(address: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            client_id: client_id.into(),
            keep_alive: Duration::from_secs(10),
            username: None,
            password: None,
            inbound_depth: 42,
            reconnect_interval: Duration::from_secs(1),
            max_reconnect_interval: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            address: config.socket_address(),
            client_id: config.client_id.clone(),
            keep_alive: config.keep_alive,
            username: config.username.clone(),
            password: config.password.clone(),
            inbound_depth: config.inbound_depth,
            reconnect_interval: config.reconnect_interval,
            max_reconnect_interval: config.max_reconnect_interval,
            connect_timeout: config.connect_timeout,
        }
    }

    fn keep_alive_secs(&self) -> u16 {
        self.keep_alive.as_secs().min(u16::MAX as u64) as u16
    }
}

/// Status of the broker session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Connected and operational
    Connected,
    /// Connection lost, waiting before the next attempt
    Backoff,
    /// Session ended after every client handle was dropped
    Disconnected,
}

/// Packet identifiers shared by the handle (publishes) and the task (subscribes)
#[derive(Debug)]
struct PacketIds(AtomicU16);

impl PacketIds {
    fn new() -> Self {
        Self(AtomicU16::new(1))
    }

    /// Next non-zero packet identifier
    fn next(&self) -> u16 {
        let id = self.0.fetch_add(1, Ordering::SeqCst);
        if id == 0 {
            self.0.fetch_add(1, Ordering::SeqCst)
        } else {
            id
        }
    }
}

enum Command {
    Publish {
        publish: Publish,
        done: oneshot::Sender<Result<(), MqttError>>,
    },
    Subscribe {
        filter: String,
        qos: QoS,
        handler: InboundHandler,
        done: oneshot::Sender<Result<QoS, MqttError>>,
    },
}

#[derive(Clone)]
struct Subscription {
    filter: String,
    qos: QoS,
    handler: InboundHandler,
}

type Subscriptions = Arc<RwLock<Vec<Subscription>>>;

struct PendingSubscribe {
    filter: String,
    done: Option<oneshot::Sender<Result<QoS, MqttError>>>,
}

type PublishDone = oneshot::Sender<Result<(), MqttError>>;

/// Outbound QoS 1/2 publishes waiting for PUBACK / PUBCOMP
#[derive(Default)]
struct Inflight(HashMap<u16, PublishDone>);

impl Inflight {
    fn insert(&mut self, packet_id: u16, done: PublishDone) {
        // Nobody waits on a token that was dropped or timed out
        self.0.retain(|_, done| !done.is_closed());
        if self.0.insert(packet_id, done).is_some() {
            warn!("MQTT: Packet id {} reused while still in flight", packet_id);
        }
    }

    fn complete(&mut self, packet_id: u16) {
        if let Some(done) = self.0.remove(&packet_id) {
            let _ = done.send(Ok(()));
        }
    }

    fn fail_all(&mut self) {
        for (_, done) in self.0.drain() {
            let _ = done.send(Err(MqttError::ConnectionLost(
                "publish not acknowledged before disconnect".to_string(),
            )));
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.0.len()
    }
}

/// An inbound message waiting for room in the dispatcher buffer, with the
/// acknowledgment to send once it is handed over
struct Delivery {
    message: InboundMessage,
    ack: Option<Packet>,
}

/// Read half of a broker connection with its reassembly buffer
struct PacketReader {
    half: OwnedReadHalf,
    buf: BytesMut,
    decoder: Decoder,
}

impl PacketReader {
    /// Next complete packet. Cancel-safe: partial reads stay buffered.
    async fn next_packet(&mut self) -> Result<Packet, MqttError> {
        loop {
            if let Some((packet, consumed)) = self.decoder.decode(&self.buf)? {
                let _ = self.buf.split_to(consumed);
                return Ok(packet);
            }
            let n = self.half.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(MqttError::ConnectionLost("connection closed by broker".to_string()));
            }
        }
    }
}

/// Write half of a broker connection
struct PacketWriter {
    half: OwnedWriteHalf,
    buf: BytesMut,
    encoder: Encoder,
}

impl PacketWriter {
    async fn send(&mut self, packet: &Packet) -> Result<(), MqttError> {
        self.buf.clear();
        self.encoder.encode(packet, &mut self.buf)?;
        self.half.write_all(&self.buf).await?;
        Ok(())
    }
}

/// Open the TCP connection and complete the CONNECT / CONNACK exchange
async fn open(options: &MqttOptions) -> Result<(PacketReader, PacketWriter), MqttError> {
    let stream = timeout(options.connect_timeout, TcpStream::connect(&options.address))
        .await
        .map_err(|_| MqttError::Timeout("TCP connect"))??;
    stream.set_nodelay(true)?;

    let (read_half, write_half) = stream.into_split();
    let mut reader = PacketReader {
        half: read_half,
        buf: BytesMut::with_capacity(4096),
        decoder: Decoder::new(),
    };
    let mut writer = PacketWriter {
        half: write_half,
        buf: BytesMut::with_capacity(1024),
        encoder: Encoder::new(),
    };

    writer
        .send(&Packet::Connect(Connect {
            client_id: options.client_id.clone(),
            clean_session: true,
            keep_alive: options.keep_alive_secs(),
            username: options.username.clone(),
            password: options.password.as_ref().map(|p| Bytes::from(p.clone())),
        }))
        .await?;
    debug!("MQTT: CONNECT sent to {}", options.address);

    let packet = timeout(options.connect_timeout, reader.next_packet())
        .await
        .map_err(|_| MqttError::Timeout("CONNACK"))??;

    match packet {
        Packet::ConnAck(ack) if ack.return_code == ConnectReturnCode::Accepted => {
            info!(
                "MQTT: Connected to {} as '{}' (session_present={})",
                options.address, options.client_id, ack.session_present
            );
            Ok((reader, writer))
        }
        Packet::ConnAck(ack) => Err(MqttError::Rejected(ack.return_code)),
        other => Err(MqttError::Protocol(format!(
            "expected CONNACK, got {}",
            other.name()
        ))),
    }
}

/// MQTT client handle
///
/// Cheap to share behind an `Arc`; dropping every handle ends the session
/// with a DISCONNECT.
pub struct MqttClient {
    command_tx: mpsc::Sender<Command>,
    status: Arc<RwLock<ConnectionStatus>>,
    packet_ids: Arc<PacketIds>,
}

impl MqttClient {
    /// Connect to the broker and spawn the session task.
    ///
    /// Only this first connection attempt reports failure to the caller;
    /// later disconnects are retried in the background.
    pub async fn connect(options: MqttOptions) -> Result<Self, MqttError> {
        let (reader, writer) = open(&options).await?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(options.inbound_depth.max(1));
        let status = Arc::new(RwLock::new(ConnectionStatus::Connected));
        let packet_ids = Arc::new(PacketIds::new());
        let subscriptions: Subscriptions = Arc::new(RwLock::new(Vec::new()));

        tokio::spawn(dispatch_inbound(inbound_rx, subscriptions.clone()));

        let session = Session {
            options,
            status: status.clone(),
            packet_ids: packet_ids.clone(),
            command_rx,
            inbound_tx,
            subscriptions,
            pending_subscribes: HashMap::new(),
            inflight: Inflight::default(),
            awaiting_release: HashSet::new(),
            delivery: None,
        };
        tokio::spawn(session.connection_loop(reader, writer));

        Ok(Self {
            command_tx,
            status,
            packet_ids,
        })
    }

    /// Get the current connection status
    pub fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }
}

#[async_trait]
impl BrokerTransport for MqttClient {
    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        handler: InboundHandler,
    ) -> Result<QoS, MqttError> {
        let (done, ack) = oneshot::channel();
        self.command_tx
            .send(Command::Subscribe {
                filter: filter.to_string(),
                qos,
                handler,
                done,
            })
            .await
            .map_err(|_| MqttError::Closed)?;
        ack.await.map_err(|_| MqttError::Closed)?
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<PublishToken, MqttError> {
        let packet_id = (qos != QoS::AtMostOnce).then(|| self.packet_ids.next());
        let (done, ack) = oneshot::channel();
        self.command_tx
            .send(Command::Publish {
                publish: Publish {
                    dup: false,
                    qos,
                    retain,
                    topic: topic.to_string(),
                    packet_id,
                    payload,
                },
                done,
            })
            .await
            .map_err(|_| MqttError::Closed)?;
        Ok(PublishToken::new(packet_id, ack))
    }
}

/// Deliver buffered inbound messages to every matching handler, in order
async fn dispatch_inbound(
    mut inbound_rx: mpsc::Receiver<InboundMessage>,
    subscriptions: Subscriptions,
) {
    while let Some(message) = inbound_rx.recv().await {
        // Collect handlers first to avoid holding the lock across await
        let handlers: Vec<InboundHandler> = subscriptions
            .read()
            .iter()
            .filter(|s| topic_matches_filter(&message.topic, &s.filter))
            .map(|s| s.handler.clone())
            .collect();

        if handlers.is_empty() {
            debug!("MQTT: No handler for message on '{}'", message.topic);
            continue;
        }
        for handler in handlers {
            handler(message.clone()).await;
        }
    }
}

/// State owned by the session task
struct Session {
    options: MqttOptions,
    status: Arc<RwLock<ConnectionStatus>>,
    packet_ids: Arc<PacketIds>,
    command_rx: mpsc::Receiver<Command>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    subscriptions: Subscriptions,
    /// SUBSCRIBE packets waiting for their SUBACK
    pending_subscribes: HashMap<u16, PendingSubscribe>,
    inflight: Inflight,
    /// Inbound QoS 2 packet ids delivered but not yet released
    awaiting_release: HashSet<u16>,
    /// Set while the dispatcher buffer is full; socket reads pause until
    /// it is handed over
    delivery: Option<Delivery>,
}

impl Session {
    async fn connection_loop(mut self, reader: PacketReader, writer: PacketWriter) {
        let mut connection = Some((reader, writer));

        loop {
            let (reader, writer) = match connection.take() {
                Some(c) => c,
                None => self.reconnect().await,
            };
            *self.status.write() = ConnectionStatus::Connected;

            match self.run(reader, writer).await {
                Ok(()) => {
                    info!("MQTT: Disconnected gracefully");
                    *self.status.write() = ConnectionStatus::Disconnected;
                    return;
                }
                Err(e) => {
                    warn!("MQTT: Connection to {} lost: {}", self.options.address, e);
                    *self.status.write() = ConnectionStatus::Backoff;
                    self.fail_outstanding();
                }
            }
        }
    }

    /// Reconnect with exponential backoff and restore subscriptions
    async fn reconnect(&mut self) -> (PacketReader, PacketWriter) {
        let mut retry_interval = self.options.reconnect_interval;
        loop {
            debug!("MQTT: Reconnecting in {:?}", retry_interval);
            tokio::time::sleep(retry_interval).await;

            match open(&self.options).await {
                Ok((reader, mut writer)) => match self.resubscribe(&mut writer).await {
                    Ok(()) => return (reader, writer),
                    Err(e) => warn!("MQTT: Resubscribe failed: {}", e),
                },
                Err(e) => warn!("MQTT: Reconnect to {} failed: {}", self.options.address, e),
            }
            retry_interval = std::cmp::min(retry_interval * 2, self.options.max_reconnect_interval);
        }
    }

    async fn resubscribe(&mut self, writer: &mut PacketWriter) -> Result<(), MqttError> {
        let filters: Vec<(String, QoS)> = self
            .subscriptions
            .read()
            .iter()
            .map(|s| (s.filter.clone(), s.qos))
            .collect();

        for (filter, qos) in filters {
            let packet_id = self.packet_ids.next();
            writer
                .send(&Packet::Subscribe(Subscribe {
                    packet_id,
                    filters: vec![(filter.clone(), qos)],
                }))
                .await?;
            self.pending_subscribes
                .insert(packet_id, PendingSubscribe { filter, done: None });
        }
        Ok(())
    }

    /// Resolve everything still waiting on the lost connection
    fn fail_outstanding(&mut self) {
        self.inflight.fail_all();
        for (_, pending) in self.pending_subscribes.drain() {
            if let Some(done) = pending.done {
                self.subscriptions.write().retain(|s| s.filter != pending.filter);
                let _ = done.send(Err(MqttError::ConnectionLost(
                    "subscription not acknowledged before disconnect".to_string(),
                )));
            }
        }
        self.awaiting_release.clear();
        // Still delivered, but its acknowledgment belonged to the old connection
        if let Some(delivery) = self.delivery.as_mut() {
            delivery.ack = None;
        }
    }

    /// Run one connection until it fails or every client handle is dropped
    async fn run(
        &mut self,
        mut reader: PacketReader,
        mut writer: PacketWriter,
    ) -> Result<(), MqttError> {
        let keep_alive = self.options.keep_alive.max(Duration::from_secs(1));
        let pings_enabled = !self.options.keep_alive.is_zero();
        let mut keepalive_timer = tokio::time::interval_at(Instant::now() + keep_alive, keep_alive);
        let mut awaiting_pingresp = false;
        let inbound_tx = self.inbound_tx.clone();

        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(command, &mut writer).await?,
                        None => {
                            let _ = writer.send(&Packet::Disconnect).await;
                            return Ok(());
                        }
                    }
                }

                packet = reader.next_packet(), if self.delivery.is_none() => {
                    let packet = packet?;
                    // Any packet from the broker shows the connection is alive
                    awaiting_pingresp = false;
                    if packet != Packet::PingResp {
                        self.handle_packet(packet, &mut writer).await?;
                    }
                }

                permit = inbound_tx.reserve(), if self.delivery.is_some() => {
                    if let Some(Delivery { message, ack }) = self.delivery.take() {
                        match permit {
                            Ok(permit) => permit.send(message),
                            Err(_) => debug!("MQTT: Inbound dispatcher gone, message dropped"),
                        }
                        if let Some(ack) = ack {
                            writer.send(&ack).await?;
                        }
                    }
                }

                _ = keepalive_timer.tick(), if pings_enabled => {
                    if awaiting_pingresp {
                        return Err(MqttError::Timeout("PINGRESP"));
                    }
                    writer.send(&Packet::PingReq).await?;
                    // A PINGRESP cannot be read while delivery is paused
                    awaiting_pingresp = self.delivery.is_none();
                }
            }
        }
    }

    async fn handle_command(
        &mut self,
        command: Command,
        writer: &mut PacketWriter,
    ) -> Result<(), MqttError> {
        match command {
            Command::Publish { publish, done } => {
                debug!(
                    "MQTT: PUBLISH '{}' (mid={:?}, qos={:?})",
                    publish.topic, publish.packet_id, publish.qos
                );
                let packet_id = publish.packet_id;
                writer.send(&Packet::Publish(publish)).await?;
                match packet_id {
                    Some(id) => {
                        self.inflight.insert(id, done);
                    }
                    None => {
                        let _ = done.send(Ok(()));
                    }
                }
            }
            Command::Subscribe {
                filter,
                qos,
                handler,
                done,
            } => {
                let packet_id = self.packet_ids.next();
                // Register before sending so retained messages find their handler
                self.subscriptions.write().push(Subscription {
                    filter: filter.clone(),
                    qos,
                    handler,
                });
                self.pending_subscribes.insert(
                    packet_id,
                    PendingSubscribe {
                        filter: filter.clone(),
                        done: Some(done),
                    },
                );
                writer
                    .send(&Packet::Subscribe(Subscribe {
                        packet_id,
                        filters: vec![(filter, qos)],
                    }))
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_packet(
        &mut self,
        packet: Packet,
        writer: &mut PacketWriter,
    ) -> Result<(), MqttError> {
        match packet {
            Packet::Publish(publish) => {
                debug!(
                    "MQTT: Received PUBLISH on '{}' (mid={:?}, qos={:?})",
                    publish.topic, publish.packet_id, publish.qos
                );
                match (publish.qos, publish.packet_id) {
                    (QoS::AtMostOnce, _) => self.deliver(publish, None),
                    (QoS::AtLeastOnce, Some(packet_id)) => {
                        self.deliver(publish, Some(Packet::PubAck { packet_id }));
                    }
                    (QoS::ExactlyOnce, Some(packet_id)) => {
                        // A redelivered PUBLISH before PUBREL is the same message
                        if self.awaiting_release.insert(packet_id) {
                            self.deliver(publish, Some(Packet::PubRec { packet_id }));
                        } else {
                            writer.send(&Packet::PubRec { packet_id }).await?;
                        }
                    }
                    _ => return Err(MqttError::Protocol("PUBLISH without packet id".to_string())),
                }
            }
            Packet::PubAck { packet_id } | Packet::PubComp { packet_id } => {
                self.inflight.complete(packet_id);
            }
            Packet::PubRec { packet_id } => {
                writer.send(&Packet::PubRel { packet_id }).await?;
            }
            Packet::PubRel { packet_id } => {
                self.awaiting_release.remove(&packet_id);
                writer.send(&Packet::PubComp { packet_id }).await?;
            }
            Packet::SubAck(ack) => {
                let Some(pending) = self.pending_subscribes.remove(&ack.packet_id) else {
                    debug!("MQTT: SUBACK for unknown packet id {}", ack.packet_id);
                    return Ok(());
                };
                let result = match ack.granted().first().copied().flatten() {
                    Some(granted) => {
                        debug!("MQTT: SUBACK for '{}' (qos={:?})", pending.filter, granted);
                        Ok(granted)
                    }
                    None => {
                        warn!("MQTT: Subscription to '{}' refused", pending.filter);
                        self.subscriptions
                            .write()
                            .retain(|s| s.filter != pending.filter);
                        Err(MqttError::SubscribeRejected(pending.filter))
                    }
                };
                if let Some(done) = pending.done {
                    let _ = done.send(result);
                }
            }
            Packet::Disconnect => {
                return Err(MqttError::ConnectionLost("broker sent DISCONNECT".to_string()));
            }
            other => {
                debug!("MQTT: Ignoring unexpected {}", other.name());
            }
        }
        Ok(())
    }

    /// Queue a message for the dispatcher; `ack` is sent once it is handed
    /// over. Socket reads pause until then.
    fn deliver(&mut self, publish: Publish, ack: Option<Packet>) {
        let message = InboundMessage {
            topic: publish.topic,
            payload: publish.payload,
            qos: publish.qos,
            retain: publish.retain,
        };
        self.delivery = Some(Delivery { message, ack });
    }
}
