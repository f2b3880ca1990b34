//! Bridge Integration Tests
//!
//! Runs the supervisor with both connectors over in-memory transports. The
//! chat transport echoes every post back into its event stream as the
//! bridge's own message, the way the real service does.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use mqtt_slack_bridge::config::RelayConfig;
use mqtt_slack_bridge::connector::{BrokerConnector, ChatConnector};
use mqtt_slack_bridge::mqtt::{MqttError, QoS};
use mqtt_slack_bridge::slack::SlackError;
use mqtt_slack_bridge::transport::{
    BotIdentity, BrokerTransport, ChannelInfo, ChatEvent, ChatEventStream, ChatMessage,
    ChatTransport, InboundHandler, InboundMessage, PublishToken,
};
use mqtt_slack_bridge::{BridgeError, Supervisor};

const TOPIC: &str = "home/chat";
const SELF_ID: &str = "UBRIDGE";
const CHANNEL_ID: &str = "C1";
const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// In-memory broker
// ============================================================================

struct FakeBroker {
    handler: Mutex<Option<InboundHandler>>,
    published_tx: mpsc::UnboundedSender<(QoS, bool, Bytes)>,
    /// Publishes left that never get acknowledged
    stall_count: Mutex<usize>,
    stalled: Mutex<Vec<oneshot::Sender<Result<(), MqttError>>>>,
}

impl FakeBroker {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(QoS, bool, Bytes)>) {
        let (published_tx, published_rx) = mpsc::unbounded_channel();
        let broker = Self {
            handler: Mutex::new(None),
            published_tx,
            stall_count: Mutex::new(0),
            stalled: Mutex::new(Vec::new()),
        };
        (Arc::new(broker), published_rx)
    }

    async fn deliver(&self, payload: &'static str) {
        let handler = self.handler.lock().clone().expect("not subscribed");
        handler(InboundMessage {
            topic: TOPIC.to_string(),
            payload: Bytes::from_static(payload.as_bytes()),
            qos: QoS::ExactlyOnce,
            retain: false,
        })
        .await;
    }
}

#[async_trait]
impl BrokerTransport for FakeBroker {
    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        handler: InboundHandler,
    ) -> Result<QoS, MqttError> {
        assert_eq!(filter, TOPIC);
        *self.handler.lock() = Some(handler);
        Ok(qos)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<PublishToken, MqttError> {
        assert_eq!(topic, TOPIC);
        let _ = self.published_tx.send((qos, retain, payload));

        let mut stall_count = self.stall_count.lock();
        if *stall_count > 0 {
            *stall_count -= 1;
            let (tx, rx) = oneshot::channel();
            self.stalled.lock().push(tx);
            return Ok(PublishToken::new(Some(1), rx));
        }
        Ok(PublishToken::acknowledged(Some(2)))
    }
}

// ============================================================================
// In-memory chat service
// ============================================================================

struct FakeChat {
    channels: Vec<ChannelInfo>,
    events_tx: mpsc::Sender<ChatEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<ChatEvent>>>,
    posted_tx: mpsc::UnboundedSender<(String, String)>,
    /// One permit per post allowed to complete
    post_permits: Arc<Semaphore>,
}

impl FakeChat {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(String, String)>) {
        Self::with_post_permits(Semaphore::MAX_PERMITS)
    }

    fn with_post_permits(permits: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<(String, String)>) {
        let (events_tx, events_rx) = mpsc::channel(64);
        let (posted_tx, posted_rx) = mpsc::unbounded_channel();
        let chat = Self {
            channels: vec![
                ChannelInfo {
                    id: "C0".to_string(),
                    name: "random".to_string(),
                },
                ChannelInfo {
                    id: CHANNEL_ID.to_string(),
                    name: "general".to_string(),
                },
            ],
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            posted_tx,
            post_permits: Arc::new(Semaphore::new(permits)),
        };
        (Arc::new(chat), posted_rx)
    }

    /// Someone other than the bridge says `text` in `channel`
    async fn say(&self, channel: &str, text: &str) {
        self.events_tx
            .send(ChatEvent::Message(ChatMessage {
                channel: channel.to_string(),
                user: Some("UALICE".to_string()),
                bot_id: None,
                text: text.to_string(),
            }))
            .await
            .unwrap();
    }
}

#[async_trait]
impl ChatTransport for FakeChat {
    async fn authenticate(&self) -> Result<BotIdentity, SlackError> {
        Ok(BotIdentity {
            user_id: SELF_ID.to_string(),
            user_name: "bridge".to_string(),
            bot_id: None,
        })
    }

    async fn list_channels(&self) -> Result<Vec<ChannelInfo>, SlackError> {
        Ok(self.channels.clone())
    }

    async fn post_message(&self, channel_id: &str, text: &str) -> Result<(), SlackError> {
        self.post_permits.acquire().await.unwrap().forget();
        let _ = self
            .posted_tx
            .send((channel_id.to_string(), text.to_string()));
        // The service shows our own post to us like any other message
        let _ = self
            .events_tx
            .send(ChatEvent::Message(ChatMessage {
                channel: channel_id.to_string(),
                user: Some(SELF_ID.to_string()),
                bot_id: None,
                text: text.to_string(),
            }))
            .await;
        Ok(())
    }

    async fn events(&self) -> Result<ChatEventStream, SlackError> {
        let events = self.events_rx.lock().take().expect("events opened twice");
        self.events_tx
            .send(ChatEvent::Connected {
                self_id: SELF_ID.to_string(),
            })
            .await
            .unwrap();
        Ok(events)
    }
}

// ============================================================================
// Harness
// ============================================================================

fn start(
    broker: &Arc<FakeBroker>,
    chat: &Arc<FakeChat>,
    channel: &str,
    queue_capacity: usize,
) -> JoinHandle<BridgeError> {
    let broker = broker.clone();
    let chat = chat.clone();
    let channel = channel.to_string();
    let supervisor = Supervisor::new(&RelayConfig {
        queue_capacity,
        startup_timeout: None,
    });

    tokio::spawn(async move {
        supervisor
            .run(
                move |links| BrokerConnector::new(broker, TOPIC, Duration::from_secs(20)).run(links),
                move |links| ChatConnector::new(chat, channel, false).run(links),
            )
            .await
    })
}

/// Wait until the broker connector has subscribed
async fn wait_subscribed(broker: &FakeBroker) {
    timeout(WAIT, async {
        while broker.handler.lock().is_none() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("never subscribed");
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed")
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_broker_message_posted_and_not_echoed_back() {
    let (broker, mut published) = FakeBroker::new();
    let (chat, mut posted) = FakeChat::new();
    let bridge = start(&broker, &chat, "#general", 23);
    wait_subscribed(&broker).await;

    broker.deliver("hello").await;
    assert_eq!(
        next(&mut posted).await,
        (CHANNEL_ID.to_string(), "hello".to_string())
    );

    // The echo of "hello" is ahead of "ping" in the event stream, so if it
    // were relayed it would be published first
    chat.say(CHANNEL_ID, "ping").await;
    assert_eq!(
        next(&mut published).await,
        (QoS::ExactlyOnce, false, Bytes::from_static(b"ping"))
    );
    assert!(published.try_recv().is_err());

    bridge.abort();
}

#[tokio::test]
async fn test_other_channels_are_not_relayed() {
    let (broker, mut published) = FakeBroker::new();
    let (chat, _posted) = FakeChat::new();
    let bridge = start(&broker, &chat, "general", 23);
    wait_subscribed(&broker).await;

    chat.say("C0", "wrong room").await;
    chat.say(CHANNEL_ID, "right room").await;

    assert_eq!(next(&mut published).await.2, Bytes::from_static(b"right room"));
    bridge.abort();
}

#[tokio::test]
async fn test_messages_keep_order_in_both_directions() {
    let (broker, mut published) = FakeBroker::new();
    let (chat, mut posted) = FakeChat::new();
    let bridge = start(&broker, &chat, "#general", 23);
    wait_subscribed(&broker).await;

    for payload in ["1", "2", "3"] {
        broker.deliver(payload).await;
    }
    for text in ["a", "b", "c"] {
        chat.say(CHANNEL_ID, text).await;
    }

    for expected in ["1", "2", "3"] {
        assert_eq!(next(&mut posted).await.1, expected);
    }
    for expected in ["a", "b", "c"] {
        assert_eq!(next(&mut published).await.2, Bytes::from(expected));
    }
    bridge.abort();
}

#[tokio::test(start_paused = true)]
async fn test_ack_timeout_skips_to_next_message() {
    let (broker, mut published) = FakeBroker::new();
    *broker.stall_count.lock() = 1;
    let (chat, _posted) = FakeChat::new();
    let bridge = start(&broker, &chat, "#general", 23);
    wait_subscribed(&broker).await;

    chat.say(CHANNEL_ID, "one").await;
    chat.say(CHANNEL_ID, "two").await;

    assert_eq!(next(&mut published).await.2, Bytes::from_static(b"one"));
    let started = tokio::time::Instant::now();
    // "two" is only published after the 20s wait for "one" gave up
    let second = timeout(Duration::from_secs(30), published.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.2, Bytes::from_static(b"two"));
    assert!(started.elapsed() >= Duration::from_secs(19));

    // "one" is never retried
    assert!(timeout(Duration::from_secs(60), published.recv()).await.is_err());
    bridge.abort();
}

#[tokio::test(start_paused = true)]
async fn test_full_queue_blocks_without_dropping() {
    let (broker, _published) = FakeBroker::new();
    let (chat, mut posted) = FakeChat::with_post_permits(0);
    let bridge = start(&broker, &chat, "#general", 2);
    wait_subscribed(&broker).await;

    let delivering = {
        let broker = broker.clone();
        tokio::spawn(async move {
            for payload in ["m1", "m2", "m3", "m4", "m5", "m6"] {
                broker.deliver(payload).await;
            }
        })
    };

    // One message held by the stalled post, two queued: the rest must wait
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!delivering.is_finished());

    chat.post_permits.add_permits(6);
    delivering.await.unwrap();
    for expected in ["m1", "m2", "m3", "m4", "m5", "m6"] {
        assert_eq!(next(&mut posted).await.1, expected);
    }
    bridge.abort();
}

#[tokio::test]
async fn test_unknown_channel_stops_the_bridge() {
    let (broker, _published) = FakeBroker::new();
    let (chat, _posted) = FakeChat::new();

    let error = timeout(WAIT, start(&broker, &chat, "#missing", 23))
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(error, BridgeError::ChannelNotFound(ref name) if name == "#missing"));
}

#[tokio::test]
async fn test_invalid_auth_event_stops_the_bridge() {
    let (broker, _published) = FakeBroker::new();
    let (chat, _posted) = FakeChat::new();
    let bridge = start(&broker, &chat, "#general", 23);
    wait_subscribed(&broker).await;

    chat.events_tx.send(ChatEvent::InvalidAuth).await.unwrap();

    let error = timeout(WAIT, bridge).await.unwrap().unwrap();
    assert!(matches!(error, BridgeError::ChatInvalidAuth));
}
