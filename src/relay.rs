//! Relay Queues
//!
//! Bounded FIFO queues carrying messages between the two connectors, one
//! queue per direction. Each queue has exactly one producer and one
//! consumer. A full queue suspends the producer until the consumer frees
//! a slot; nothing is ever dropped on the way in.

use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;
use tokio::sync::mpsc;

/// A single payload in transit between connectors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    payload: Bytes,
}

impl RelayMessage {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Payload as text; invalid UTF-8 sequences are replaced
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

impl From<String> for RelayMessage {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&'static str> for RelayMessage {
    fn from(text: &'static str) -> Self {
        Self::new(Bytes::from_static(text.as_bytes()))
    }
}

/// The consuming side of a queue is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayClosed;

impl fmt::Display for RelayClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "relay queue closed")
    }
}

impl std::error::Error for RelayClosed {}

/// Producer half of a relay queue
#[derive(Debug, Clone)]
pub struct RelaySender {
    name: &'static str,
    tx: mpsc::Sender<RelayMessage>,
}

/// Consumer half of a relay queue
#[derive(Debug)]
pub struct RelayReceiver {
    name: &'static str,
    rx: mpsc::Receiver<RelayMessage>,
}

/// Create a named relay queue holding at most `capacity` messages.
///
/// # Panics
///
/// Panics if `capacity` is zero; configuration validation rejects that
/// value before any queue is built.
pub fn relay_queue(name: &'static str, capacity: usize) -> (RelaySender, RelayReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (RelaySender { name, tx }, RelayReceiver { name, rx })
}

impl RelaySender {
    /// Enqueue a message, waiting while the queue is full
    pub async fn send(&self, message: RelayMessage) -> Result<(), RelayClosed> {
        self.tx.send(message).await.map_err(|_| RelayClosed)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Messages currently waiting in the queue
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

impl RelayReceiver {
    /// Dequeue the next message, waiting while the queue is empty.
    ///
    /// Returns `None` once every sender is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<RelayMessage> {
        self.rx.recv().await
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}
