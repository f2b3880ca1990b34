//! Readiness Barrier
//!
//! One-shot rendezvous between the connectors and the supervisor. Each
//! connector owns a [`ReadySignal`] and consumes it once its setup is
//! complete; the supervisor waits until every signal has arrived.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

/// Counts ready signals until every party has reported
#[derive(Debug)]
pub struct ReadinessBarrier {
    parties: usize,
    state: watch::Receiver<usize>,
}

/// A single party's "ready" report; consumed when signalled
#[derive(Debug)]
pub struct ReadySignal {
    party: &'static str,
    counter: Arc<watch::Sender<usize>>,
}

impl ReadinessBarrier {
    /// Create a barrier and the one signal each named party must send
    pub fn new<const N: usize>(parties: [&'static str; N]) -> (Self, [ReadySignal; N]) {
        let (tx, rx) = watch::channel(0usize);
        let counter = Arc::new(tx);
        let signals = parties.map(|party| ReadySignal {
            party,
            counter: counter.clone(),
        });

        let barrier = Self {
            parties: N,
            state: rx,
        };
        (barrier, signals)
    }

    /// Number of parties that have signalled so far
    pub fn ready_count(&self) -> usize {
        *self.state.borrow()
    }

    pub fn is_satisfied(&self) -> bool {
        self.ready_count() >= self.parties
    }

    /// Wait until every party has signalled
    pub async fn wait(&self) {
        let parties = self.parties;
        let mut state = self.state.clone();
        // The sender lives inside the outstanding signals. If they were all
        // dropped unsignalled this never completes, so wait forever.
        if state.wait_for(|count| *count >= parties).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Wait until every party has signalled or `limit` elapses.
    ///
    /// Returns `false` on timeout.
    pub async fn wait_timeout(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.wait()).await.is_ok()
    }
}

impl ReadySignal {
    pub fn party(&self) -> &'static str {
        self.party
    }

    /// Report this party as ready
    pub fn signal(self) {
        self.counter.send_modify(|count| *count += 1);
        debug!("{} connector ready", self.party);
    }
}
