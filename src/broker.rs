use bytes::Bytes;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::{Stream, StreamExt};

use crate::session::SessionId;

pub const DEFAULT_CAPACITY: usize = 1024;

/// One chunk of PTY output, tagged with the session that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub session_id: SessionId,
    pub data: Bytes,
}

/// Fans PTY output out to any number of live consumers.
///
/// Delivery is lossy: a subscriber that falls more than `capacity` chunks
/// behind skips ahead. Session scrollback is the durable record.
#[derive(Clone)]
pub struct Broker {
    tx: broadcast::Sender<OutputChunk>,
}

impl Broker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, session_id: &SessionId, data: Bytes) {
        // Ignore error - means no receivers
        let _ = self.tx.send(OutputChunk {
            session_id: session_id.clone(),
            data,
        });
    }

    /// Subscribe to output from every session.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            filter: None,
        }
    }

    /// Subscribe to output from a single session.
    pub fn subscribe_session(&self, session_id: &SessionId) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            filter: Some(session_id.clone()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

/// A detachable handle on live output. Dropping it unsubscribes.
pub struct Subscription {
    rx: broadcast::Receiver<OutputChunk>,
    filter: Option<SessionId>,
}

impl Subscription {
    /// Wait for the next chunk. Returns `None` once the broker is gone.
    ///
    /// Chunks missed because this subscriber lagged are skipped.
    pub async fn recv(&mut self) -> Option<OutputChunk> {
        loop {
            match self.rx.recv().await {
                Ok(chunk) if self.accepts(&chunk) => return Some(chunk),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(skipped = n, "output subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv). Returns `None` when
    /// nothing is queued right now (or the broker is gone).
    pub fn try_recv(&mut self) -> Option<OutputChunk> {
        loop {
            match self.rx.try_recv() {
                Ok(chunk) if self.accepts(&chunk) => return Some(chunk),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = OutputChunk> {
        let filter = self.filter;
        BroadcastStream::new(self.rx).filter_map(move |item| match item {
            Ok(chunk) if filter.as_ref().map_or(true, |id| *id == chunk.session_id) => Some(chunk),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(n)) => {
                tracing::debug!(skipped = n, "output stream lagged");
                None
            }
        })
    }

    fn accepts(&self, chunk: &OutputChunk) -> bool {
        self.filter.as_ref().map_or(true, |id| *id == chunk.session_id)
    }
}
