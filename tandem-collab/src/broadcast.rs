//! Connection fan-out.
//!
//! Every connection owns a bounded outbound queue drained by its writer
//! half. [`Fanout::dispatch`] turns a hub [`Outbox`] into queue pushes,
//! encoding each message once no matter how many recipients it has.
//!
//! Dispatching is synchronous per queue, so the order in which the hub emits
//! messages is the order every connection observes them. A connection whose
//! queue is full has fallen behind: its queue is unregistered, the writer
//! drains what is left and then closes the socket, and the peer has to
//! bootstrap again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};

use crate::hub::{Dispatch, Outbox};
use crate::protocol::{ProtocolError, SessionId};

/// What a connection's writer receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Pre-encoded JSON text frame, shared between recipients.
    Text(Arc<str>),
    /// Close the connection.
    Close,
}

/// Statistics for monitoring fan-out health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutStats {
    pub messages_sent: u64,
    pub frames_dropped: u64,
    pub connections: usize,
}

/// Lock-free counters updated on the hot path.
#[derive(Debug, Default)]
struct AtomicFanoutStats {
    messages_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

/// Default per-connection queue length.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Outbound queues of all live connections.
#[derive(Debug)]
pub struct Fanout {
    connections: RwLock<HashMap<SessionId, mpsc::Sender<Frame>>>,
    capacity: usize,
    stats: AtomicFanoutStats,
}

impl Default for Fanout {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl Fanout {
    /// Create a fan-out whose queues hold up to `capacity` frames each.
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            stats: AtomicFanoutStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Open the outbound queue for `id`.
    pub async fn register(&self, id: SessionId) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.connections.write().await.insert(id, tx);
        rx
    }

    /// Drop the outbound queue for `id`.
    pub async fn unregister(&self, id: SessionId) -> bool {
        self.connections.write().await.remove(&id).is_some()
    }

    /// Deliver an outbox. Returns the number of frames queued.
    ///
    /// Connections whose queue overflows are unregistered once the outbox
    /// has been walked; later frames for them in the same outbox are dropped.
    pub async fn dispatch(&self, outbox: Outbox) -> Result<usize, ProtocolError> {
        let mut queued = 0;
        let mut overflowed = Vec::new();
        {
            let connections = self.connections.read().await;
            for dispatch in outbox {
                match dispatch {
                    Dispatch::Send { to, message } => {
                        let text: Arc<str> = message.encode()?.into();
                        for id in to {
                            if self.push(&connections, &mut overflowed, id, Frame::Text(text.clone())) {
                                queued += 1;
                            }
                        }
                        self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Dispatch::Close(id) => {
                        if self.push(&connections, &mut overflowed, id, Frame::Close) {
                            queued += 1;
                        }
                    }
                }
            }
        }

        if !overflowed.is_empty() {
            let mut connections = self.connections.write().await;
            for id in overflowed {
                connections.remove(&id);
            }
        }
        Ok(queued)
    }

    fn push(
        &self,
        connections: &HashMap<SessionId, mpsc::Sender<Frame>>,
        overflowed: &mut Vec<SessionId>,
        id: SessionId,
        frame: Frame,
    ) -> bool {
        let result = match connections.get(&id) {
            Some(_) if overflowed.contains(&id) => Err("queue overflowed"),
            Some(tx) => match tx.try_send(frame) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    log::warn!("Outbound queue of {id} is full, disconnecting it");
                    overflowed.push(id);
                    Err("queue full")
                }
                Err(TrySendError::Closed(_)) => Err("connection gone"),
            },
            None => Err("connection gone"),
        };
        if let Err(reason) = result {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            log::trace!("Frame for {id} dropped, {reason}");
        }
        result.is_ok()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn stats(&self) -> FanoutStats {
        FanoutStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            frames_dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
            connections: self.connection_count().await,
        }
    }
}
