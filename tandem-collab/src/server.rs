//! WebSocket sync server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                 ┌──────────────────────────┐
//!            ├── connection ──►│ CollabHub (one lock)     │
//! Client B ──┘    tasks        │  ├── SessionRegistry     │
//!                              │  └── DocumentAuthority   │
//!                              └────────────┬─────────────┘
//!                                           │ Outbox
//!                                           ▼
//!                                        Fanout
//!                          ┌────────────────┼───────────────┐
//!                          ▼                ▼               ▼
//!                       Client A         Client B        Client C
//! ```
//!
//! Each connection runs in its own task. Inbound frames are handed to the
//! hub under a single lock and the resulting outbox is dispatched before the
//! lock is released, so every connection sees messages in commit order.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::broadcast::{Fanout, Frame, DEFAULT_QUEUE_CAPACITY};
use crate::hub::CollabHub;
use crate::protocol::{SessionId, WireMessage};

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Accept connections from non-loopback addresses
    pub allow_external: bool,
    /// Frames buffered per connection before a slow reader is disconnected
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            allow_external: false,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub refused_connections: u64,
    pub total_messages: u64,
    pub messages_sent: u64,
    pub frames_dropped: u64,
    pub active_documents: usize,
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    hub: Arc<Mutex<CollabHub>>,
    fanout: Arc<Fanout>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    /// Create a new sync server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let hub = CollabHub::new(config.allow_external);
        let fanout = Fanout::new(config.queue_capacity);
        Self {
            config,
            hub: Arc::new(Mutex::new(hub)),
            fanout: Arc::new(fanout),
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        log::info!("Sync server listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let hub = self.hub.clone();
            let fanout = self.fanout.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, hub, fanout, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        hub: Arc<Mutex<CollabHub>>,
        fanout: Arc<Fanout>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let is_loopback = addr.ip().is_loopback();
        if !is_loopback && !hub.lock().await.registry().allow_external() {
            log::warn!("Refused external connection from {addr}");
            stats.write().await.refused_connections += 1;
            return Ok(());
        }

        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (session_id, mut outbound) = {
            let mut hub = hub.lock().await;
            let (id, welcome) = match hub.connect(is_loopback) {
                Ok(admitted) => admitted,
                Err(denied) => {
                    log::warn!("Refused connection from {addr}: {denied}");
                    stats.write().await.refused_connections += 1;
                    let _ = ws_sender.send(Message::Close(None)).await;
                    return Ok(());
                }
            };
            let rx = fanout.register(id).await;
            fanout.dispatch(welcome).await?;
            (id, rx)
        };

        log::info!("WebSocket connection established from {addr} as {session_id}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let result = loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            stats.write().await.total_messages += 1;
                            match WireMessage::decode(text.as_str()) {
                                Ok(message) => {
                                    log::trace!("{} from {session_id}", message.kind());
                                    let mut hub = hub.lock().await;
                                    let outbox = hub.handle(session_id, message);
                                    if let Err(e) = fanout.dispatch(outbox).await {
                                        log::error!("Failed to dispatch for {session_id}: {e}");
                                    }
                                }
                                Err(e) => {
                                    log::warn!("Failed to decode message from {addr}: {e}");
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break Ok(());
                        }

                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = ws_sender.send(Message::Pong(data)).await {
                                break Err(e.into());
                            }
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break Ok(());
                        }

                        _ => {}
                    }
                }

                frame = outbound.recv() => {
                    match frame {
                        Some(Frame::Text(text)) => {
                            if let Err(e) = ws_sender.send(Message::Text(text.as_ref().into())).await {
                                break Err(e.into());
                            }
                        }
                        Some(Frame::Close) | None => {
                            log::info!("Closing connection {session_id} from {addr}");
                            let _ = ws_sender.send(Message::Close(None)).await;
                            break Ok(());
                        }
                    }
                }
            }
        };

        Self::cleanup(session_id, &hub, &fanout).await;
        {
            let mut s = stats.write().await;
            s.active_connections -= 1;
        }
        result
    }

    async fn cleanup(session_id: SessionId, hub: &Mutex<CollabHub>, fanout: &Fanout) {
        let mut hub = hub.lock().await;
        fanout.unregister(session_id).await;
        let outbox = hub.disconnect(session_id);
        if let Err(e) = fanout.dispatch(outbox).await {
            log::error!("Failed to announce departure of {session_id}: {e}");
        }
    }

    /// Enable or disable non-loopback connections at runtime.
    pub async fn set_allow_external(&self, allow: bool) {
        self.hub.lock().await.set_allow_external(allow);
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().await.clone();
        let fanout = self.fanout.stats().await;
        stats.messages_sent = fanout.messages_sent;
        stats.frames_dropped = fanout.frames_dropped;
        stats.active_documents = self.hub.lock().await.authority().len();
        stats
    }

    /// Authoritative content and version of `file`, if active.
    pub async fn document(&self, file: &str) -> Option<(String, u64)> {
        let hub = self.hub.lock().await;
        hub.authority()
            .document(file)
            .map(|state| (state.content().to_string(), state.version()))
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
