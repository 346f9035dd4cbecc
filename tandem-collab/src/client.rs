//! WebSocket sync client for connecting to the collaboration server.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect)
//! - Admission (join, and approve/reject/kick when hosting)
//! - Document sync through a [`ReconcileEngine`]
//! - Presence (cursor/selection) updates through a [`Roster`]
//!
//! All sync state lives for one connection only. When the socket drops,
//! documents and roster are discarded and must be bootstrapped again.
//!
//! Outgoing frames and application events go through bounded channels. A
//! full outgoing queue makes sends wait for the writer; an application that
//! stops draining events stalls the reader, and the server eventually drops
//! the connection.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tandem_ot::Mutation;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::presence::{AdmissionRequest, Roster};
use crate::protocol::{ProtocolError, SessionId, UserEntry, WireMessage};
use crate::reconcile::{LocalEdit, ReconcileEngine, ReconcileError, RemoteOutcome};

/// Capacity of the outgoing and event channels.
pub const CHANNEL_CAPACITY: usize = 256;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Identity assigned by the server
    Connected { session_id: SessionId, color: String },
    /// Connection lost; all sync state was discarded
    Disconnected,
    /// Join approved
    Admitted { is_host: bool },
    /// Full roster received
    Roster(Vec<UserEntry>),
    /// Someone is waiting for the host's decision
    AdmissionRequested(AdmissionRequest),
    UserJoined(UserEntry),
    UserLeft { session_id: SessionId, username: String },
    /// Authoritative content of a document; replaces the editor buffer
    DocumentSynced { file: String, content: String, version: u64 },
    /// A remote edit to apply to the editor buffer
    RemoteEdit { file: String, version: u64, mutations: Vec<Mutation> },
    /// Our operation was committed as `version`
    Acknowledged { file: String, version: u64 },
    /// Local state of `file` was dropped; a fresh `DocumentSynced` follows
    Resyncing { file: String },
    CursorMoved {
        username: String,
        file: String,
        start: usize,
        end: usize,
        color: String,
    },
    FileCreated { file: String, content: Option<String> },
    FileDeleted { file: String },
    /// A request was refused by the server
    ServerError { code: String, message: String },
}

/// Client-side failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// State shared between the API and the reader task.
#[derive(Debug, Default)]
struct ClientCore {
    engine: Option<ReconcileEngine>,
    roster: Roster,
    username: Option<String>,
    /// Queue to the writer task of the live connection
    outgoing: Option<mpsc::Sender<Message>>,
    /// Bumped on every connect so a stale reader cannot reset a newer connection
    generation: u64,
}

impl ClientCore {
    /// Apply one inbound message. Returns events for the application and
    /// messages to send back, in order.
    fn handle(&mut self, msg: WireMessage) -> (Vec<SyncEvent>, Vec<WireMessage>) {
        let mut events = Vec::new();
        let mut replies = Vec::new();
        self.roster.handle_message(&msg);

        match msg {
            WireMessage::Welcome { session_id, color } => {
                self.engine = Some(ReconcileEngine::new(session_id));
                events.push(SyncEvent::Connected { session_id, color });
            }
            WireMessage::IsHost { value } => events.push(SyncEvent::Admitted { is_host: value }),
            WireMessage::UserList { users } => events.push(SyncEvent::Roster(users)),
            WireMessage::UserRequest { session_id, username } => {
                events.push(SyncEvent::AdmissionRequested(AdmissionRequest { session_id, username }));
            }
            WireMessage::UserJoined { session_id, username, color } => {
                events.push(SyncEvent::UserJoined(UserEntry {
                    session_id,
                    username,
                    color,
                }));
            }
            WireMessage::UserLeft { session_id, username } => {
                events.push(SyncEvent::UserLeft { session_id, username });
            }
            WireMessage::FileInit { file, content, version } => {
                if let Some(engine) = self.engine.as_mut() {
                    engine.file_init(&file, &content, version);
                    events.push(SyncEvent::DocumentSynced { file, content, version });
                }
            }
            WireMessage::TextOperation { file, version, ops, session_id } => {
                let Some(engine) = self.engine.as_mut() else {
                    return (events, replies);
                };
                match engine.receive_operation(&file, version, &ops, session_id) {
                    Ok(RemoteOutcome::Acknowledged { next }) => {
                        if let Some(next) = next {
                            replies.push(WireMessage::text_operation(next.file, next.revision, next.op, None));
                        }
                        events.push(SyncEvent::Acknowledged { file, version });
                    }
                    Ok(RemoteOutcome::Applied { mutations, .. }) => {
                        events.push(SyncEvent::RemoteEdit { file, version, mutations });
                    }
                    Ok(RemoteOutcome::Duplicate) => {}
                    Err(ReconcileError::UnknownDocument(_)) => {
                        log::trace!("Operation on unopened document {file} ignored");
                    }
                    Err(e) => {
                        log::warn!("Resyncing after: {e}");
                        replies.push(Self::bootstrap_request(&file));
                        events.push(SyncEvent::Resyncing { file });
                    }
                }
            }
            WireMessage::CursorSelection { file, start, end, color, username } => {
                events.push(SyncEvent::CursorMoved {
                    username,
                    file,
                    start,
                    end,
                    color,
                });
            }
            WireMessage::FileCreate { file, content } => events.push(SyncEvent::FileCreated { file, content }),
            WireMessage::FileDelete { file } => events.push(SyncEvent::FileDeleted { file }),
            WireMessage::Error { code, message } => {
                log::warn!("Server refused a request: {code}: {message}");
                events.push(SyncEvent::ServerError { code, message });
            }
            other => log::debug!("Ignoring client-bound {}", other.kind()),
        }
        (events, replies)
    }

    /// A `file-init` asking for the authoritative state of `file`.
    fn bootstrap_request(file: &str) -> WireMessage {
        WireMessage::file_init(file, "", 0)
    }

    fn sender(&self) -> Result<mpsc::Sender<Message>, ProtocolError> {
        self.outgoing.clone().ok_or(ProtocolError::NotConnected)
    }

    /// Discard all sync state and release the writer.
    fn reset(&mut self) {
        self.engine = None;
        self.roster.clear();
        self.outgoing = None;
    }
}

async fn transmit(tx: &mpsc::Sender<Message>, msg: &WireMessage) -> Result<(), ProtocolError> {
    let text = msg.encode()?;
    tx.send(Message::Text(text.into()))
        .await
        .map_err(|_| ProtocolError::ConnectionClosed)
}

/// The sync client.
///
/// Manages a WebSocket connection to the collaboration server and keeps
/// every opened document reconciled with it.
pub struct SyncClient {
    /// Server URL
    server_url: String,

    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Documents, presence and the writer queue
    core: Arc<Mutex<ClientCore>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<SyncEvent>>,

    /// Event sender (held by the reader task)
    event_tx: mpsc::Sender<SyncEvent>,
}

impl SyncClient {
    /// Create a new sync client.
    pub fn new(server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            core: Arc::new(Mutex::new(ClientCore::default())),
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;
        let generation = {
            let mut core = self.core.lock().await;
            core.reset();
            core.generation += 1;
            core.generation
        };

        let ws_stream = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                log::warn!("Failed to connect to {}: {e}", self.server_url);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(CHANNEL_CAPACITY);
        self.core.lock().await.outgoing = Some(out_tx.clone());
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = msg.is_close();
                if ws_writer.send(msg).await.is_err() || closing {
                    break;
                }
            }
        });

        *self.state.write().await = ConnectionState::Connected;

        // Reader task: feed inbound messages through the core
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let core = self.core.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let msg = match WireMessage::decode(text.as_str()) {
                            Ok(msg) => msg,
                            Err(e) => {
                                log::warn!("Undecodable message from server: {e}");
                                continue;
                            }
                        };
                        let events = {
                            let mut core = core.lock().await;
                            let (events, replies) = core.handle(msg);
                            for reply in replies {
                                if let Err(e) = transmit(&out_tx, &reply).await {
                                    log::warn!("Failed to send {}: {e}", reply.kind());
                                }
                            }
                            events
                        };
                        for event in events {
                            let _ = event_tx.send(event).await;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost; dropping `out_tx` and the core's sender ends the writer.
            drop(out_tx);
            let mut guard = core.lock().await;
            if guard.generation == generation {
                guard.reset();
                *state.write().await = ConnectionState::Disconnected;
                drop(guard);
                let _ = event_tx.send(SyncEvent::Disconnected).await;
            }
        });

        Ok(())
    }

    /// Close the connection.
    pub async fn disconnect(&mut self) {
        let tx = {
            let mut core = self.core.lock().await;
            let tx = core.outgoing.take();
            core.reset();
            tx
        };
        if let Some(tx) = tx {
            let _ = tx.send(Message::Close(None)).await;
        }
        *self.state.write().await = ConnectionState::Disconnected;
    }

    async fn send(&self, msg: &WireMessage) -> Result<(), ProtocolError> {
        let tx = self.core.lock().await.sender()?;
        transmit(&tx, msg).await
    }

    /// Ask to participate under `username`.
    pub async fn join(&self, username: impl Into<String>) -> Result<(), ProtocolError> {
        let username = username.into();
        self.core.lock().await.username = Some(username.clone());
        self.send(&WireMessage::Join { username }).await
    }

    /// Request the authoritative state of `file`, offering `local_content`
    /// as its seed if nobody has opened it yet.
    pub async fn open_document(&self, file: &str, local_content: &str) -> Result<(), ProtocolError> {
        self.send(&WireMessage::file_init(file, local_content, 0)).await
    }

    /// Record a local edit and send it when nothing else is in flight.
    pub async fn local_edit(&self, file: &str, edit: LocalEdit) -> Result<(), ClientError> {
        // The core stays locked across the send so frames leave in edit order.
        let mut core = self.core.lock().await;
        let tx = core.sender()?;
        let engine = core.engine.as_mut().ok_or(ProtocolError::NotConnected)?;
        match engine.local_edit(file, &edit) {
            Ok(Some(out)) => {
                transmit(&tx, &WireMessage::text_operation(out.file, out.revision, out.op, None)).await?;
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                if e.needs_resync() {
                    transmit(&tx, &ClientCore::bootstrap_request(file)).await?;
                }
                Err(e.into())
            }
        }
    }

    /// Admit a pending participant (host only).
    pub async fn approve(&self, target: SessionId) -> Result<(), ProtocolError> {
        self.core.lock().await.roster.resolve_request(target);
        self.send(&WireMessage::ApproveRequest { target_session_id: target }).await
    }

    /// Refuse a pending participant (host only).
    pub async fn reject(&self, target: SessionId) -> Result<(), ProtocolError> {
        self.core.lock().await.roster.resolve_request(target);
        self.send(&WireMessage::RejectRequest { target_session_id: target }).await
    }

    /// Remove a participant (host only).
    pub async fn kick(&self, target: SessionId) -> Result<(), ProtocolError> {
        self.send(&WireMessage::KickUser { target_session_id: target }).await
    }

    /// Share our selection in `file`.
    pub async fn send_cursor(&self, file: &str, start: usize, end: usize) -> Result<(), ProtocolError> {
        let msg = {
            let core = self.core.lock().await;
            WireMessage::CursorSelection {
                file: file.to_string(),
                start,
                end,
                color: core.roster.local_color().unwrap_or_default().to_string(),
                username: core.username.clone().unwrap_or_default(),
            }
        };
        self.send(&msg).await
    }

    pub async fn create_file(&self, file: &str, content: Option<String>) -> Result<(), ProtocolError> {
        self.send(&WireMessage::FileCreate {
            file: file.to_string(),
            content,
        })
        .await
    }

    pub async fn delete_file(&self, file: &str) -> Result<(), ProtocolError> {
        self.send(&WireMessage::FileDelete { file: file.to_string() }).await
    }

    /// Visible text of `file`, local edits included.
    pub async fn document_text(&self, file: &str) -> Option<String> {
        let core = self.core.lock().await;
        core.engine.as_ref()?.text(file).map(str::to_string)
    }

    /// Revision of `file` last acknowledged by the server.
    pub async fn document_revision(&self, file: &str) -> Option<u64> {
        let core = self.core.lock().await;
        core.engine.as_ref()?.document(file).map(|doc| doc.revision())
    }

    /// Whether `file` has edits the server has not acknowledged.
    pub async fn has_unacknowledged(&self, file: &str) -> bool {
        let core = self.core.lock().await;
        core.engine
            .as_ref()
            .and_then(|engine| engine.document(file))
            .is_some_and(|doc| doc.has_unacknowledged())
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn session_id(&self) -> Option<SessionId> {
        self.core.lock().await.roster.local_session_id()
    }

    pub async fn is_host(&self) -> bool {
        self.core.lock().await.roster.is_host()
    }

    /// Approved participants as last reported by the server.
    pub async fn users(&self) -> Vec<UserEntry> {
        self.core.lock().await.roster.users().to_vec()
    }

    /// Join requests awaiting our decision (host only).
    pub async fn pending_requests(&self) -> Vec<AdmissionRequest> {
        self.core.lock().await.roster.pending_requests().to_vec()
    }

    /// Get the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}
