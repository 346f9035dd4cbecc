//! Message hub: the single entry point for inbound traffic.
//!
//! The hub owns the [`DocumentAuthority`] and the [`SessionRegistry`] and
//! turns each inbound [`WireMessage`] into an [`Outbox`] of deliveries.
//! It performs no I/O; the server drains the outbox into the connection
//! fan-out.
//!
//! ```text
//!   ws frame ──► decode ──► CollabHub::handle(from, msg) ──► Outbox
//!                                 │        │                    │
//!                        SessionRegistry  DocumentAuthority     ▼
//!                                                          Fanout::dispatch
//! ```

use crate::authority::{AuthorityError, DocumentAuthority};
use crate::protocol::{SessionId, WireMessage};
use crate::session::{AdmissionDenied, JoinOutcome, Participant, SessionRegistry};

/// One delivery produced by the hub.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Send `message` to every listed participant.
    Send { to: Vec<SessionId>, message: WireMessage },
    /// Close the participant's connection.
    Close(SessionId),
}

/// Ordered deliveries resulting from one event.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Outbox {
    dispatches: Vec<Dispatch>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, to: SessionId, message: WireMessage) {
        self.dispatches.push(Dispatch::Send { to: vec![to], message });
    }

    pub fn send_many(&mut self, to: Vec<SessionId>, message: WireMessage) {
        if !to.is_empty() {
            self.dispatches.push(Dispatch::Send { to, message });
        }
    }

    pub fn close(&mut self, id: SessionId) {
        self.dispatches.push(Dispatch::Close(id));
    }

    pub fn dispatches(&self) -> &[Dispatch] {
        &self.dispatches
    }

    pub fn is_empty(&self) -> bool {
        self.dispatches.is_empty()
    }

    /// Messages addressed to `id`, in delivery order.
    pub fn messages_for(&self, id: SessionId) -> Vec<&WireMessage> {
        self.dispatches
            .iter()
            .filter_map(|d| match d {
                Dispatch::Send { to, message } if to.contains(&id) => Some(message),
                _ => None,
            })
            .collect()
    }

    /// Connections to close.
    pub fn closes(&self) -> Vec<SessionId> {
        self.dispatches
            .iter()
            .filter_map(|d| match d {
                Dispatch::Close(id) => Some(*id),
                _ => None,
            })
            .collect()
    }
}

impl IntoIterator for Outbox {
    type Item = Dispatch;
    type IntoIter = std::vec::IntoIter<Dispatch>;

    fn into_iter(self) -> Self::IntoIter {
        self.dispatches.into_iter()
    }
}

/// Session-wide server state.
#[derive(Debug, Default)]
pub struct CollabHub {
    authority: DocumentAuthority,
    registry: SessionRegistry,
}

impl CollabHub {
    pub fn new(allow_external: bool) -> Self {
        Self {
            authority: DocumentAuthority::new(),
            registry: SessionRegistry::new(allow_external),
        }
    }

    pub fn authority(&self) -> &DocumentAuthority {
        &self.authority
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn set_allow_external(&mut self, allow: bool) {
        self.registry.set_allow_external(allow);
    }

    /// Admit a new connection. The outbox carries its `welcome`.
    pub fn connect(&mut self, is_loopback: bool) -> Result<(SessionId, Outbox), AdmissionDenied> {
        let participant = self.registry.connect(is_loopback)?;
        let id = participant.session_id;
        let mut outbox = Outbox::new();
        outbox.send(
            id,
            WireMessage::Welcome {
                session_id: id,
                color: participant.color.clone(),
            },
        );
        log::info!("Session {id} connected (loopback: {is_loopback})");
        Ok((id, outbox))
    }

    /// Forget a connection that went away.
    pub fn disconnect(&mut self, id: SessionId) -> Outbox {
        let mut outbox = Outbox::new();
        if let Some(gone) = self.registry.disconnect(id) {
            log::info!("Session {id} ({}) disconnected", gone.display_name());
            self.announce_departure(&gone, &mut outbox);
        }
        outbox
    }

    /// Process one inbound message from `from`.
    pub fn handle(&mut self, from: SessionId, message: WireMessage) -> Outbox {
        let mut outbox = Outbox::new();
        if self.registry.get(from).is_none() {
            log::debug!("Message from unknown session {from} dropped");
            return outbox;
        }

        if let WireMessage::Join { username } = &message {
            self.handle_join(from, username, &mut outbox);
            return outbox;
        }

        if !self.registry.is_approved(from) {
            log::debug!("{} from pending session {from} dropped", message.kind());
            return outbox;
        }

        match message {
            WireMessage::ApproveRequest { target_session_id } => {
                let approved = self.registry.approve(from, target_session_id).map(|_| ());
                match approved {
                    Ok(()) => self.admit(target_session_id, false, &mut outbox),
                    Err(denied) => Self::deny(from, denied, &mut outbox),
                }
            }
            WireMessage::RejectRequest { target_session_id } => {
                let result = self.registry.reject(from, target_session_id);
                self.finish_removal(from, result, &mut outbox);
            }
            WireMessage::KickUser { target_session_id } => {
                let result = self.registry.kick(from, target_session_id);
                self.finish_removal(from, result, &mut outbox);
            }
            WireMessage::FileInit { file, content, .. } => {
                let (_, state) = self.authority.seed(&file, &content);
                outbox.send(
                    from,
                    WireMessage::file_init(file, state.content(), state.version()),
                );
            }
            WireMessage::TextOperation { file, version, ops, .. } => {
                self.handle_operation(from, file, version, ops, &mut outbox);
            }
            relayed @ (WireMessage::FileCreate { .. }
            | WireMessage::FileDelete { .. }
            | WireMessage::CursorSelection { .. }) => {
                log::trace!("Relaying {} from {from}", relayed.kind());
                outbox.send_many(self.registry.approved_except(Some(from)), relayed);
            }
            other => {
                log::debug!("Ignoring server-bound {} from {from}", other.kind());
            }
        }
        outbox
    }

    fn handle_join(&mut self, from: SessionId, username: &str, outbox: &mut Outbox) {
        match self.registry.join(from, username) {
            Ok(JoinOutcome::Approved { is_host }) => {
                self.admit(from, is_host, outbox);
                if is_host {
                    self.forward_waiting(from, outbox);
                }
            }
            Ok(JoinOutcome::Pending { host: Some(host) }) => outbox.send(
                host,
                WireMessage::UserRequest {
                    session_id: from,
                    username: username.to_string(),
                },
            ),
            Ok(JoinOutcome::Pending { host: None }) => {
                log::warn!("{username} ({from}) is waiting but no host is present");
            }
            Ok(JoinOutcome::AlreadyApproved) => {
                log::debug!("Repeated join from {from} ignored");
            }
            Err(denied) => Self::deny(from, denied, outbox),
        }
    }

    /// Bring an approved participant up to date and announce it.
    fn admit(&self, id: SessionId, is_host: bool, outbox: &mut Outbox) {
        let Some(participant) = self.registry.get(id) else {
            return;
        };
        outbox.send(id, WireMessage::IsHost { value: is_host });
        outbox.send(
            id,
            WireMessage::UserList {
                users: self.registry.roster(),
            },
        );
        for (file, state) in self.authority.snapshots() {
            outbox.send(
                id,
                WireMessage::file_init(file, state.content(), state.version()),
            );
        }
        outbox.send_many(
            self.registry.approved_except(Some(id)),
            WireMessage::user_joined(&participant.entry()),
        );
    }

    /// Hand a newly claimed host the joiners that arrived while nobody could approve.
    fn forward_waiting(&self, host: SessionId, outbox: &mut Outbox) {
        for (session_id, username) in self.registry.waiting() {
            log::info!("Forwarding waiting join of {username} ({session_id}) to new host");
            outbox.send(host, WireMessage::UserRequest { session_id, username });
        }
    }

    fn handle_operation(
        &mut self,
        from: SessionId,
        file: String,
        version: u64,
        ops: tandem_ot::TextOperation,
        outbox: &mut Outbox,
    ) {
        match self.authority.submit(&file, version, ops, from) {
            Ok((committed, new_version)) => {
                // The origin receives the same message as its acknowledgment.
                outbox.send_many(
                    self.registry.approved_except(None),
                    WireMessage::text_operation(file, new_version, committed, Some(from)),
                );
            }
            Err(err @ AuthorityError::FutureRevision { .. }) => {
                log::warn!("Dropped operation from {from}: {err}");
            }
            Err(err @ AuthorityError::Apply { .. }) => {
                log::warn!("Dropped operation from {from}: {err}; resending {file}");
                if let Some(state) = self.authority.document(&file) {
                    outbox.send(
                        from,
                        WireMessage::file_init(file.as_str(), state.content(), state.version()),
                    );
                }
            }
        }
    }

    fn finish_removal(
        &self,
        from: SessionId,
        result: Result<Participant, AdmissionDenied>,
        outbox: &mut Outbox,
    ) {
        match result {
            Ok(removed) => {
                outbox.close(removed.session_id);
                self.announce_departure(&removed, outbox);
            }
            Err(denied) => Self::deny(from, denied, outbox),
        }
    }

    fn announce_departure(&self, gone: &Participant, outbox: &mut Outbox) {
        if gone.is_approved() {
            outbox.send_many(
                self.registry.approved_except(None),
                WireMessage::UserLeft {
                    session_id: gone.session_id,
                    username: gone.display_name(),
                },
            );
        }
    }

    fn deny(to: SessionId, denied: AdmissionDenied, outbox: &mut Outbox) {
        log::warn!("Request from {to} denied: {denied}");
        outbox.send(to, WireMessage::error(denied.code(), denied.to_string()));
    }
}
