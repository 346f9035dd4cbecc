//! Session registry: who is connected, who is admitted, who is host.
//!
//! ```text
//!   connect ──► Pending ──join──┬──(host / first loopback)──► Approved
//!                               └──► waits for host ──approve──► Approved
//!   reject / kick / disconnect ──► removed
//! ```
//!
//! Only the host may approve, reject or kick. Non-loopback connections are
//! refused unless external access has been enabled.

use std::collections::HashMap;

use thiserror::Error;
use uuid::Uuid;

use crate::protocol::{SessionId, UserEntry};

/// Presence colors handed out round-robin at connect time.
pub const PALETTE: [&str; 8] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FFEAA7", "#DDA0DD", "#98D8C8", "#F7DC6F",
];

/// Admission status of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantStatus {
    Pending,
    Approved,
}

/// One connected participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub session_id: SessionId,
    /// Set by `join`; `None` until then.
    pub username: Option<String>,
    pub color: String,
    pub status: ParticipantStatus,
    pub is_loopback: bool,
    /// Connection order, used to keep roster output stable.
    seq: u64,
}

impl Participant {
    pub fn is_approved(&self) -> bool {
        self.status == ParticipantStatus::Approved
    }

    /// Display name, falling back to the short session id before `join`.
    pub fn display_name(&self) -> String {
        match &self.username {
            Some(name) => name.clone(),
            None => self.session_id.simple().to_string()[..8].to_string(),
        }
    }

    pub fn entry(&self) -> UserEntry {
        UserEntry {
            session_id: self.session_id,
            username: self.display_name(),
            color: self.color.clone(),
        }
    }
}

/// Why an admission request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionDenied {
    #[error("external connections are disabled for this session")]
    ExternalConnection,
    #[error("only the host may do this")]
    NotHost,
    #[error("no such participant")]
    UnknownParticipant,
    #[error("participant has no pending join request")]
    NotPending,
    #[error("the host cannot remove itself")]
    SelfTarget,
}

impl AdmissionDenied {
    /// Stable code for `error` diagnostics.
    pub fn code(&self) -> &'static str {
        match self {
            AdmissionDenied::ExternalConnection => "external-connection",
            AdmissionDenied::NotHost => "not-host",
            AdmissionDenied::UnknownParticipant => "unknown-participant",
            AdmissionDenied::NotPending => "not-pending",
            AdmissionDenied::SelfTarget => "self-target",
        }
    }
}

/// Result of a `join` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Approved immediately; `is_host` tells whether the joiner holds host authority.
    Approved { is_host: bool },
    /// Waiting for the host. `host` is `None` when nobody can approve yet.
    Pending { host: Option<SessionId> },
    /// Already approved; nothing changes.
    AlreadyApproved,
}

/// Owns every participant of the session.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    participants: HashMap<SessionId, Participant>,
    host_id: Option<SessionId>,
    allow_external: bool,
    next_seq: u64,
}

impl SessionRegistry {
    pub fn new(allow_external: bool) -> Self {
        Self {
            allow_external,
            ..Self::default()
        }
    }

    pub fn allow_external(&self) -> bool {
        self.allow_external
    }

    pub fn set_allow_external(&mut self, allow: bool) {
        log::info!("External connections {}", if allow { "enabled" } else { "disabled" });
        self.allow_external = allow;
    }

    /// Register a new connection as a pending participant with a fresh
    /// session id and color.
    pub fn connect(&mut self, is_loopback: bool) -> Result<&Participant, AdmissionDenied> {
        if !is_loopback && !self.allow_external {
            return Err(AdmissionDenied::ExternalConnection);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let participant = Participant {
            session_id: Uuid::new_v4(),
            username: None,
            color: PALETTE[(seq as usize) % PALETTE.len()].to_string(),
            status: ParticipantStatus::Pending,
            is_loopback,
            seq,
        };
        let id = participant.session_id;
        Ok(self.participants.entry(id).or_insert(participant))
    }

    /// Handle a `join` from `id`.
    ///
    /// The current host, or the first loopback joiner when there is no
    /// host, is approved on the spot and becomes host.
    pub fn join(&mut self, id: SessionId, username: &str) -> Result<JoinOutcome, AdmissionDenied> {
        let host_id = self.host_id;
        let participant = self
            .participants
            .get_mut(&id)
            .ok_or(AdmissionDenied::UnknownParticipant)?;

        if participant.is_approved() {
            return Ok(JoinOutcome::AlreadyApproved);
        }
        participant.username = Some(username.to_string());

        let becomes_host = match host_id {
            Some(host) => host == id,
            None => participant.is_loopback,
        };
        if becomes_host {
            participant.status = ParticipantStatus::Approved;
            self.host_id = Some(id);
            log::info!("{username} ({id}) joined as host");
            return Ok(JoinOutcome::Approved { is_host: true });
        }

        log::info!("{username} ({id}) is waiting for admission");
        Ok(JoinOutcome::Pending { host: host_id })
    }

    /// Host approves a pending joiner.
    pub fn approve(&mut self, actor: SessionId, target: SessionId) -> Result<&Participant, AdmissionDenied> {
        self.require_host(actor)?;
        let participant = self
            .participants
            .get_mut(&target)
            .ok_or(AdmissionDenied::UnknownParticipant)?;
        if participant.is_approved() || participant.username.is_none() {
            return Err(AdmissionDenied::NotPending);
        }
        participant.status = ParticipantStatus::Approved;
        log::info!("{} ({target}) approved", participant.display_name());
        Ok(participant)
    }

    /// Host refuses a participant. The removed participant is returned so the
    /// caller can close its connection.
    pub fn reject(&mut self, actor: SessionId, target: SessionId) -> Result<Participant, AdmissionDenied> {
        let removed = self.remove_by_host(actor, target)?;
        log::info!("{} ({target}) rejected", removed.display_name());
        Ok(removed)
    }

    /// Host removes a participant, approved or not.
    pub fn kick(&mut self, actor: SessionId, target: SessionId) -> Result<Participant, AdmissionDenied> {
        let removed = self.remove_by_host(actor, target)?;
        log::info!("{} ({target}) kicked", removed.display_name());
        Ok(removed)
    }

    fn remove_by_host(&mut self, actor: SessionId, target: SessionId) -> Result<Participant, AdmissionDenied> {
        self.require_host(actor)?;
        if actor == target {
            return Err(AdmissionDenied::SelfTarget);
        }
        self.participants
            .remove(&target)
            .ok_or(AdmissionDenied::UnknownParticipant)
    }

    fn require_host(&self, actor: SessionId) -> Result<(), AdmissionDenied> {
        if self.host_id == Some(actor) {
            Ok(())
        } else {
            Err(AdmissionDenied::NotHost)
        }
    }

    /// Drop a participant whose connection is gone. Clears the host
    /// designation if it was the host.
    pub fn disconnect(&mut self, id: SessionId) -> Option<Participant> {
        let removed = self.participants.remove(&id)?;
        if self.host_id == Some(id) {
            log::info!("Host {} left, session has no host", removed.display_name());
            self.host_id = None;
        }
        Some(removed)
    }

    pub fn get(&self, id: SessionId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    pub fn is_approved(&self, id: SessionId) -> bool {
        self.participants.get(&id).is_some_and(Participant::is_approved)
    }

    pub fn host(&self) -> Option<SessionId> {
        self.host_id
    }

    /// Approved participants other than `except`, in connection order.
    pub fn approved_except(&self, except: Option<SessionId>) -> Vec<SessionId> {
        self.approved()
            .into_iter()
            .filter(|p| Some(p.session_id) != except)
            .map(|p| p.session_id)
            .collect()
    }

    /// Roster of approved participants, in connection order.
    pub fn roster(&self) -> Vec<UserEntry> {
        self.approved().into_iter().map(Participant::entry).collect()
    }

    /// Pending participants that have sent `join`, in connection order.
    pub fn waiting(&self) -> Vec<(SessionId, String)> {
        let mut waiting: Vec<&Participant> = self
            .participants
            .values()
            .filter(|p| !p.is_approved() && p.username.is_some())
            .collect();
        waiting.sort_by_key(|p| p.seq);
        waiting
            .into_iter()
            .map(|p| (p.session_id, p.display_name()))
            .collect()
    }

    fn approved(&self) -> Vec<&Participant> {
        let mut approved: Vec<&Participant> =
            self.participants.values().filter(|p| p.is_approved()).collect();
        approved.sort_by_key(|p| p.seq);
        approved
    }

    /// Number of connected participants, pending or approved.
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
