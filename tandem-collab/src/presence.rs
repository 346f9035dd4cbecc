//! Client-side presence: who is in the session, who is waiting to be let in,
//! and where everyone's cursor is.
//!
//! ```text
//!   user-list / user-joined / user-left ──► users
//!   user-request (host only)            ──► pending requests
//!   cursor-selection                    ──► cursors (per username)
//! ```
//!
//! The roster is a view for a presence UI. The server's session registry is
//! the only authority on admission.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::protocol::{SessionId, UserEntry, WireMessage};

/// Last known selection of a remote participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCursor {
    pub username: String,
    pub file: String,
    pub start: usize,
    pub end: usize,
    pub color: String,
    updated: Instant,
}

impl RemoteCursor {
    /// Collapsed selection.
    pub fn is_caret(&self) -> bool {
        self.start == self.end
    }

    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.updated.elapsed() > timeout
    }
}

/// A join request awaiting the host's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRequest {
    pub session_id: SessionId,
    pub username: String,
}

/// Presence state as seen by one participant.
#[derive(Debug, Clone)]
pub struct Roster {
    local_session_id: Option<SessionId>,
    local_color: Option<String>,
    is_host: bool,
    /// Approved participants, in the order the server listed or announced them.
    users: Vec<UserEntry>,
    requests: Vec<AdmissionRequest>,
    cursors: HashMap<String, RemoteCursor>,
    idle_timeout: Duration,
}

impl Default for Roster {
    fn default() -> Self {
        Self {
            local_session_id: None,
            local_color: None,
            is_host: false,
            users: Vec::new(),
            requests: Vec::new(),
            cursors: HashMap::new(),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with a custom cursor idle timeout (for testing).
    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            ..Self::default()
        }
    }

    /// Apply a presence-related message. Returns `true` if the roster changed.
    pub fn handle_message(&mut self, msg: &WireMessage) -> bool {
        match msg {
            WireMessage::Welcome { session_id, color } => {
                self.local_session_id = Some(*session_id);
                self.local_color = Some(color.clone());
                true
            }

            WireMessage::IsHost { value } => {
                self.is_host = *value;
                true
            }

            WireMessage::UserList { users } => {
                self.users = users.clone();
                true
            }

            WireMessage::UserJoined { session_id, username, color } => {
                self.resolve_request(*session_id);
                let entry = UserEntry {
                    session_id: *session_id,
                    username: username.clone(),
                    color: color.clone(),
                };
                match self.users.iter_mut().find(|u| u.session_id == *session_id) {
                    Some(existing) => *existing = entry,
                    None => self.users.push(entry),
                }
                true
            }

            WireMessage::UserLeft { session_id, username } => {
                self.resolve_request(*session_id);
                self.cursors.remove(username);
                let before = self.users.len();
                self.users.retain(|u| u.session_id != *session_id);
                before != self.users.len()
            }

            WireMessage::UserRequest { session_id, username } => {
                if self.requests.iter().any(|r| r.session_id == *session_id) {
                    return false;
                }
                self.requests.push(AdmissionRequest {
                    session_id: *session_id,
                    username: username.clone(),
                });
                true
            }

            WireMessage::CursorSelection { file, start, end, color, username } => {
                self.cursors.insert(
                    username.clone(),
                    RemoteCursor {
                        username: username.clone(),
                        file: file.clone(),
                        start: *start,
                        end: *end,
                        color: color.clone(),
                        updated: Instant::now(),
                    },
                );
                true
            }

            _ => false,
        }
    }

    /// Forget a pending request once the host decided on it.
    pub fn resolve_request(&mut self, session_id: SessionId) -> Option<AdmissionRequest> {
        let idx = self.requests.iter().position(|r| r.session_id == session_id)?;
        Some(self.requests.remove(idx))
    }

    /// Drop cursors that have not moved within the idle timeout.
    pub fn cleanup_idle_cursors(&mut self) -> Vec<String> {
        let timeout = self.idle_timeout;
        let stale: Vec<String> = self
            .cursors
            .iter()
            .filter(|(_, c)| c.is_idle(timeout))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &stale {
            self.cursors.remove(name);
        }
        stale
    }

    pub fn local_session_id(&self) -> Option<SessionId> {
        self.local_session_id
    }

    pub fn local_color(&self) -> Option<&str> {
        self.local_color.as_deref()
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    pub fn users(&self) -> &[UserEntry] {
        &self.users
    }

    pub fn user(&self, session_id: SessionId) -> Option<&UserEntry> {
        self.users.iter().find(|u| u.session_id == session_id)
    }

    pub fn pending_requests(&self) -> &[AdmissionRequest] {
        &self.requests
    }

    pub fn cursor(&self, username: &str) -> Option<&RemoteCursor> {
        self.cursors.get(username)
    }

    /// Cursors currently placed in `file`.
    pub fn cursors_in<'a>(&'a self, file: &'a str) -> impl Iterator<Item = &'a RemoteCursor> + 'a {
        self.cursors.values().filter(move |c| c.file == file)
    }

    /// Forget everything, e.g. after the connection dropped.
    pub fn clear(&mut self) {
        *self = Self::with_idle_timeout(self.idle_timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn entry(name: &str) -> UserEntry {
        UserEntry {
            session_id: Uuid::new_v4(),
            username: name.into(),
            color: "#96CEB4".into(),
        }
    }

    fn cursor(username: &str, file: &str, at: usize) -> WireMessage {
        WireMessage::CursorSelection {
            file: file.into(),
            start: at,
            end: at,
            color: "#FFEAA7".into(),
            username: username.into(),
        }
    }

    #[test]
    fn test_roster_new() {
        let roster = Roster::new();
        assert!(roster.users().is_empty());
        assert!(roster.local_session_id().is_none());
        assert!(!roster.is_host());
    }

    #[test]
    fn test_welcome_and_host_flag() {
        let mut roster = Roster::new();
        let id = Uuid::new_v4();
        roster.handle_message(&WireMessage::Welcome {
            session_id: id,
            color: "#FF6B6B".into(),
        });
        roster.handle_message(&WireMessage::IsHost { value: true });
        assert_eq!(roster.local_session_id(), Some(id));
        assert_eq!(roster.local_color(), Some("#FF6B6B"));
        assert!(roster.is_host());
    }

    #[test]
    fn test_user_list_then_join_and_leave() {
        let mut roster = Roster::new();
        let alice = entry("alice");
        roster.handle_message(&WireMessage::UserList { users: vec![alice.clone()] });

        let bob = entry("bob");
        roster.handle_message(&WireMessage::user_joined(&bob));
        assert_eq!(roster.users().len(), 2);
        assert_eq!(roster.user(bob.session_id), Some(&bob));

        let changed = roster.handle_message(&WireMessage::UserLeft {
            session_id: alice.session_id,
            username: "alice".into(),
        });
        assert!(changed);
        assert_eq!(roster.users(), &[bob]);
    }

    #[test]
    fn test_duplicate_join_replaces_entry() {
        let mut roster = Roster::new();
        let mut bob = entry("bob");
        roster.handle_message(&WireMessage::user_joined(&bob));
        bob.color = "#45B7D1".into();
        roster.handle_message(&WireMessage::user_joined(&bob));
        assert_eq!(roster.users().len(), 1);
        assert_eq!(roster.users()[0].color, "#45B7D1");
    }

    #[test]
    fn test_requests_tracked_until_resolved() {
        let mut roster = Roster::new();
        let id = Uuid::new_v4();
        let request = WireMessage::UserRequest {
            session_id: id,
            username: "carol".into(),
        };
        assert!(roster.handle_message(&request));
        assert!(!roster.handle_message(&request));
        assert_eq!(roster.pending_requests().len(), 1);

        roster.handle_message(&WireMessage::UserJoined {
            session_id: id,
            username: "carol".into(),
            color: String::new(),
        });
        assert!(roster.pending_requests().is_empty());
    }

    #[test]
    fn test_cursor_tracking_per_file() {
        let mut roster = Roster::new();
        roster.handle_message(&cursor("alice", "a.rs", 3));
        roster.handle_message(&cursor("bob", "b.rs", 0));
        roster.handle_message(&cursor("alice", "a.rs", 5));

        let in_a: Vec<&RemoteCursor> = roster.cursors_in("a.rs").collect();
        assert_eq!(in_a.len(), 1);
        assert_eq!(in_a[0].start, 5);
        assert!(in_a[0].is_caret());
    }

    #[test]
    fn test_user_left_removes_cursor() {
        let mut roster = Roster::new();
        let alice = entry("alice");
        roster.handle_message(&WireMessage::user_joined(&alice));
        roster.handle_message(&cursor("alice", "a.rs", 1));
        roster.handle_message(&WireMessage::UserLeft {
            session_id: alice.session_id,
            username: "alice".into(),
        });
        assert!(roster.cursor("alice").is_none());
    }

    #[test]
    fn test_idle_cursor_cleanup() {
        let mut roster = Roster::with_idle_timeout(Duration::from_millis(0));
        roster.handle_message(&cursor("alice", "a.rs", 1));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(roster.cleanup_idle_cursors(), vec!["alice".to_string()]);
        assert!(roster.cursor("alice").is_none());
    }

    #[test]
    fn test_document_traffic_ignored() {
        let mut roster = Roster::new();
        assert!(!roster.handle_message(&WireMessage::file_init("a", "x", 0)));
    }

    #[test]
    fn test_clear() {
        let mut roster = Roster::new();
        roster.handle_message(&WireMessage::IsHost { value: true });
        roster.handle_message(&cursor("bob", "a.rs", 0));
        roster.clear();
        assert!(!roster.is_host());
        assert!(roster.cursor("bob").is_none());
    }
}
