//! JSON wire protocol shared by server and client.
//!
//! Every frame is one JSON object with a kebab-case `type` discriminant and
//! camelCase fields:
//! ```text
//! {"type":"text-operation","file":"src/a.rs","version":3,
//!  "ops":[{"retain":3},{"insert":"X"}],"sessionId":"…"}
//! ```
//!
//! | type | direction |
//! |------|-----------|
//! | `welcome` | server → client |
//! | `join` | client → server |
//! | `user-request` | server → host |
//! | `approve-request` / `reject-request` / `kick-user` | host → server |
//! | `user-joined` / `user-left` / `user-list` | server → clients |
//! | `is-host` / `error` | server → client |
//! | `file-init` / `text-operation` | both |
//! | `file-create` / `file-delete` / `cursor-selection` | both, relayed |

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Opaque participant identifier assigned by the server at connect time.
pub type SessionId = Uuid;

/// One roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntry {
    pub session_id: SessionId,
    pub username: String,
    pub color: String,
}

/// Top-level protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WireMessage {
    /// Identity assignment right after the socket opens.
    #[serde(rename_all = "camelCase")]
    Welcome { session_id: SessionId, color: String },

    /// Request to participate under `username`.
    Join { username: String },

    /// Pending-admission notice, sent to the host only.
    #[serde(rename_all = "camelCase")]
    UserRequest { session_id: SessionId, username: String },

    #[serde(rename_all = "camelCase")]
    ApproveRequest { target_session_id: SessionId },

    #[serde(rename_all = "camelCase")]
    RejectRequest { target_session_id: SessionId },

    #[serde(rename_all = "camelCase")]
    KickUser { target_session_id: SessionId },

    #[serde(rename_all = "camelCase")]
    UserJoined {
        session_id: SessionId,
        username: String,
        #[serde(default)]
        color: String,
    },

    #[serde(rename_all = "camelCase")]
    UserLeft { session_id: SessionId, username: String },

    /// Full roster snapshot, sent on admission.
    UserList { users: Vec<UserEntry> },

    /// Whether the receiver holds host authority.
    IsHost { value: bool },

    /// Full document state. From a client this is a bootstrap request whose
    /// `content` only seeds an uninitialised document.
    FileInit {
        file: String,
        content: String,
        #[serde(default)]
        version: u64,
    },

    /// An operation on `file`. From a client `version` is the revision the
    /// operation was generated against; from the server it is the version
    /// the operation produced and `sessionId` names its origin.
    #[serde(rename_all = "camelCase")]
    TextOperation {
        file: String,
        version: u64,
        ops: tandem_ot::TextOperation,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
    },

    FileCreate {
        file: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },

    FileDelete { file: String },

    CursorSelection {
        file: String,
        start: usize,
        end: usize,
        color: String,
        username: String,
    },

    /// Diagnostic for a request that was refused.
    Error { code: String, message: String },
}

impl WireMessage {
    /// Create a text operation message.
    pub fn text_operation(
        file: impl Into<String>,
        version: u64,
        ops: tandem_ot::TextOperation,
        session_id: Option<SessionId>,
    ) -> Self {
        Self::TextOperation {
            file: file.into(),
            version,
            ops,
            session_id,
        }
    }

    /// Create a file-init message.
    pub fn file_init(file: impl Into<String>, content: impl Into<String>, version: u64) -> Self {
        Self::FileInit {
            file: file.into(),
            content: content.into(),
            version,
        }
    }

    /// Create a user-joined notice for a roster entry.
    pub fn user_joined(user: &UserEntry) -> Self {
        Self::UserJoined {
            session_id: user.session_id,
            username: user.username.clone(),
            color: user.color.clone(),
        }
    }

    /// Create an error diagnostic.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// The wire discriminant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::Join { .. } => "join",
            Self::UserRequest { .. } => "user-request",
            Self::ApproveRequest { .. } => "approve-request",
            Self::RejectRequest { .. } => "reject-request",
            Self::KickUser { .. } => "kick-user",
            Self::UserJoined { .. } => "user-joined",
            Self::UserLeft { .. } => "user-left",
            Self::UserList { .. } => "user-list",
            Self::IsHost { .. } => "is-host",
            Self::FileInit { .. } => "file-init",
            Self::TextOperation { .. } => "text-operation",
            Self::FileCreate { .. } => "file-create",
            Self::FileDelete { .. } => "file-delete",
            Self::CursorSelection { .. } => "cursor-selection",
            Self::Error { .. } => "error",
        }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Not connected")]
    NotConnected,
}
