//! # tandem-collab — Real-time collaborative text editing over WebSocket
//!
//! Keeps every participant's copy of a set of text documents convergent
//! using operational transformation with a central authority.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐    WebSocket     ┌──────────────────────┐
//! │ SyncClient       │ ◄──────────────► │ SyncServer           │
//! │  ReconcileEngine │    JSON frames   │  CollabHub           │
//! │  Roster          │                  │   SessionRegistry    │
//! └──────────────────┘                  │   DocumentAuthority  │
//!                                       └──────────┬───────────┘
//!                                                  │
//!                                          ┌───────┴───────┐
//!                                          │ Fanout        │
//!                                          │ (per-conn q)  │
//!                                          └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire messages
//! - [`authority`] — per-document version history and rebasing
//! - [`session`] — participants, host designation and admission
//! - [`hub`] — turns inbound messages into deliveries
//! - [`broadcast`] — per-connection outbound queues
//! - [`server`] — WebSocket sync server
//! - [`reconcile`] — client-side in-flight/pending bookkeeping
//! - [`presence`] — client-side roster and remote cursors
//! - [`client`] — WebSocket sync client

pub mod authority;
pub mod broadcast;
pub mod client;
pub mod hub;
pub mod presence;
pub mod protocol;
pub mod reconcile;
pub mod server;
pub mod session;

// Re-exports for convenience
pub use authority::{AuthorityError, DocumentAuthority, DocumentState, SeedOutcome};
pub use broadcast::{Fanout, FanoutStats, Frame};
pub use client::{ClientError, ConnectionState, SyncClient, SyncEvent};
pub use hub::{CollabHub, Dispatch, Outbox};
pub use presence::{AdmissionRequest, RemoteCursor, Roster};
pub use protocol::{ProtocolError, SessionId, UserEntry, WireMessage};
pub use reconcile::{DocumentSync, LocalEdit, Outgoing, ReconcileEngine, ReconcileError, RemoteOutcome};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use session::{AdmissionDenied, JoinOutcome, Participant, ParticipantStatus, SessionRegistry};
