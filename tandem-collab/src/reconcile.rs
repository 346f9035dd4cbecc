//! Client-side reconciliation engine.
//!
//! Per document the engine keeps the last text confirmed by the server, the
//! visible text (`shadow`), one operation in flight and a FIFO of local
//! operations not yet sent:
//!
//! ```text
//!   confirmed ──in_flight──► · ──pending[0]──► · ── … ──► shadow (on screen)
//!      @revision
//! ```
//!
//! Local edits extend the chain on the right. An acknowledgment moves
//! `confirmed` one step right. A remote operation is applied to `confirmed`
//! as is, and to `shadow` after being transformed past every unacknowledged
//! local operation (remote on the left, local on the right), while the local
//! operations are rewritten to follow it.

use std::collections::{HashMap, VecDeque};

use tandem_ot::{transform, Mutation, OtError, Side, TextOperation};
use thiserror::Error;

use crate::protocol::SessionId;

/// A raw edit reported by the editing surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEdit {
    /// Char offset into the text before the edit.
    pub offset: usize,
    pub removed: String,
    pub inserted: String,
}

impl LocalEdit {
    pub fn insert(offset: usize, text: impl Into<String>) -> Self {
        Self {
            offset,
            removed: String::new(),
            inserted: text.into(),
        }
    }

    pub fn delete(offset: usize, text: impl Into<String>) -> Self {
        Self {
            offset,
            removed: text.into(),
            inserted: String::new(),
        }
    }
}

/// An operation to transmit, tagged with the revision it is based on.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub file: String,
    pub revision: u64,
    pub op: TextOperation,
}

/// What an inbound `text-operation` did.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome {
    /// Our in-flight operation was committed; `next` must be sent if present.
    Acknowledged { next: Option<Outgoing> },
    /// A remote operation was applied to the visible text.
    Applied {
        op: TextOperation,
        mutations: Vec<Mutation>,
    },
    /// Already seen; nothing changed.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("document {0} is not open")]
    UnknownDocument(String),

    /// Local state no longer matches the server. The document was dropped.
    #[error("{file}: local state diverged: {source}")]
    Desync {
        file: String,
        #[source]
        source: OtError,
    },

    /// A version arrived that does not follow the local revision. The
    /// document was dropped.
    #[error("{file}: got version {version} at revision {revision}")]
    OutOfOrder { file: String, revision: u64, version: u64 },
}

impl ReconcileError {
    /// Whether the document must be bootstrapped again.
    pub fn needs_resync(&self) -> bool {
        !matches!(self, ReconcileError::UnknownDocument(_))
    }

    pub fn file(&self) -> &str {
        match self {
            ReconcileError::UnknownDocument(file)
            | ReconcileError::Desync { file, .. }
            | ReconcileError::OutOfOrder { file, .. } => file,
        }
    }
}

/// Sync state of one document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSync {
    confirmed: String,
    shadow: String,
    revision: u64,
    in_flight: Option<TextOperation>,
    pending: VecDeque<TextOperation>,
}

impl DocumentSync {
    fn new(content: String, revision: u64) -> Self {
        Self {
            confirmed: content.clone(),
            shadow: content,
            revision,
            in_flight: None,
            pending: VecDeque::new(),
        }
    }

    /// Visible text, local edits included.
    pub fn shadow(&self) -> &str {
        &self.shadow
    }

    /// Server text at `revision`.
    pub fn confirmed(&self) -> &str {
        &self.confirmed
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn in_flight(&self) -> Option<&TextOperation> {
        self.in_flight.as_ref()
    }

    pub fn pending(&self) -> impl Iterator<Item = &TextOperation> {
        self.pending.iter()
    }

    pub fn has_unacknowledged(&self) -> bool {
        self.in_flight.is_some() || !self.pending.is_empty()
    }

    /// Everything not yet acknowledged, as one operation over `confirmed`.
    pub fn outstanding(&self) -> Result<TextOperation, OtError> {
        let mut chain = self.in_flight.iter().chain(self.pending.iter());
        let Some(first) = chain.next() else {
            return Ok(TextOperation::new().retain(self.confirmed.chars().count()));
        };
        chain.try_fold(first.clone(), |acc, op| acc.compose(op))
    }

    fn flush(&mut self, file: &str) -> Option<Outgoing> {
        if self.in_flight.is_some() {
            return None;
        }
        let op = self.pending.pop_front()?;
        self.in_flight = Some(op.clone());
        Some(Outgoing {
            file: file.to_string(),
            revision: self.revision,
            op,
        })
    }

    /// Rebase `incoming` past the unacknowledged local operations and apply
    /// it. Nothing is modified unless every step succeeds.
    fn integrate(&mut self, incoming: &TextOperation) -> Result<TextOperation, OtError> {
        let mut remote = incoming.clone();

        let in_flight = match &self.in_flight {
            Some(local) => {
                let rebased_local = transform(local, &remote, Side::Right)?;
                remote = transform(&remote, local, Side::Left)?;
                Some(rebased_local)
            }
            None => None,
        };

        let mut pending = VecDeque::with_capacity(self.pending.len());
        for local in &self.pending {
            let rebased_local = transform(local, &remote, Side::Right)?;
            remote = transform(&remote, local, Side::Left)?;
            pending.push_back(rebased_local);
        }

        let confirmed = incoming.apply(&self.confirmed)?;
        let shadow = remote.apply(&self.shadow)?;

        self.confirmed = confirmed;
        self.shadow = shadow;
        self.in_flight = in_flight;
        self.pending = pending;
        Ok(remote)
    }
}

/// Reconciliation state of one participant across all documents.
#[derive(Debug, Clone)]
pub struct ReconcileEngine {
    session_id: SessionId,
    documents: HashMap<String, DocumentSync>,
}

impl ReconcileEngine {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            documents: HashMap::new(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Adopt the server's full state of `file`, discarding local state.
    pub fn file_init(&mut self, file: &str, content: &str, version: u64) {
        if let Some(previous) = self.documents.get(file) {
            if previous.has_unacknowledged() {
                log::warn!("{file}: unacknowledged edits discarded by file-init");
            }
        }
        self.documents
            .insert(file.to_string(), DocumentSync::new(content.to_string(), version));
    }

    /// Turn a local edit into an operation. Returns the operation to send
    /// now, if nothing else is in flight.
    pub fn local_edit(&mut self, file: &str, edit: &LocalEdit) -> Result<Option<Outgoing>, ReconcileError> {
        let doc = self
            .documents
            .get_mut(file)
            .ok_or_else(|| ReconcileError::UnknownDocument(file.to_string()))?;

        let op = TextOperation::from_edit(&doc.shadow, edit.offset, &edit.removed, &edit.inserted)
            .and_then(|op| op.apply(&doc.shadow).map(|text| (op, text)));
        let (op, text) = match op {
            Ok(applied) => applied,
            Err(source) => return Err(self.drop_document(file, source)),
        };

        if op.is_noop() {
            return Ok(None);
        }
        doc.shadow = text;
        doc.pending.push_back(op);
        Ok(doc.flush(file))
    }

    /// Handle an inbound `text-operation` that produced `version` on the server.
    pub fn receive_operation(
        &mut self,
        file: &str,
        version: u64,
        op: &TextOperation,
        origin: Option<SessionId>,
    ) -> Result<RemoteOutcome, ReconcileError> {
        let own_session = self.session_id;
        let doc = self
            .documents
            .get_mut(file)
            .ok_or_else(|| ReconcileError::UnknownDocument(file.to_string()))?;

        if version <= doc.revision {
            log::debug!("{file}: version {version} already seen (revision {})", doc.revision);
            return Ok(RemoteOutcome::Duplicate);
        }
        if version != doc.revision + 1 {
            let revision = doc.revision;
            self.documents.remove(file);
            log::warn!("{file}: version {version} skips past revision {revision}, resyncing");
            return Err(ReconcileError::OutOfOrder {
                file: file.to_string(),
                revision,
                version,
            });
        }

        if origin == Some(own_session) {
            let Some(acked) = doc.in_flight.take() else {
                let revision = doc.revision;
                self.documents.remove(file);
                log::warn!("{file}: acknowledgment without an operation in flight");
                return Err(ReconcileError::OutOfOrder {
                    file: file.to_string(),
                    revision,
                    version,
                });
            };
            // The committed form equals `acked` as rebased locally.
            match op.apply(&doc.confirmed) {
                Ok(confirmed) => doc.confirmed = confirmed,
                Err(source) => return Err(self.drop_document(file, source)),
            }
            log::trace!(
                "{file}: acknowledged as version {version} ({} chars inserted)",
                acked.target_len().saturating_sub(acked.base_len())
            );
            doc.revision = version;
            let next = doc.flush(file);
            return Ok(RemoteOutcome::Acknowledged { next });
        }

        match doc.integrate(op) {
            Ok(applied) => {
                doc.revision = version;
                let mutations = applied.mutations();
                Ok(RemoteOutcome::Applied {
                    op: applied,
                    mutations,
                })
            }
            Err(source) => Err(self.drop_document(file, source)),
        }
    }

    fn drop_document(&mut self, file: &str, source: OtError) -> ReconcileError {
        log::warn!("{file}: {source}, dropping local state");
        self.documents.remove(file);
        ReconcileError::Desync {
            file: file.to_string(),
            source,
        }
    }

    pub fn document(&self, file: &str) -> Option<&DocumentSync> {
        self.documents.get(file)
    }

    /// Visible text of `file`.
    pub fn text(&self, file: &str) -> Option<&str> {
        self.documents.get(file).map(DocumentSync::shadow)
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.documents.keys().map(String::as_str)
    }

    /// Forget one document.
    pub fn forget(&mut self, file: &str) -> bool {
        self.documents.remove(file).is_some()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.documents.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::DocumentAuthority;
    use uuid::Uuid;

    fn engine_with(file: &str, content: &str, version: u64) -> ReconcileEngine {
        let mut engine = ReconcileEngine::new(Uuid::new_v4());
        engine.file_init(file, content, version);
        engine
    }

    fn assert_chain_holds(engine: &ReconcileEngine, file: &str) {
        let doc = engine.document(file).unwrap();
        let outstanding = doc.outstanding().unwrap();
        assert_eq!(outstanding.apply(doc.confirmed()).unwrap(), doc.shadow());
    }

    #[test]
    fn test_local_edit_goes_in_flight() {
        let mut engine = engine_with("f", "abc", 4);
        let out = engine
            .local_edit("f", &LocalEdit::insert(3, "!"))
            .unwrap()
            .unwrap();
        assert_eq!(out.revision, 4);
        assert_eq!(out.op, TextOperation::new().retain(3).insert("!"));
        assert_eq!(engine.text("f"), Some("abc!"));
        assert_eq!(engine.document("f").unwrap().confirmed(), "abc");
    }

    #[test]
    fn test_second_edit_waits_for_ack() {
        let mut engine = engine_with("f", "", 0);
        let first = engine.local_edit("f", &LocalEdit::insert(0, "a")).unwrap().unwrap();
        assert!(engine.local_edit("f", &LocalEdit::insert(1, "b")).unwrap().is_none());
        assert_eq!(engine.document("f").unwrap().pending().count(), 1);
        assert_chain_holds(&engine, "f");

        let own = engine.session_id();
        let outcome = engine.receive_operation("f", 1, &first.op, Some(own)).unwrap();
        let RemoteOutcome::Acknowledged { next: Some(next) } = outcome else {
            panic!("expected flush, got {outcome:?}");
        };
        assert_eq!(next.revision, 1);
        assert_eq!(next.op, TextOperation::new().retain(1).insert("b"));
        assert_eq!(engine.document("f").unwrap().confirmed(), "a");
        assert_chain_holds(&engine, "f");
    }

    #[test]
    fn test_duplicate_ack_is_ignored() {
        let mut engine = engine_with("f", "", 0);
        let out = engine.local_edit("f", &LocalEdit::insert(0, "ab")).unwrap().unwrap();
        let own = engine.session_id();

        engine.receive_operation("f", 1, &out.op, Some(own)).unwrap();
        let again = engine.receive_operation("f", 1, &out.op, Some(own)).unwrap();
        assert_eq!(again, RemoteOutcome::Duplicate);

        let doc = engine.document("f").unwrap();
        assert_eq!(doc.revision(), 1);
        assert_eq!(doc.shadow(), "ab");
        assert_eq!(doc.confirmed(), "ab");
    }

    #[test]
    fn test_remote_without_local_state() {
        let mut engine = engine_with("f", "abc", 0);
        let remote = TextOperation::new().retain(1).delete("b").retain(1);
        let outcome = engine
            .receive_operation("f", 1, &remote, Some(Uuid::new_v4()))
            .unwrap();
        assert_eq!(
            outcome,
            RemoteOutcome::Applied {
                op: remote.clone(),
                mutations: vec![Mutation::Delete { offset: 1, len: 1 }],
            }
        );
        assert_eq!(engine.text("f"), Some("ac"));
    }

    #[test]
    fn test_in_flight_survives_remote_and_converges() {
        // Server and two clients on "abc" at version 0.
        let mut server = DocumentAuthority::new();
        server.seed("f", "abc");
        let mut a = engine_with("f", "abc", 0);
        let mut b = engine_with("f", "abc", 0);

        let from_a = a.local_edit("f", &LocalEdit::insert(3, "X")).unwrap().unwrap();
        let from_b = b.local_edit("f", &LocalEdit::insert(0, "Y")).unwrap().unwrap();

        let (op_a, v1) = server.submit("f", from_a.revision, from_a.op, a.session_id()).unwrap();
        let (op_b, v2) = server.submit("f", from_b.revision, from_b.op, b.session_id()).unwrap();

        // B sees A's commit while its own op is still in flight.
        let outcome = b.receive_operation("f", v1, &op_a, Some(a.session_id())).unwrap();
        assert!(matches!(outcome, RemoteOutcome::Applied { .. }));
        assert_chain_holds(&b, "f");
        b.receive_operation("f", v2, &op_b, Some(b.session_id())).unwrap();

        a.receive_operation("f", v1, &op_a, Some(a.session_id())).unwrap();
        a.receive_operation("f", v2, &op_b, Some(b.session_id())).unwrap();

        let expected = server.document("f").unwrap().content();
        assert_eq!(expected, "YabcX");
        for engine in [&a, &b] {
            let doc = engine.document("f").unwrap();
            assert_eq!(doc.shadow(), expected);
            assert_eq!(doc.confirmed(), expected);
            assert_eq!(doc.revision(), 2);
            assert!(!doc.has_unacknowledged());
        }
    }

    #[test]
    fn test_remote_rebased_past_pending_queue() {
        let mut server = DocumentAuthority::new();
        server.seed("f", "--");
        let mut a = engine_with("f", "--", 0);
        let mut b = engine_with("f", "--", 0);

        let sent = a.local_edit("f", &LocalEdit::insert(1, "a")).unwrap().unwrap();
        assert!(a.local_edit("f", &LocalEdit::insert(2, "a")).unwrap().is_none());

        let from_b = b.local_edit("f", &LocalEdit::insert(1, "B")).unwrap().unwrap();
        let (op_b, v1) = server.submit("f", 0, from_b.op, b.session_id()).unwrap();

        a.receive_operation("f", v1, &op_b, Some(b.session_id())).unwrap();
        assert_chain_holds(&a, "f");
        let shown_before_ack = a.text("f").unwrap().to_string();

        let (op_a1, v2) = server.submit("f", sent.revision, sent.op, a.session_id()).unwrap();
        let outcome = a.receive_operation("f", v2, &op_a1, Some(a.session_id())).unwrap();
        let RemoteOutcome::Acknowledged { next: Some(next) } = outcome else {
            panic!("expected flush");
        };
        let (op_a2, v3) = server.submit("f", next.revision, next.op, a.session_id()).unwrap();
        a.receive_operation("f", v3, &op_a2, Some(a.session_id())).unwrap();

        let final_text = server.document("f").unwrap().content().to_string();
        assert_eq!(a.text("f").unwrap(), final_text);
        assert_eq!(shown_before_ack, final_text);
        assert_eq!(final_text, "-Baa-");
    }

    #[test]
    fn test_version_gap_drops_document() {
        let mut engine = engine_with("f", "abc", 0);
        let err = engine
            .receive_operation("f", 2, &TextOperation::new().retain(3), Some(Uuid::new_v4()))
            .unwrap_err();
        assert!(matches!(err, ReconcileError::OutOfOrder { revision: 0, version: 2, .. }));
        assert!(err.needs_resync());
        assert!(engine.document("f").is_none());
    }

    #[test]
    fn test_mismatched_remote_drops_document() {
        let mut engine = engine_with("f", "abc", 0);
        let err = engine
            .receive_operation("f", 1, &TextOperation::new().retain(7), Some(Uuid::new_v4()))
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Desync { .. }));
        assert_eq!(err.file(), "f");
        assert!(engine.text("f").is_none());
    }

    #[test]
    fn test_edit_on_unknown_document() {
        let mut engine = ReconcileEngine::new(Uuid::new_v4());
        let err = engine.local_edit("nope", &LocalEdit::insert(0, "x")).unwrap_err();
        assert_eq!(err, ReconcileError::UnknownDocument("nope".into()));
        assert!(!err.needs_resync());
    }

    #[test]
    fn test_edit_disagreeing_with_shadow_is_desync() {
        let mut engine = engine_with("f", "abc", 0);
        let err = engine.local_edit("f", &LocalEdit::delete(0, "zz")).unwrap_err();
        assert!(matches!(err, ReconcileError::Desync { .. }));
        assert!(engine.document("f").is_none());
    }

    #[test]
    fn test_empty_edit_sends_nothing() {
        let mut engine = engine_with("f", "abc", 0);
        assert!(engine.local_edit("f", &LocalEdit::insert(1, "")).unwrap().is_none());
        assert!(!engine.document("f").unwrap().has_unacknowledged());
    }

    #[test]
    fn test_file_init_resets_state() {
        let mut engine = engine_with("f", "abc", 0);
        engine.local_edit("f", &LocalEdit::insert(0, "x")).unwrap();
        engine.file_init("f", "server", 9);
        let doc = engine.document("f").unwrap();
        assert_eq!(doc.shadow(), "server");
        assert_eq!(doc.revision(), 9);
        assert!(!doc.has_unacknowledged());
    }
}
