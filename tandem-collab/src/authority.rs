//! Server-side document authority.
//!
//! One [`DocumentState`] per file path. Every accepted operation is rebased
//! onto the current version, applied to the authoritative content, appended
//! to history and given the next version number:
//!
//! ```text
//!  client op @ rev r        history[r..v]
//!        │                       │
//!        └──► transform ◄────────┘   (committed history wins ties)
//!                 │
//!                 ▼
//!          apply to content ──► history.push ──► version = v + 1
//! ```
//!
//! The authority is plain owned state; callers serialize access to it
//! (the hub holds it behind a single lock).

use std::collections::BTreeMap;

use tandem_ot::{transform, OtError, Side, TextOperation};
use thiserror::Error;

use crate::protocol::SessionId;

/// Authoritative state of one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentState {
    content: String,
    version: u64,
    /// `history[v]` took the document from version `v` to `v + 1`.
    history: Vec<TextOperation>,
}

impl DocumentState {
    fn seeded(content: String) -> Self {
        Self {
            content,
            version: 0,
            history: Vec::new(),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn history(&self) -> &[TextOperation] {
        &self.history
    }
}

/// Errors from [`DocumentAuthority::submit`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorityError {
    /// The client claims a revision the document has not reached.
    #[error("{file}: operation based on revision {base} but document is at {current}")]
    FutureRevision { file: String, base: u64, current: u64 },

    /// The rebased operation does not fit the authoritative content.
    #[error("{file}: operation does not apply: {source}")]
    Apply {
        file: String,
        #[source]
        source: OtError,
    },
}

/// Outcome of [`DocumentAuthority::seed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    /// The document did not exist and was created from the given content.
    Created,
    /// The document already existed; its content was kept.
    Existing,
}

/// Owns every document of the session.
#[derive(Debug, Clone, Default)]
pub struct DocumentAuthority {
    documents: BTreeMap<String, DocumentState>,
}

impl DocumentAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `file` from `content` unless it already exists. Either way the
    /// authoritative state is returned for pushing to the requester.
    pub fn seed(&mut self, file: &str, content: &str) -> (SeedOutcome, &DocumentState) {
        if self.documents.contains_key(file) {
            log::debug!("Seed for {file} ignored, document already active");
            let state = &self.documents[file];
            return (SeedOutcome::Existing, state);
        }
        log::info!("Document {file} seeded ({} chars)", content.chars().count());
        let state = self
            .documents
            .entry(file.to_string())
            .or_insert_with(|| DocumentState::seeded(content.to_string()));
        (SeedOutcome::Created, state)
    }

    /// Rebase `op` from `base_revision` onto the current version of `file`,
    /// apply it and record it. Returns the operation as committed and the
    /// new version.
    ///
    /// A path never seen before starts as an empty document at version 0.
    pub fn submit(
        &mut self,
        file: &str,
        base_revision: u64,
        op: TextOperation,
        origin: SessionId,
    ) -> Result<(TextOperation, u64), AuthorityError> {
        let state = self
            .documents
            .entry(file.to_string())
            .or_insert_with(|| DocumentState::seeded(String::new()));

        if base_revision > state.version {
            return Err(AuthorityError::FutureRevision {
                file: file.to_string(),
                base: base_revision,
                current: state.version,
            });
        }

        let mut rebased = op;
        // Bounded by base_revision <= version == history.len().
        for committed in &state.history[base_revision as usize..] {
            rebased = transform(&rebased, committed, Side::Right).map_err(|source| {
                AuthorityError::Apply {
                    file: file.to_string(),
                    source,
                }
            })?;
        }

        let content = rebased.apply(&state.content).map_err(|source| AuthorityError::Apply {
            file: file.to_string(),
            source,
        })?;

        state.content = content;
        state.history.push(rebased.clone());
        state.version += 1;

        log::trace!(
            "{file}: committed op from {origin} (base {base_revision}) as version {}",
            state.version
        );
        Ok((rebased, state.version))
    }

    /// Current state of `file`, if active.
    pub fn document(&self, file: &str) -> Option<&DocumentState> {
        self.documents.get(file)
    }

    /// All active documents, ordered by path.
    pub fn snapshots(&self) -> impl Iterator<Item = (&str, &DocumentState)> {
        self.documents.iter().map(|(path, state)| (path.as_str(), state))
    }

    /// Number of active documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
