//! # tandem-ot — Operational Transformation for flat text
//!
//! A [`TextOperation`] is a sequence of retain / insert / delete components
//! that rewrites one exact base text into a target text. The algebra is:
//!
//! ```text
//!          apply(base, a)            apply(base, b)
//!   base ─────────────────► A   base ─────────────────► B
//!     │                        │
//!     │ transform(b, a, Right) │ transform(a, b, Left)
//!     ▼                        ▼
//!     A ───────────────────►  X  ◄─────────────────── B
//! ```
//!
//! Both paths reach the same text `X` (convergence), and
//! `apply(apply(base, a), b) == apply(base, compose(a, b))`.
//!
//! ## Modules
//!
//! - [`operation`] — the operation type, builder and `apply`
//! - [`algebra`] — `compose` and `transform`
//! - [`edit`] — conversion between editor edits and operations
//!
//! Lengths and offsets count Unicode scalar values, not bytes.

pub mod algebra;
pub mod edit;
pub mod operation;

pub use algebra::{compose, transform, transform_pair, Side};
pub use edit::Mutation;
pub use operation::{apply, Component, TextOperation};

use thiserror::Error;

/// Errors produced by the operation algebra.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OtError {
    #[error("length mismatch: operation expects {expected} chars, found {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("delete mismatch at offset {offset}: expected {expected:?}, found {found:?}")]
    DeleteMismatch {
        offset: usize,
        expected: String,
        found: String,
    },

    #[error("edit out of bounds: offset {offset} in text of {len} chars")]
    OutOfBounds { offset: usize, len: usize },

    #[error("malformed operation: {0}")]
    Malformed(String),
}

/// Number of chars in `s`.
#[inline]
pub(crate) fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split `s` after `n` chars. `n` past the end yields `(s, "")`.
#[inline]
pub(crate) fn split_chars(s: &str, n: usize) -> (&str, &str) {
    match s.char_indices().nth(n) {
        Some((idx, _)) => s.split_at(idx),
        None => (s, ""),
    }
}
