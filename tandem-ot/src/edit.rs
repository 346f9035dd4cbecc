//! Boundary with an editing surface.
//!
//! Editors report raw edits as `(offset, removed, inserted)` and expect
//! remote changes back as positional mutations. Both directions are
//! expressed here in terms of [`TextOperation`].

use crate::operation::{Component, TextOperation};
use crate::{char_len, split_chars, OtError};

/// A single positional change for an editing surface.
///
/// Offsets refer to the text as it stands after all preceding mutations
/// of the same batch have been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Insert { offset: usize, text: String },
    Delete { offset: usize, len: usize },
}

impl TextOperation {
    /// Build the operation for an edit that replaced `removed` at `offset`
    /// with `inserted`, against `base`.
    ///
    /// Fails with [`OtError::OutOfBounds`] if the edit reaches past the end
    /// of `base`, and with [`OtError::DeleteMismatch`] if `base` does not
    /// contain `removed` at `offset`.
    pub fn from_edit(base: &str, offset: usize, removed: &str, inserted: &str) -> Result<Self, OtError> {
        let len = char_len(base);
        let removed_len = char_len(removed);
        if offset + removed_len > len {
            return Err(OtError::OutOfBounds {
                offset: offset + removed_len,
                len,
            });
        }

        let (_, tail) = split_chars(base, offset);
        let (actual, _) = split_chars(tail, removed_len);
        if actual != removed {
            return Err(OtError::DeleteMismatch {
                offset,
                expected: removed.to_string(),
                found: actual.to_string(),
            });
        }

        Ok(TextOperation::new()
            .retain(offset)
            .delete(removed)
            .insert(inserted)
            .retain(len - offset - removed_len))
    }

    /// Express this operation as positional mutations, in order.
    pub fn mutations(&self) -> Vec<Mutation> {
        let mut out = Vec::new();
        let mut cursor = 0;
        for component in self.components() {
            match component {
                Component::Retain(n) => cursor += n,
                Component::Insert(text) => {
                    out.push(Mutation::Insert {
                        offset: cursor,
                        text: text.clone(),
                    });
                    cursor += char_len(text);
                }
                Component::Delete(text) => out.push(Mutation::Delete {
                    offset: cursor,
                    len: char_len(text),
                }),
            }
        }
        out
    }
}

impl Mutation {
    /// Apply to a plain string (offsets in chars).
    pub fn apply_to(&self, text: &mut String) {
        match self {
            Mutation::Insert { offset, text: inserted } => {
                let at = byte_index(text, *offset);
                text.insert_str(at, inserted);
            }
            Mutation::Delete { offset, len } => {
                let start = byte_index(text, *offset);
                let end = byte_index(text, offset + len);
                text.replace_range(start..end, "");
            }
        }
    }
}

fn byte_index(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map_or(s.len(), |(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_edit_insert() {
        let op = TextOperation::from_edit("abc", 1, "", "XY").unwrap();
        assert_eq!(op, TextOperation::new().retain(1).insert("XY").retain(2));
        assert_eq!(op.apply("abc").unwrap(), "aXYbc");
    }

    #[test]
    fn test_from_edit_replace() {
        let op = TextOperation::from_edit("hello", 0, "he", "J").unwrap();
        assert_eq!(op.apply("hello").unwrap(), "Jllo");
        assert_eq!(op.base_len(), 5);
    }

    #[test]
    fn test_from_edit_out_of_bounds() {
        assert!(matches!(
            TextOperation::from_edit("abc", 2, "cd", ""),
            Err(OtError::OutOfBounds { .. })
        ));
        assert!(matches!(
            TextOperation::from_edit("abc", 4, "", "x"),
            Err(OtError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_from_edit_removed_text_must_match() {
        assert!(matches!(
            TextOperation::from_edit("abc", 0, "x", ""),
            Err(OtError::DeleteMismatch { .. })
        ));
    }

    #[test]
    fn test_mutations_replay_to_target() {
        let base = "the quick fox";
        let op = TextOperation::new()
            .retain(4)
            .delete("quick")
            .insert("slow")
            .retain(1)
            .insert("red ")
            .retain(3)
            .insert("!");
        let mutations = op.mutations();
        assert_eq!(
            mutations[0],
            Mutation::Insert { offset: 4, text: "slow".into() }
        );
        assert_eq!(mutations[1], Mutation::Delete { offset: 8, len: 5 });

        let mut text = base.to_string();
        for m in &mutations {
            m.apply_to(&mut text);
        }
        assert_eq!(text, op.apply(base).unwrap());
        assert_eq!(text, "the slow red fox!");
    }

    #[test]
    fn test_mutations_multibyte_offsets() {
        let op = TextOperation::new().retain(2).insert("ü").retain(1);
        let mut text = "éé!".to_string();
        for m in op.mutations() {
            m.apply_to(&mut text);
        }
        assert_eq!(text, "ééü!");
    }
}
