//! `compose` and `transform`.
//!
//! Both walk two component lists in lockstep, splitting components so
//! that each step consumes the same number of chars from either side.

use serde::{Deserialize, Serialize};

use crate::operation::{Component, TextOperation};
use crate::{split_chars, OtError};

/// Tie-break for two inserts at the same position.
///
/// `Left` places the transformed operation's insert before the other
/// operation's insert, `Right` places it after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Retain,
    Insert,
    Delete,
}

/// Walks a component list, handing out prefixes of the head component.
struct Cursor<'a> {
    rest: std::slice::Iter<'a, Component>,
    head: Option<Component>,
}

impl<'a> Cursor<'a> {
    fn new(op: &'a TextOperation) -> Self {
        let mut rest = op.components().iter();
        let head = rest.next().cloned();
        Self { rest, head }
    }

    fn kind(&self) -> Option<Kind> {
        self.head.as_ref().map(|c| match c {
            Component::Retain(_) => Kind::Retain,
            Component::Insert(_) => Kind::Insert,
            Component::Delete(_) => Kind::Delete,
        })
    }

    fn head_len(&self) -> usize {
        self.head.as_ref().map_or(0, Component::len)
    }

    /// Take the whole head component.
    fn take_all(&mut self) -> Option<Component> {
        let head = self.head.take();
        self.head = self.rest.next().cloned();
        head
    }

    /// Take the first `n` chars of the head component (`n <= head_len`).
    fn take(&mut self, n: usize) -> Option<Component> {
        if n >= self.head_len() {
            return self.take_all();
        }
        let head = self.head.take()?;
        let (taken, left) = match head {
            Component::Retain(m) => (Component::Retain(n), Component::Retain(m - n)),
            Component::Insert(s) => {
                let (a, b) = split_chars(&s, n);
                (Component::Insert(a.to_string()), Component::Insert(b.to_string()))
            }
            Component::Delete(s) => {
                let (a, b) = split_chars(&s, n);
                (Component::Delete(a.to_string()), Component::Delete(b.to_string()))
            }
        };
        self.head = Some(left);
        Some(taken)
    }
}

fn text_of(component: Option<Component>) -> String {
    match component {
        Some(Component::Insert(s)) | Some(Component::Delete(s)) => s,
        _ => String::new(),
    }
}

/// Combine `a` then `b` into one operation over `a`'s base.
///
/// Requires `a.target_len() == b.base_len()`.
pub fn compose(a: &TextOperation, b: &TextOperation) -> Result<TextOperation, OtError> {
    if a.target_len() != b.base_len() {
        return Err(OtError::LengthMismatch {
            expected: b.base_len(),
            actual: a.target_len(),
        });
    }

    let mut out = TextOperation::new();
    let mut ca = Cursor::new(a);
    let mut cb = Cursor::new(b);
    // Position in the intermediate text (a's target, b's base).
    let mut offset = 0;

    loop {
        match (ca.kind(), cb.kind()) {
            (None, None) => break,
            (Some(Kind::Delete), _) => {
                if let Some(c) = ca.take_all() {
                    out.push(c);
                }
            }
            (_, Some(Kind::Insert)) => {
                if let Some(c) = cb.take_all() {
                    out.push(c);
                }
            }
            (None, Some(_)) | (Some(_), None) => {
                return Err(OtError::LengthMismatch {
                    expected: b.base_len(),
                    actual: a.target_len(),
                });
            }
            (Some(Kind::Retain), Some(Kind::Retain)) => {
                let n = ca.head_len().min(cb.head_len());
                ca.take(n);
                cb.take(n);
                out.push(Component::Retain(n));
                offset += n;
            }
            (Some(Kind::Insert), Some(Kind::Delete)) => {
                let n = ca.head_len().min(cb.head_len());
                let inserted = text_of(ca.take(n));
                let deleted = text_of(cb.take(n));
                if inserted != deleted {
                    return Err(OtError::DeleteMismatch {
                        offset,
                        expected: deleted,
                        found: inserted,
                    });
                }
                offset += n;
            }
            (Some(Kind::Insert), Some(Kind::Retain)) => {
                let n = ca.head_len().min(cb.head_len());
                if let Some(c) = ca.take(n) {
                    out.push(c);
                }
                cb.take(n);
                offset += n;
            }
            (Some(Kind::Retain), Some(Kind::Delete)) => {
                let n = ca.head_len().min(cb.head_len());
                ca.take(n);
                if let Some(c) = cb.take(n) {
                    out.push(c);
                }
                offset += n;
            }
        }
    }

    Ok(out)
}

/// Rewrite `a` so it applies after `b`, both defined on the same base.
///
/// `side` decides the order of two inserts at the same position, from
/// `a`'s point of view. For convergence the other operation must be
/// transformed with the opposite side:
///
/// ```text
/// apply(apply(s, a), transform(b, a, Right)) == apply(apply(s, b), transform(a, b, Left))
/// ```
pub fn transform(a: &TextOperation, b: &TextOperation, side: Side) -> Result<TextOperation, OtError> {
    if a.base_len() != b.base_len() {
        return Err(OtError::LengthMismatch {
            expected: b.base_len(),
            actual: a.base_len(),
        });
    }

    let mut out = TextOperation::new();
    let mut ca = Cursor::new(a);
    let mut cb = Cursor::new(b);

    loop {
        match (ca.kind(), cb.kind()) {
            (None, None) => break,
            (Some(Kind::Insert), Some(Kind::Insert)) if side == Side::Right => {
                out.push(Component::Retain(cb.head_len()));
                cb.take_all();
            }
            (Some(Kind::Insert), _) => {
                if let Some(c) = ca.take_all() {
                    out.push(c);
                }
            }
            (_, Some(Kind::Insert)) => {
                out.push(Component::Retain(cb.head_len()));
                cb.take_all();
            }
            (None, Some(_)) | (Some(_), None) => {
                return Err(OtError::LengthMismatch {
                    expected: b.base_len(),
                    actual: a.base_len(),
                });
            }
            (Some(Kind::Retain), Some(Kind::Retain)) => {
                let n = ca.head_len().min(cb.head_len());
                ca.take(n);
                cb.take(n);
                out.push(Component::Retain(n));
            }
            (Some(Kind::Delete), Some(Kind::Delete)) => {
                // Both removed the same text; nothing left for `a` to do.
                let n = ca.head_len().min(cb.head_len());
                ca.take(n);
                cb.take(n);
            }
            (Some(Kind::Delete), Some(Kind::Retain)) => {
                let n = ca.head_len().min(cb.head_len());
                if let Some(c) = ca.take(n) {
                    out.push(c);
                }
                cb.take(n);
            }
            (Some(Kind::Retain), Some(Kind::Delete)) => {
                let n = ca.head_len().min(cb.head_len());
                ca.take(n);
                cb.take(n);
            }
        }
    }

    Ok(out)
}

/// Transform two concurrent operations against each other, `a` on the
/// left. Returns `(a', b')` where `a'` applies after `b` and `b'` after `a`.
pub fn transform_pair(
    a: &TextOperation,
    b: &TextOperation,
) -> Result<(TextOperation, TextOperation), OtError> {
    Ok((transform(a, b, Side::Left)?, transform(b, a, Side::Right)?))
}

impl TextOperation {
    /// Method form of [`compose`].
    pub fn compose(&self, next: &TextOperation) -> Result<TextOperation, OtError> {
        compose(self, next)
    }

    /// Method form of [`transform`].
    pub fn transform(&self, other: &TextOperation, side: Side) -> Result<TextOperation, OtError> {
        transform(self, other, side)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converge(base: &str, a: &TextOperation, b: &TextOperation) -> (String, String) {
        let via_a = transform(b, a, Side::Right)
            .unwrap()
            .apply(&a.apply(base).unwrap())
            .unwrap();
        let via_b = transform(a, b, Side::Left)
            .unwrap()
            .apply(&b.apply(base).unwrap())
            .unwrap();
        (via_a, via_b)
    }

    #[test]
    fn test_compose_insert_then_delete_cancels() {
        let a = TextOperation::new().retain(2).insert("XY");
        let b = TextOperation::new().retain(2).delete("XY");
        let c = compose(&a, &b).unwrap();
        assert!(c.is_noop());
        assert_eq!(c.apply("ab").unwrap(), "ab");
    }

    #[test]
    fn test_compose_matches_sequential_apply() {
        let base = "hello world";
        let a = TextOperation::new().retain(5).delete(" world").insert(", there");
        let mid = a.apply(base).unwrap();
        assert_eq!(mid, "hello, there");
        let b = TextOperation::new().insert(">> ").retain(7).delete("there").insert("you");
        let end = b.apply(&mid).unwrap();
        assert_eq!(compose(&a, &b).unwrap().apply(base).unwrap(), end);
        assert_eq!(end, ">> hello, you");
    }

    #[test]
    fn test_compose_length_mismatch() {
        let a = TextOperation::new().insert("ab");
        let b = TextOperation::new().retain(3);
        assert!(matches!(compose(&a, &b), Err(OtError::LengthMismatch { .. })));
    }

    #[test]
    fn test_compose_rejects_wrong_delete_of_insert() {
        let a = TextOperation::new().insert("ab");
        let b = TextOperation::new().delete("xy");
        assert!(matches!(compose(&a, &b), Err(OtError::DeleteMismatch { .. })));
    }

    #[test]
    fn test_transform_independent_inserts() {
        // "abc": A appends X, B prepends Y.
        let a = TextOperation::new().retain(3).insert("X");
        let b = TextOperation::new().insert("Y").retain(3);
        let b_prime = transform(&b, &a, Side::Left).unwrap();
        assert_eq!(b_prime, TextOperation::new().insert("Y").retain(4));
        assert_eq!(b_prime.apply("abcX").unwrap(), "YabcX");

        let (x, y) = converge("abc", &a, &b);
        assert_eq!(x, "YabcX");
        assert_eq!(y, "YabcX");
    }

    #[test]
    fn test_transform_tie_break() {
        let a = TextOperation::new().retain(1).insert("a");
        let b = TextOperation::new().retain(1).insert("b");

        let left = transform(&a, &b, Side::Left).unwrap();
        assert_eq!(left.apply("_b_").unwrap(), "_ab_");
        let right = transform(&a, &b, Side::Right).unwrap();
        assert_eq!(right.apply("_b_").unwrap(), "_ba_");

        let (x, y) = converge("__", &a, &b);
        assert_eq!(x, y);
        assert_eq!(x, "_ab_");
    }

    #[test]
    fn test_transform_overlapping_deletes() {
        let base = "abcdef";
        let a = TextOperation::new().retain(1).delete("bcd").retain(2);
        let b = TextOperation::new().retain(2).delete("cde").retain(1);
        let (x, y) = converge(base, &a, &b);
        assert_eq!(x, "af");
        assert_eq!(y, "af");
    }

    #[test]
    fn test_transform_delete_against_insert_inside() {
        let base = "abcd";
        let a = TextOperation::new().retain(1).delete("bc").retain(1);
        let b = TextOperation::new().retain(2).insert("XX").retain(2);
        let (x, y) = converge(base, &a, &b);
        assert_eq!(x, y);
        assert_eq!(x, "aXXd");
    }

    #[test]
    fn test_transform_length_mismatch() {
        let a = TextOperation::new().retain(2);
        let b = TextOperation::new().retain(3);
        assert!(transform(&a, &b, Side::Left).is_err());
    }

    #[test]
    fn test_transform_pair_sides() {
        let a = TextOperation::new().insert("A");
        let b = TextOperation::new().insert("B");
        let (a_prime, b_prime) = transform_pair(&a, &b).unwrap();
        assert_eq!(a_prime.apply("B").unwrap(), "AB");
        assert_eq!(b_prime.apply("A").unwrap(), "AB");
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Left.opposite(), Side::Right);
        assert_eq!(Side::Right.opposite(), Side::Left);
    }
}
