//! The text operation value type.
//!
//! Wire shape (JSON):
//! ```text
//! [ {"retain": 3}, {"insert": "X"}, {"delete": "ab"} ]
//! ```
//!
//! Operations are built with the chaining constructors and are never
//! mutated after construction. Adjacent components of the same kind are
//! merged and an insert is always placed before an adjacent delete, so two
//! operations with the same effect compare equal.

use serde::{Deserialize, Serialize};

use crate::{char_len, split_chars, OtError};

/// One step of a [`TextOperation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    /// Skip `n` chars unchanged.
    Retain(usize),
    /// Insert literal text at the cursor.
    Insert(String),
    /// Delete exactly this text at the cursor.
    Delete(String),
}

impl Component {
    /// Length in chars.
    pub fn len(&self) -> usize {
        match self {
            Component::Retain(n) => *n,
            Component::Insert(s) | Component::Delete(s) => char_len(s),
        }
    }

    /// Whether the component does nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An ordered sequence of components defined against a base text of
/// exactly [`base_len`](TextOperation::base_len) chars.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Component>", into = "Vec<Component>")]
pub struct TextOperation {
    components: Vec<Component>,
    base_len: usize,
    target_len: usize,
}

impl TextOperation {
    /// The empty operation (defined against the empty text).
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a retain of `n` chars.
    pub fn retain(mut self, n: usize) -> Self {
        self.push_retain(n);
        self
    }

    /// Append an insert of `text`.
    pub fn insert(mut self, text: impl Into<String>) -> Self {
        self.push_insert(text.into());
        self
    }

    /// Append a delete of `text`.
    pub fn delete(mut self, text: impl Into<String>) -> Self {
        self.push_delete(text.into());
        self
    }

    /// Append any component.
    pub fn with(mut self, component: Component) -> Self {
        self.push(component);
        self
    }

    pub(crate) fn push(&mut self, component: Component) {
        match component {
            Component::Retain(n) => self.push_retain(n),
            Component::Insert(s) => self.push_insert(s),
            Component::Delete(s) => self.push_delete(s),
        }
    }

    fn push_retain(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        self.base_len = self.base_len.saturating_add(n);
        self.target_len = self.target_len.saturating_add(n);
        if let Some(Component::Retain(last)) = self.components.last_mut() {
            *last = last.saturating_add(n);
        } else {
            self.components.push(Component::Retain(n));
        }
    }

    fn push_insert(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        self.target_len = self.target_len.saturating_add(char_len(&text));
        let len = self.components.len();
        let at = match self.components.as_mut_slice() {
            [.., Component::Insert(last)] => {
                last.push_str(&text);
                return;
            }
            [.., Component::Insert(prev), Component::Delete(_)] => {
                prev.push_str(&text);
                return;
            }
            [.., Component::Delete(_)] => len - 1,
            _ => len,
        };
        self.components.insert(at, Component::Insert(text));
    }

    fn push_delete(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        self.base_len = self.base_len.saturating_add(char_len(&text));
        if let Some(Component::Delete(last)) = self.components.last_mut() {
            last.push_str(&text);
        } else {
            self.components.push(Component::Delete(text));
        }
    }

    /// Components in order.
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Length of the text this operation applies to.
    pub fn base_len(&self) -> usize {
        self.base_len
    }

    /// Length of the text this operation produces.
    pub fn target_len(&self) -> usize {
        self.target_len
    }

    /// True when the operation leaves any base text unchanged.
    pub fn is_noop(&self) -> bool {
        self.components
            .iter()
            .all(|c| matches!(c, Component::Retain(_)))
    }

    /// Replay this operation over `base`.
    pub fn apply(&self, base: &str) -> Result<String, OtError> {
        let actual = char_len(base);
        if actual != self.base_len {
            return Err(OtError::LengthMismatch {
                expected: self.base_len,
                actual,
            });
        }

        let mut out = String::with_capacity(base.len() + self.target_len);
        let mut rest = base;
        let mut offset = 0;
        for component in &self.components {
            match component {
                Component::Retain(n) => {
                    Self::check_remaining(offset, *n, actual)?;
                    let (head, tail) = split_chars(rest, *n);
                    out.push_str(head);
                    rest = tail;
                    offset += n;
                }
                Component::Insert(text) => out.push_str(text),
                Component::Delete(text) => {
                    let n = char_len(text);
                    Self::check_remaining(offset, n, actual)?;
                    let (head, tail) = split_chars(rest, n);
                    if head != text.as_str() {
                        return Err(OtError::DeleteMismatch {
                            offset,
                            expected: text.clone(),
                            found: head.to_string(),
                        });
                    }
                    rest = tail;
                    offset += n;
                }
            }
        }
        Ok(out)
    }

    /// Fail unless `n` more chars remain after `offset` in a text of `actual` chars.
    fn check_remaining(offset: usize, n: usize, actual: usize) -> Result<(), OtError> {
        if n > actual - offset {
            return Err(OtError::LengthMismatch {
                expected: offset.saturating_add(n),
                actual,
            });
        }
        Ok(())
    }
}

/// Free-function form of [`TextOperation::apply`].
pub fn apply(base: &str, op: &TextOperation) -> Result<String, OtError> {
    op.apply(base)
}

impl TryFrom<Vec<Component>> for TextOperation {
    type Error = OtError;

    fn try_from(components: Vec<Component>) -> Result<Self, Self::Error> {
        let mut op = TextOperation::new();
        let (mut base_len, mut target_len) = (0usize, 0usize);
        for (index, component) in components.into_iter().enumerate() {
            if component.is_empty() {
                return Err(OtError::Malformed(format!(
                    "empty component at index {index}"
                )));
            }
            let n = component.len();
            let (consumes, produces) = match component {
                Component::Retain(_) => (n, n),
                Component::Insert(_) => (0, n),
                Component::Delete(_) => (n, 0),
            };
            base_len = base_len
                .checked_add(consumes)
                .ok_or_else(|| OtError::Malformed(format!("base length overflows at index {index}")))?;
            target_len = target_len
                .checked_add(produces)
                .ok_or_else(|| OtError::Malformed(format!("target length overflows at index {index}")))?;
            op.push(component);
        }
        Ok(op)
    }
}

impl From<TextOperation> for Vec<Component> {
    fn from(op: TextOperation) -> Self {
        op.components
    }
}
