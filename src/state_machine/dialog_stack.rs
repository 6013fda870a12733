//! Delegation stack of active assistants
//!
//! The primary assistant is the implicit base: an empty stack means the
//! root is in control.

use crate::registry::ROOT_ASSISTANT;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DialogStack(Vec<String>);

impl DialogStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stack with `assistant_id` appended
    pub fn push(&self, assistant_id: impl Into<String>) -> Self {
        let mut next = self.0.clone();
        next.push(assistant_id.into());
        Self(next)
    }

    /// Stack without its last element. Popping the root is a no-op.
    pub fn pop(&self) -> Self {
        let mut next = self.0.clone();
        next.pop();
        Self(next)
    }

    /// Active assistant id
    pub fn current(&self) -> &str {
        self.0.last().map_or(ROOT_ASSISTANT, String::as_str)
    }

    /// Assistant that regains control when the current one leaves
    pub fn parent(&self) -> &str {
        self.0.iter().rev().nth(1).map_or(ROOT_ASSISTANT, String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[allow(dead_code)] // Used in tests
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for DialogStack {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}
