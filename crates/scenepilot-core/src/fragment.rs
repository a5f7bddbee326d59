use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Where a fragment came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name")]
pub enum FragmentOrigin {
    /// Extracted from the text of an assistant turn.
    Response,
    /// Produced by a named generator template.
    Template(String),
    /// Supplied directly by the user or a caller.
    Manual,
}

/// Candidate script text. Immutable once constructed; clones share the text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeFragment {
    text: Arc<str>,
    origin: FragmentOrigin,
}

impl CodeFragment {
    pub fn new(text: impl Into<String>, origin: FragmentOrigin) -> Self {
        Self {
            text: Arc::from(text.into()),
            origin,
        }
    }

    pub fn from_response(text: impl Into<String>) -> Self {
        Self::new(text, FragmentOrigin::Response)
    }

    pub fn from_template(template: &str, text: impl Into<String>) -> Self {
        Self::new(text, FragmentOrigin::Template(template.to_string()))
    }

    pub fn manual(text: impl Into<String>) -> Self {
        Self::new(text, FragmentOrigin::Manual)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn origin(&self) -> &FragmentOrigin {
        &self.origin
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// First `max_chars` characters, for log lines and history previews.
    pub fn preview(&self, max_chars: usize) -> String {
        let mut chars = self.text.chars();
        let head: String = chars.by_ref().take(max_chars).collect();
        if chars.next().is_some() {
            format!("{}...", head)
        } else {
            head
        }
    }
}

impl fmt::Display for CodeFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
