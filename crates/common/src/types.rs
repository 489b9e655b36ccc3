// Core domain types shared across all fencerun crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sentinel `last_line` value meaning "unknown upper bound".
pub const UNBOUNDED_LAST_LINE: i64 = -1;

/// Opaque handle of a document owned by the host editor (a buffer number).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct DocumentHandle(pub i64);

impl fmt::Display for DocumentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An incremental patch describing a line-range replacement in a document.
///
/// Applying it keeps lines `[0, first_line)`, splices in `lines`, then keeps
/// `[last_line, end)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeEvent {
    #[serde(rename = "doc")]
    pub handle: DocumentHandle,
    pub changetick: i64,
    pub first_line: i64,
    pub last_line: i64,
    #[serde(default)]
    pub lines: Vec<String>,
    /// More parts of the same change follow.
    #[serde(default, rename = "more")]
    pub is_partial: bool,
}

impl ChangeEvent {
    /// The degenerate "whole-buffer replace" form sent when a document is first attached.
    pub fn whole_buffer(handle: DocumentHandle, changetick: i64, lines: Vec<String>) -> Self {
        Self {
            handle,
            changetick,
            first_line: 0,
            last_line: UNBOUNDED_LAST_LINE,
            lines,
            is_partial: false,
        }
    }

    pub fn is_whole_buffer(&self) -> bool {
        self.first_line == 0 && self.last_line == UNBOUNDED_LAST_LINE
    }
}

/// Cursor position as reported by the editor: 1-based line, 0-based column.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CursorPosition {
    pub line: usize,
    pub col: usize,
}

/// Semantic highlight class of a status indicator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StatusStyle {
    Info,
    Ok,
    Error,
}

impl StatusStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

/// A heading-based section within a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Section {
    /// Position of the section in document order.
    pub index: usize,
    /// Index of the enclosing section (forms a tree via heading levels).
    pub parent: Option<usize>,
    /// The heading text without its markers.
    pub heading: String,
    /// Heading level (1-6).
    pub level: u8,
    /// Line of the heading (0-based).
    pub start_line: usize,
    /// Line of the next heading of any level, or the line count (exclusive).
    pub end_line: usize,
}

impl Section {
    /// Whether the line range `[start, end]` lies strictly inside this section's span.
    pub fn encloses(&self, start: usize, end: usize) -> bool {
        start > self.start_line && end < self.end_line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn change_event_uses_wire_field_names() {
        let event: ChangeEvent = serde_json::from_value(json!({
            "doc": 3,
            "changetick": 12,
            "first_line": 1,
            "last_line": 2,
            "lines": ["a"],
            "more": true
        }))
        .expect("event should decode");

        assert_eq!(event.handle, DocumentHandle(3));
        assert!(event.is_partial);
        assert!(!event.is_whole_buffer());
    }

    #[test]
    fn whole_buffer_event_is_recognised() {
        let event = ChangeEvent::whole_buffer(DocumentHandle(1), 0, vec!["x".into()]);
        assert!(event.is_whole_buffer());
        assert_eq!(event.last_line, UNBOUNDED_LAST_LINE);
    }

    #[test]
    fn status_style_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&StatusStyle::Error).unwrap(), "\"error\"");
        assert_eq!(StatusStyle::Ok.as_str(), "ok");
    }
}
