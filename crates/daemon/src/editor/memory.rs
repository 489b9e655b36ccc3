// In-process editor: documents, cursor, annotations and a write log.
//
// Backs the CLI and the test-suite. Writes behave like a real editor: they
// splice lines, bump the changetick and echo a change event to subscribers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use fencerun_common::types::{ChangeEvent, CursorPosition, DocumentHandle, StatusStyle};
use serde::Serialize;
use tokio::sync::mpsc;

use super::{ChangeStream, EditorAdapter, EditorError, EditorFuture};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Annotation {
    pub line: usize,
    pub text: String,
    pub style: StatusStyle,
}

/// A write issued through the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteRecord {
    pub doc: DocumentHandle,
    pub start: usize,
    pub end: usize,
    pub lines: Vec<String>,
}

#[derive(Default)]
struct MemoryDocument {
    lines: Vec<String>,
    changetick: i64,
    subscribers: Vec<mpsc::UnboundedSender<ChangeEvent>>,
}

impl MemoryDocument {
    fn splice(&mut self, doc: DocumentHandle, start: usize, end: usize, lines: Vec<String>) -> Result<(), EditorError> {
        if start > end || end > self.lines.len() {
            return Err(EditorError::OutOfRange { doc, start: start as i64, end: end as i64, len: self.lines.len() });
        }
        self.lines.splice(start..end, lines.iter().cloned());
        self.changetick += 1;

        let event = ChangeEvent {
            handle: doc,
            changetick: self.changetick,
            first_line: start as i64,
            last_line: end as i64,
            lines,
            is_partial: false,
        };
        self.subscribers.retain(|subscriber| subscriber.send(event.clone()).is_ok());
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    documents: HashMap<DocumentHandle, MemoryDocument>,
    current: Option<DocumentHandle>,
    cursor: CursorPosition,
    annotations: HashMap<(DocumentHandle, u64), Annotation>,
    writes: Vec<WriteRecord>,
    next_handle: i64,
}

#[derive(Clone, Default)]
pub struct MemoryEditor {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryEditor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a document and make it current.
    pub fn open_document(&self, lines: Vec<String>) -> DocumentHandle {
        let mut state = self.lock();
        state.next_handle += 1;
        let handle = DocumentHandle(state.next_handle);
        state.documents.insert(handle, MemoryDocument { lines, ..MemoryDocument::default() });
        state.current = Some(handle);
        handle
    }

    pub fn open_text(&self, text: &str) -> DocumentHandle {
        self.open_document(text.lines().map(str::to_string).collect())
    }

    /// Place the cursor on 1-based `line`.
    pub fn set_cursor(&self, line: usize, col: usize) {
        self.lock().cursor = CursorPosition { line, col };
    }

    pub fn lines(&self, doc: DocumentHandle) -> Option<Vec<String>> {
        self.lock().documents.get(&doc).map(|document| document.lines.clone())
    }

    pub fn text(&self, doc: DocumentHandle) -> Option<String> {
        self.lines(doc).map(|lines| {
            let mut text = lines.join("\n");
            text.push('\n');
            text
        })
    }

    pub fn annotation(&self, doc: DocumentHandle, id: u64) -> Option<Annotation> {
        self.lock().annotations.get(&(doc, id)).cloned()
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }

    /// Simulate a user edit: splice without recording it as an adapter write.
    pub fn edit(&self, doc: DocumentHandle, start: usize, end: usize, lines: Vec<String>) -> Result<(), EditorError> {
        let mut state = self.lock();
        let document = state.documents.get_mut(&doc).ok_or(EditorError::UnknownDocument(doc))?;
        document.splice(doc, start, end, lines)
    }

    /// Close a document; its change feeds end.
    pub fn close(&self, doc: DocumentHandle) {
        let mut state = self.lock();
        state.documents.remove(&doc);
        if state.current == Some(doc) {
            state.current = None;
        }
    }

    fn write(&self, doc: DocumentHandle, start: usize, end: usize, lines: Vec<String>) -> Result<(), EditorError> {
        let mut state = self.lock();
        let document = state.documents.get_mut(&doc).ok_or(EditorError::UnknownDocument(doc))?;
        document.splice(doc, start, end, lines.clone())?;
        state.writes.push(WriteRecord { doc, start, end, lines });
        Ok(())
    }

    fn read(&self, doc: DocumentHandle, start: i64, end: i64) -> Result<Vec<String>, EditorError> {
        let state = self.lock();
        let document = state.documents.get(&doc).ok_or(EditorError::UnknownDocument(doc))?;
        let len = document.lines.len();
        let resolved_end = if end < 0 { len as i64 } else { end };
        if start < 0 || start > resolved_end || resolved_end > len as i64 {
            return Err(EditorError::OutOfRange { doc, start, end, len });
        }
        Ok(document.lines[start as usize..resolved_end as usize].to_vec())
    }

    fn subscribe(&self, doc: DocumentHandle) -> Result<ChangeStream, EditorError> {
        let mut state = self.lock();
        let document = state.documents.get_mut(&doc).ok_or(EditorError::UnknownDocument(doc))?;
        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is still alive, so the initial send cannot fail.
        let _ = tx.send(ChangeEvent::whole_buffer(doc, document.changetick, document.lines.clone()));
        document.subscribers.push(tx);
        Ok(rx)
    }
}

impl EditorAdapter for MemoryEditor {
    fn current_document(&self) -> EditorFuture<DocumentHandle> {
        let current = self.lock().current.ok_or(EditorError::Request {
            method: "current_document".into(),
            message: "no document is open".into(),
        });
        Box::pin(async move { current })
    }

    fn current_cursor(&self) -> EditorFuture<CursorPosition> {
        let cursor = self.lock().cursor;
        Box::pin(async move { Ok(cursor) })
    }

    fn read_raw_lines(&self, doc: DocumentHandle, start: i64, end: i64) -> EditorFuture<Vec<String>> {
        let result = self.read(doc, start, end);
        Box::pin(async move { result })
    }

    fn write_raw_lines(
        &self,
        doc: DocumentHandle,
        start: usize,
        end: usize,
        replacement: Vec<String>,
    ) -> EditorFuture<()> {
        let result = self.write(doc, start, end, replacement);
        Box::pin(async move { result })
    }

    fn set_inline_annotation(
        &self,
        doc: DocumentHandle,
        line: usize,
        id: u64,
        text: String,
        style: StatusStyle,
    ) -> EditorFuture<()> {
        let mut state = self.lock();
        let result = if state.documents.contains_key(&doc) {
            state.annotations.insert((doc, id), Annotation { line, text, style });
            Ok(())
        } else {
            Err(EditorError::UnknownDocument(doc))
        };
        Box::pin(async move { result })
    }

    fn subscribe_to_changes(&self, doc: DocumentHandle) -> EditorFuture<ChangeStream> {
        let result = self.subscribe(doc);
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn subscription_starts_with_whole_buffer_then_echoes_writes() {
        let editor = MemoryEditor::new();
        let doc = editor.open_document(lines(&["a", "b", "c"]));
        let mut changes = editor.subscribe_to_changes(doc).await.expect("subscribe");

        let initial = changes.recv().await.expect("initial event");
        assert!(initial.is_whole_buffer());
        assert_eq!(initial.lines, lines(&["a", "b", "c"]));

        editor.write_raw_lines(doc, 1, 2, lines(&["B", "B2"])).await.expect("write");
        let echo = changes.recv().await.expect("echo");
        assert_eq!((echo.first_line, echo.last_line), (1, 2));
        assert_eq!(echo.changetick, 1);
        assert_eq!(editor.lines(doc), Some(lines(&["a", "B", "B2", "c"])));
        assert_eq!(editor.writes().len(), 1);
    }

    #[tokio::test]
    async fn user_edits_are_not_logged_as_writes() {
        let editor = MemoryEditor::new();
        let doc = editor.open_text("x\n");
        editor.edit(doc, 1, 1, lines(&["y"])).expect("edit");

        assert!(editor.writes().is_empty());
        assert_eq!(editor.read_raw_lines(doc, 0, -1).await.expect("read"), lines(&["x", "y"]));
    }

    #[tokio::test]
    async fn out_of_range_writes_are_rejected() {
        let editor = MemoryEditor::new();
        let doc = editor.open_text("only\n");
        let error = editor.write_raw_lines(doc, 2, 3, vec![]).await.unwrap_err();
        assert!(matches!(error, EditorError::OutOfRange { len: 1, .. }));
    }

    #[tokio::test]
    async fn annotations_are_keyed_by_id() {
        let editor = MemoryEditor::new();
        let doc = editor.open_text("a\nb\n");
        editor.set_inline_annotation(doc, 0, 4, "x".into(), StatusStyle::Info).await.expect("first");
        editor.set_inline_annotation(doc, 1, 4, "y".into(), StatusStyle::Ok).await.expect("moved");

        assert_eq!(
            editor.annotation(doc, 4),
            Some(Annotation { line: 1, text: "y".into(), style: StatusStyle::Ok })
        );
    }
}
