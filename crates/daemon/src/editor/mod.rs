// Editor adapter: the boundary between the engine and the host editor.

use std::future::Future;
use std::pin::Pin;

use fencerun_common::types::{ChangeEvent, CursorPosition, DocumentHandle, StatusStyle};
use tokio::sync::mpsc;

pub mod memory;
pub mod rpc;

pub use memory::MemoryEditor;
pub use rpc::RpcEditor;

pub type EditorFuture<T> = Pin<Box<dyn Future<Output = Result<T, EditorError>> + Send>>;

/// Receiving end of a document's change feed.
pub type ChangeStream = mpsc::UnboundedReceiver<ChangeEvent>;

/// Host editor primitives the engine relies on.
///
/// Line ranges are 0-based and end-exclusive. `end = -1` on reads means
/// "through the last line".
pub trait EditorAdapter: Send + Sync {
    fn current_document(&self) -> EditorFuture<DocumentHandle>;

    fn current_cursor(&self) -> EditorFuture<CursorPosition>;

    fn read_raw_lines(&self, doc: DocumentHandle, start: i64, end: i64) -> EditorFuture<Vec<String>>;

    fn write_raw_lines(
        &self,
        doc: DocumentHandle,
        start: usize,
        end: usize,
        replacement: Vec<String>,
    ) -> EditorFuture<()>;

    /// Place (or move) the annotation `id` on `line`.
    fn set_inline_annotation(
        &self,
        doc: DocumentHandle,
        line: usize,
        id: u64,
        text: String,
        style: StatusStyle,
    ) -> EditorFuture<()>;

    /// Start the change feed of `doc`. The first event is the whole-buffer form.
    fn subscribe_to_changes(&self, doc: DocumentHandle) -> EditorFuture<ChangeStream>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditorError {
    #[error("unknown document {0}")]
    UnknownDocument(DocumentHandle),
    #[error("lines {start}..{end} are out of range for document {doc} ({len} lines)")]
    OutOfRange { doc: DocumentHandle, start: i64, end: i64, len: usize },
    #[error("editor request `{method}` failed: {message}")]
    Request { method: String, message: String },
    #[error("editor did not answer `{0}` in time")]
    Timeout(String),
    #[error("malformed editor response to `{method}`: {message}")]
    Decode { method: String, message: String },
    #[error("editor connection closed")]
    Disconnected,
}
