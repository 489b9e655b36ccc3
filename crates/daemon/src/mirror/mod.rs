// Document mirror: a local copy of each attached document's lines.
//
// Local writes go through the editor and come back as change events. Every
// write bumps a per-document pending counter; the echoed event acknowledges
// it. Reads wait until nothing is pending so they never observe a document
// that is missing one of our own writes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use fencerun_common::types::{ChangeEvent, DocumentHandle, UNBOUNDED_LAST_LINE};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::editor::{EditorAdapter, EditorError};

// Deadline used when the configured ack timeout overflows the clock.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("document {0} is not initialized")]
    NotInitialized(DocumentHandle),
    #[error(transparent)]
    Editor(#[from] EditorError),
}

/// What `apply_change` did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// First whole-buffer event of an unknown document.
    Attached,
    Applied,
    /// Dropped with a warning; the mirror is unchanged.
    Rejected,
}

#[derive(Debug, Default)]
struct MirroredDocument {
    lines: Vec<String>,
    changetick: i64,
    pending_writes: usize,
}

impl MirroredDocument {
    fn acknowledge_write(&mut self) {
        self.pending_writes = self.pending_writes.saturating_sub(1);
    }
}

pub struct DocumentMirror {
    docs: Mutex<HashMap<DocumentHandle, MirroredDocument>>,
    acknowledged: Notify,
    editor: Arc<dyn EditorAdapter>,
    ack_timeout_ms: AtomicU64,
}

impl DocumentMirror {
    pub fn new(editor: Arc<dyn EditorAdapter>, ack_timeout: Duration) -> Self {
        Self {
            docs: Mutex::new(HashMap::new()),
            acknowledged: Notify::new(),
            editor,
            ack_timeout_ms: AtomicU64::new(duration_millis(ack_timeout)),
        }
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_ack_timeout(&self, timeout: Duration) {
        self.ack_timeout_ms.store(duration_millis(timeout), Ordering::Relaxed);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DocumentHandle, MirroredDocument>> {
        self.docs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_attached(&self, handle: DocumentHandle) -> bool {
        self.lock().contains_key(&handle)
    }

    /// Initialize a document from lines read directly from the editor.
    pub fn attach(&self, handle: DocumentHandle, lines: Vec<String>) {
        self.lock().entry(handle).or_insert_with(|| MirroredDocument { lines, ..MirroredDocument::default() });
    }

    /// Forget a document. Readers waiting on it are released.
    pub fn detach(&self, handle: DocumentHandle) {
        self.lock().remove(&handle);
        self.acknowledged.notify_waiters();
    }

    pub fn pending_writes(&self, handle: DocumentHandle) -> usize {
        self.lock().get(&handle).map(|doc| doc.pending_writes).unwrap_or(0)
    }

    /// Apply an editor change event.
    ///
    /// Unknown documents only accept the whole-buffer form. On known documents
    /// the unbounded `last_line` sentinel and out-of-range splices are rejected;
    /// a rejected event still acknowledges one pending write so readers cannot
    /// hang on an echo that will never be applied.
    pub fn apply_change(&self, event: ChangeEvent) -> ApplyOutcome {
        let outcome = {
            let mut docs = self.lock();
            match docs.get_mut(&event.handle) {
                None if event.is_whole_buffer() => {
                    docs.insert(
                        event.handle,
                        MirroredDocument { lines: event.lines, changetick: event.changetick, pending_writes: 0 },
                    );
                    ApplyOutcome::Attached
                }
                None => {
                    warn!(doc = %event.handle, "ignoring change for unknown document");
                    ApplyOutcome::Rejected
                }
                Some(doc) => splice(doc, event),
            }
        };
        self.acknowledged.notify_waiters();
        outcome
    }

    /// A copy of the document's lines, once every pending write is acknowledged.
    ///
    /// If the editor never echoes a write within the ack timeout the counter is
    /// reset so later reads do not stall.
    pub async fn read_lines(&self, handle: DocumentHandle) -> Result<Vec<String>, MirrorError> {
        let now = tokio::time::Instant::now();
        let deadline = now.checked_add(self.ack_timeout()).unwrap_or(now + FAR_FUTURE);
        loop {
            let acknowledged = self.acknowledged.notified();
            tokio::pin!(acknowledged);
            acknowledged.as_mut().enable();

            {
                let mut docs = self.lock();
                let doc = docs.get_mut(&handle).ok_or(MirrorError::NotInitialized(handle))?;
                if doc.pending_writes == 0 {
                    return Ok(doc.lines.clone());
                }
                if tokio::time::Instant::now() >= deadline {
                    warn!(doc = %handle, pending = doc.pending_writes, "editor never acknowledged writes, resetting");
                    doc.pending_writes = 0;
                    return Ok(doc.lines.clone());
                }
            }

            let _ = tokio::time::timeout_at(deadline, acknowledged).await;
        }
    }

    /// Replace lines `[start, end)` through the editor.
    ///
    /// The pending counter is bumped before the call and released by the
    /// echoed change event, or immediately if the editor rejects the write.
    pub async fn write_lines(
        &self,
        handle: DocumentHandle,
        start: usize,
        end: usize,
        replacement: Vec<String>,
    ) -> Result<(), MirrorError> {
        {
            let mut docs = self.lock();
            let doc = docs.get_mut(&handle).ok_or(MirrorError::NotInitialized(handle))?;
            doc.pending_writes += 1;
        }

        let result = self.editor.write_raw_lines(handle, start, end, replacement).await;
        if let Err(error) = result {
            if let Some(doc) = self.lock().get_mut(&handle) {
                doc.acknowledge_write();
            }
            self.acknowledged.notify_waiters();
            return Err(error.into());
        }
        Ok(())
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn splice(doc: &mut MirroredDocument, event: ChangeEvent) -> ApplyOutcome {
    if event.last_line == UNBOUNDED_LAST_LINE {
        warn!(doc = %event.handle, changetick = event.changetick, "rejecting change with unbounded last line");
        doc.acknowledge_write();
        return ApplyOutcome::Rejected;
    }

    let len = doc.lines.len() as i64;
    if event.first_line < 0 || event.first_line > event.last_line || event.last_line > len {
        warn!(
            doc = %event.handle,
            first_line = event.first_line,
            last_line = event.last_line,
            len,
            "rejecting out-of-range change"
        );
        doc.acknowledge_write();
        return ApplyOutcome::Rejected;
    }

    let (first, last) = (event.first_line as usize, event.last_line as usize);
    doc.lines.splice(first..last, event.lines);
    doc.changetick = event.changetick;
    if !event.is_partial {
        doc.acknowledge_write();
    }
    debug!(doc = %event.handle, changetick = event.changetick, pending = doc.pending_writes, "applied change");
    ApplyOutcome::Applied
}
