// Host editor reached over the JSON-RPC connection.
//
// Adapter calls become `editor.*` requests. Change feeds are fed by the
// `buffer.lines` notifications the editor sends after `editor.attach`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use fencerun_common::protocol::rpc_methods::{
    EDITOR_ATTACH, EDITOR_CURRENT_DOCUMENT, EDITOR_CURSOR, EDITOR_GET_LINES, EDITOR_SET_ANNOTATION,
    EDITOR_SET_LINES,
};
use fencerun_common::types::{ChangeEvent, CursorPosition, DocumentHandle, StatusStyle};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use super::{ChangeStream, EditorAdapter, EditorError, EditorFuture};
use crate::rpc::peer::{PeerError, RpcPeer};

type Subscribers = Arc<Mutex<HashMap<DocumentHandle, mpsc::UnboundedSender<ChangeEvent>>>>;

#[derive(Deserialize)]
struct CurrentDocument {
    doc: DocumentHandle,
}

#[derive(Deserialize)]
struct Lines {
    lines: Vec<String>,
}

pub struct RpcEditor {
    peer: Arc<RpcPeer>,
    subscribers: Subscribers,
}

impl RpcEditor {
    pub fn new(peer: Arc<RpcPeer>) -> Self {
        Self { peer, subscribers: Arc::new(Mutex::new(HashMap::new())) }
    }

    fn subscribers(&self) -> MutexGuard<'_, HashMap<DocumentHandle, mpsc::UnboundedSender<ChangeEvent>>> {
        self.subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Forward a `buffer.lines` event to the document's change feed.
    ///
    /// Returns false when nobody is subscribed to the document.
    pub fn route_change(&self, event: ChangeEvent) -> bool {
        let mut subscribers = self.subscribers();
        let handle = event.handle;
        let delivered = match subscribers.get(&handle) {
            Some(subscriber) => subscriber.send(event).is_ok(),
            None => return false,
        };
        if !delivered {
            subscribers.remove(&handle);
        }
        delivered
    }

    /// End the change feed of `doc`.
    pub fn detach(&self, doc: DocumentHandle) {
        if self.subscribers().remove(&doc).is_some() {
            debug!(%doc, "change feed closed");
        }
    }

    fn call<T>(&self, method: &'static str, params: Value) -> EditorFuture<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let peer = self.peer.clone();
        Box::pin(async move {
            let result = peer.request(method, params).await.map_err(|error| to_editor_error(method, error))?;
            serde_json::from_value(result)
                .map_err(|error| EditorError::Decode { method: method.to_string(), message: error.to_string() })
        })
    }

    /// Call a method whose result is ignored.
    fn call_unit(&self, method: &'static str, params: Value) -> EditorFuture<()> {
        let peer = self.peer.clone();
        Box::pin(async move {
            peer.request(method, params).await.map_err(|error| to_editor_error(method, error))?;
            Ok(())
        })
    }
}

fn to_editor_error(method: &str, error: PeerError) -> EditorError {
    match error {
        PeerError::Timeout(method) => EditorError::Timeout(method),
        PeerError::Disconnected => EditorError::Disconnected,
        PeerError::Remote { error, .. } => EditorError::Request { method: method.to_string(), message: error.message },
    }
}

impl EditorAdapter for RpcEditor {
    fn current_document(&self) -> EditorFuture<DocumentHandle> {
        let call: EditorFuture<CurrentDocument> = self.call(EDITOR_CURRENT_DOCUMENT, json!({}));
        Box::pin(async move { Ok(call.await?.doc) })
    }

    fn current_cursor(&self) -> EditorFuture<CursorPosition> {
        self.call(EDITOR_CURSOR, json!({}))
    }

    fn read_raw_lines(&self, doc: DocumentHandle, start: i64, end: i64) -> EditorFuture<Vec<String>> {
        let call: EditorFuture<Lines> = self.call(EDITOR_GET_LINES, json!({ "doc": doc, "start": start, "end": end }));
        Box::pin(async move { Ok(call.await?.lines) })
    }

    fn write_raw_lines(
        &self,
        doc: DocumentHandle,
        start: usize,
        end: usize,
        replacement: Vec<String>,
    ) -> EditorFuture<()> {
        self.call_unit(EDITOR_SET_LINES, json!({ "doc": doc, "start": start, "end": end, "lines": replacement }))
    }

    fn set_inline_annotation(
        &self,
        doc: DocumentHandle,
        line: usize,
        id: u64,
        text: String,
        style: StatusStyle,
    ) -> EditorFuture<()> {
        self.call_unit(
            EDITOR_SET_ANNOTATION,
            json!({ "doc": doc, "line": line, "id": id, "text": text, "style": style.as_str() }),
        )
    }

    fn subscribe_to_changes(&self, doc: DocumentHandle) -> EditorFuture<ChangeStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        // Registered before attaching so the initial whole-buffer event is not lost.
        self.subscribers().insert(doc, tx);

        let attach = self.call_unit(EDITOR_ATTACH, json!({ "doc": doc }));
        let subscribers = self.subscribers.clone();
        Box::pin(async move {
            if let Err(error) = attach.await {
                subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).remove(&doc);
                return Err(error);
            }
            Ok(rx)
        })
    }
}
