// Outbound half of the stdio connection: requests to the editor, responses
// to the editor's requests, and correlation of the editor's replies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use fencerun_common::protocol::jsonrpc::{Message, Notification, Request, RequestId, Response, RpcError};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerError {
    #[error("`{0}` timed out")]
    Timeout(String),
    #[error("connection closed")]
    Disconnected,
    #[error("`{method}` failed: {}", error.message)]
    Remote { method: String, error: RpcError },
}

pub struct RpcPeer {
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<Response>>>,
    next_id: AtomicI64,
    request_timeout: Duration,
}

impl RpcPeer {
    pub fn new(outbound: mpsc::UnboundedSender<Message>, request_timeout: Duration) -> Self {
        Self {
            outbound: Mutex::new(Some(outbound)),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            request_timeout,
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<RequestId, oneshot::Sender<Response>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn send(&self, message: Message) -> Result<(), PeerError> {
        let outbound = self.outbound.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match outbound.as_ref() {
            Some(sender) => sender.send(message).map_err(|_| PeerError::Disconnected),
            None => Err(PeerError::Disconnected),
        }
    }

    /// Send a request and wait for the matching response.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, PeerError> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending().insert(id.clone(), tx);

        if let Err(error) = self.send(Message::Request(Request::new(method, Some(params), id.clone()))) {
            self.pending().remove(&id);
            return Err(error);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => {
                response.into_result().map_err(|error| PeerError::Remote { method: method.to_string(), error })
            }
            Ok(Err(_)) => Err(PeerError::Disconnected),
            Err(_) => {
                self.pending().remove(&id);
                warn!(method, ?id, "editor request timed out");
                Err(PeerError::Timeout(method.to_string()))
            }
        }
    }

    pub fn notify(&self, method: &str, params: Value) -> Result<(), PeerError> {
        self.send(Message::Notification(Notification::new(method, Some(params))))
    }

    /// Queue a response to one of the editor's requests.
    pub fn respond(&self, response: Response) -> Result<(), PeerError> {
        self.send(Message::Response(response))
    }

    /// Hand an inbound response to the request waiting for it.
    pub fn complete(&self, response: Response) -> bool {
        match self.pending().remove(&response.id) {
            Some(waiter) => waiter.send(response).is_ok(),
            None => {
                debug!(id = ?response.id, "dropping response without a pending request");
                false
            }
        }
    }

    /// Stop sending and fail every pending request.
    pub fn close(&self) {
        self.outbound.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        self.pending().clear();
    }

    pub fn pending_requests(&self) -> usize {
        self.pending().len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn responses_are_correlated_by_id() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let peer = Arc::new(RpcPeer::new(tx, Duration::from_secs(1)));

        let call = {
            let peer = peer.clone();
            tokio::spawn(async move { peer.request("editor.cursor", json!({})).await })
        };

        let Some(Message::Request(request)) = rx.recv().await else {
            panic!("expected an outbound request");
        };
        assert_eq!(request.method, "editor.cursor");
        assert!(peer.complete(Response::success(request.id, json!({ "line": 3, "col": 0 }))));

        let result = call.await.expect("task").expect("response");
        assert_eq!(result, json!({ "line": 3, "col": 0 }));
        assert_eq!(peer.pending_requests(), 0);
    }

    #[tokio::test]
    async fn remote_errors_surface_with_method() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let peer = Arc::new(RpcPeer::new(tx, Duration::from_secs(1)));
        let call = {
            let peer = peer.clone();
            tokio::spawn(async move { peer.request("editor.get_lines", json!({})).await })
        };
        let Some(Message::Request(request)) = rx.recv().await else {
            panic!("expected an outbound request");
        };
        peer.complete(Response::error(request.id, RpcError::new(-1, "no such buffer")));

        let error = call.await.expect("task").unwrap_err();
        assert!(matches!(error, PeerError::Remote { ref method, .. } if method == "editor.get_lines"));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_requests_time_out() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = RpcPeer::new(tx, Duration::from_millis(100));
        let error = peer.request("editor.cursor", json!({})).await.unwrap_err();
        assert_eq!(error, PeerError::Timeout("editor.cursor".into()));
        assert_eq!(peer.pending_requests(), 0);
    }

    #[tokio::test]
    async fn closing_fails_pending_and_future_requests() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let peer = Arc::new(RpcPeer::new(tx, Duration::from_secs(5)));
        let call = {
            let peer = peer.clone();
            tokio::spawn(async move { peer.request("editor.cursor", json!({})).await })
        };
        assert!(rx.recv().await.is_some());

        peer.close();
        assert_eq!(call.await.expect("task").unwrap_err(), PeerError::Disconnected);
        assert_eq!(peer.notify("x", json!({})).unwrap_err(), PeerError::Disconnected);
    }
}
