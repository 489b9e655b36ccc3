use std::sync::Arc;

use fencerun_common::protocol::jsonrpc::{
    Notification, Request, RequestId, Response, RpcError, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
    PARSE_ERROR,
};
use fencerun_common::protocol::rpc_methods::{
    BUFFER_DETACH, BUFFER_LINES, CODEBLOCK_KILL, CODEBLOCK_LIST, CODEBLOCK_RUN, CODEBLOCK_RUNNING, ENGINE_CONFIGURE,
    ENGINE_SHUTDOWN, RPC_PING,
};
use fencerun_common::types::{ChangeEvent, DocumentHandle};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::editor::RpcEditor;
use crate::engine::{BlockSelector, Engine, RunStarted};
use crate::error::EngineError;
use crate::exec::ExecutionOutcome;
use crate::rpc::peer::RpcPeer;

#[derive(Clone)]
pub struct RpcServerState {
    engine: Arc<Engine>,
    editor: Arc<RpcEditor>,
    peer: Arc<RpcPeer>,
    shutdown_notifier: Option<broadcast::Sender<()>>,
}

impl RpcServerState {
    pub fn new(engine: Arc<Engine>, editor: Arc<RpcEditor>, peer: Arc<RpcPeer>) -> Self {
        Self { engine, editor, peer, shutdown_notifier: None }
    }

    pub fn with_shutdown_notifier(mut self, shutdown_notifier: broadcast::Sender<()>) -> Self {
        self.shutdown_notifier = Some(shutdown_notifier);
        self
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn peer(&self) -> &Arc<RpcPeer> {
        &self.peer
    }

    /// Ask the host loop to stop. Running executions are interrupted.
    pub fn request_shutdown(&self) {
        self.engine.shutdown();
        if let Some(notifier) = &self.shutdown_notifier {
            let _ = notifier.send(());
        }
    }
}

// ── Params ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ConfigureParams {
    config: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TargetParams {
    doc: Option<DocumentHandle>,
    id: Option<String>,
    /// 0-based line inside the block.
    line: Option<usize>,
    /// Hold the response until the execution has finished.
    wait: bool,
}

impl TargetParams {
    fn selector(&self) -> BlockSelector {
        match (&self.id, self.line) {
            (Some(id), _) => BlockSelector::Identity { id: id.clone() },
            (None, Some(line)) => BlockSelector::Line { line },
            (None, None) => BlockSelector::Cursor,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListParams {
    doc: Option<DocumentHandle>,
}

#[derive(Debug, Deserialize)]
struct DetachParams {
    doc: DocumentHandle,
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, String> {
    serde_json::from_value(params.unwrap_or_else(|| json!({}))).map_err(|error| error.to_string())
}

// ── Dispatch ────────────────────────────────────────────────────────

/// Decode one inbound line into a request. Parse failures become a
/// `-32700` response with a null id.
pub fn decode_request(raw: &[u8]) -> Result<Request, Response> {
    let request = serde_json::from_slice::<Request>(raw).map_err(|error| parse_error_response(error.to_string()))?;
    if request.jsonrpc != "2.0" {
        return Err(Response::error(
            request.id,
            RpcError { code: INVALID_REQUEST, message: "Invalid Request".to_string(), data: None },
        ));
    }
    Ok(request)
}

pub fn parse_error_response(reason: String) -> Response {
    Response::error(
        RequestId::Null,
        RpcError { code: PARSE_ERROR, message: "Parse error".to_string(), data: Some(json!({ "reason": reason })) },
    )
}

pub async fn dispatch_request(request: Request, state: &RpcServerState) -> Response {
    match request.method.as_str() {
        RPC_PING => Response::success(
            request.id,
            json!({
                "ok": true,
            }),
        ),
        ENGINE_SHUTDOWN => Response::success(
            request.id,
            json!({
                "ok": true,
            }),
        ),
        ENGINE_CONFIGURE => handle_engine_configure(request, state),
        CODEBLOCK_RUN => handle_codeblock_run(request, state).await,
        CODEBLOCK_KILL => handle_codeblock_kill(request, state).await,
        CODEBLOCK_LIST => handle_codeblock_list(request, state).await,
        CODEBLOCK_RUNNING => Response::success(request.id, json!({ "ids": state.engine.running() })),
        _ => Response::error(
            request.id,
            RpcError {
                code: METHOD_NOT_FOUND,
                message: "Method not found".to_string(),
                data: Some(json!({ "method": request.method })),
            },
        ),
    }
}

/// Handle a request and queue its response. `engine.shutdown` triggers the
/// shutdown only after its response is queued.
pub async fn serve_request(request: Request, state: RpcServerState) {
    let shutting_down = request.method == ENGINE_SHUTDOWN;
    let response = dispatch_request(request, &state).await;
    if let Err(error) = state.peer.respond(response) {
        debug!(%error, "response dropped");
    }
    if shutting_down {
        state.request_shutdown();
    }
}

pub fn handle_notification(notification: Notification, state: &RpcServerState) {
    match notification.method.as_str() {
        BUFFER_LINES => match parse_params::<ChangeEvent>(notification.params) {
            Ok(event) => {
                if !state.editor.route_change(event.clone()) {
                    state.engine.apply_change(event);
                }
            }
            Err(reason) => warn!(%reason, "malformed buffer.lines notification"),
        },
        BUFFER_DETACH => match parse_params::<DetachParams>(notification.params) {
            Ok(DetachParams { doc }) => {
                state.editor.detach(doc);
                state.engine.detach(doc);
            }
            Err(reason) => warn!(%reason, "malformed buffer.detach notification"),
        },
        other => debug!(method = other, "ignoring notification"),
    }
}

fn handle_engine_configure(request: Request, state: &RpcServerState) -> Response {
    let params: ConfigureParams = match parse_params(request.params) {
        Ok(params) => params,
        Err(reason) => return invalid_params_response(request.id, reason),
    };
    match state.engine.configure(params.config) {
        Ok(config) => Response::success(request.id, json!({ "config": config })),
        Err(error) => engine_error_response(request.id, &error),
    }
}

async fn handle_codeblock_run(request: Request, state: &RpcServerState) -> Response {
    let params: TargetParams = match parse_params(request.params) {
        Ok(params) => params,
        Err(reason) => return invalid_params_response(request.id, reason),
    };

    let handle = match state.engine.run(params.doc, params.selector()).await {
        Ok(handle) => handle,
        Err(error) => return engine_error_response(request.id, &error),
    };
    let started = RunStarted::from(&handle);
    if !params.wait {
        return Response::success(request.id, json!(started));
    }

    match handle.wait().await.and_then(ExecutionOutcome::into_result) {
        Ok(outcome) => Response::success(request.id, json!(outcome)),
        Err(error) => engine_error_response(request.id, &error),
    }
}

async fn handle_codeblock_kill(request: Request, state: &RpcServerState) -> Response {
    let params: TargetParams = match parse_params(request.params) {
        Ok(params) => params,
        Err(reason) => return invalid_params_response(request.id, reason),
    };
    match state.engine.kill(params.doc, params.selector()).await {
        Ok(id) => Response::success(request.id, json!({ "id": id })),
        Err(error) => engine_error_response(request.id, &error),
    }
}

async fn handle_codeblock_list(request: Request, state: &RpcServerState) -> Response {
    let params: ListParams = match parse_params(request.params) {
        Ok(params) => params,
        Err(reason) => return invalid_params_response(request.id, reason),
    };
    match state.engine.list(params.doc).await {
        Ok(blocks) => Response::success(request.id, json!({ "blocks": blocks })),
        Err(error) => engine_error_response(request.id, &error),
    }
}

fn invalid_params_response(request_id: RequestId, reason: String) -> Response {
    Response::error(
        request_id,
        RpcError {
            code: INVALID_PARAMS,
            message: "Invalid params".to_string(),
            data: Some(json!({ "reason": reason })),
        },
    )
}

fn engine_error_response(request_id: RequestId, error: &EngineError) -> Response {
    debug!(%error, kind = error.kind(), "request failed");
    Response::error(request_id, error.to_rpc_error())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fencerun_common::protocol::jsonrpc::{ENGINE_NOT_FOUND, Message};
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::EngineConfig;

    fn state() -> (RpcServerState, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = Arc::new(RpcPeer::new(tx, Duration::from_millis(200)));
        let editor = Arc::new(RpcEditor::new(peer.clone()));
        let engine = Arc::new(Engine::new(editor.clone(), EngineConfig::default()).expect("engine"));
        (RpcServerState::new(engine, editor, peer), rx)
    }

    #[tokio::test]
    async fn ping_returns_ok() {
        let (state, _rx) = state();
        let response = dispatch_request(Request::new(RPC_PING, None, RequestId::Number(1)), &state).await;
        assert_eq!(response.result, Some(json!({ "ok": true })));
    }

    #[tokio::test]
    async fn unknown_methods_are_method_not_found() {
        let (state, _rx) = state();
        let response = dispatch_request(Request::new("doc.read", None, RequestId::Number(2)), &state).await;
        let error = response.error.expect("error");
        assert_eq!(error.code, METHOD_NOT_FOUND);
        assert_eq!(error.data, Some(json!({ "method": "doc.read" })));
    }

    #[tokio::test]
    async fn configure_requires_config_param() {
        let (state, _rx) = state();
        let response =
            dispatch_request(Request::new(ENGINE_CONFIGURE, Some(json!({})), RequestId::Number(3)), &state).await;
        assert_eq!(response.error.expect("error").code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn configure_updates_engine() {
        let (state, _rx) = state();
        let params = json!({ "config": { "stop_signal": "SIGTERM", "container_runtime": "podman" } });
        let response = dispatch_request(Request::new(ENGINE_CONFIGURE, Some(params), RequestId::Number(4)), &state).await;

        assert!(response.error.is_none(), "{response:?}");
        assert_eq!(state.engine().config().container_runtime, "podman");
    }

    #[tokio::test]
    async fn kill_of_idle_identity_is_not_found() {
        let (state, _rx) = state();
        let request = Request::new(CODEBLOCK_KILL, Some(json!({ "id": "17" })), RequestId::Number(5));
        let error = dispatch_request(request, &state).await.error.expect("error");

        assert_eq!(error.code, ENGINE_NOT_FOUND);
        assert_eq!(error.data, Some(json!({ "kind": "not_found" })));
    }

    #[test]
    fn malformed_lines_are_parse_errors_with_null_id() {
        let response = decode_request(b"{not json").unwrap_err();
        assert_eq!(response.id, RequestId::Null);
        assert_eq!(response.error.expect("error").code, PARSE_ERROR);
    }

    #[test]
    fn wrong_protocol_version_is_invalid_request() {
        let response = decode_request(br#"{"jsonrpc":"1.0","method":"rpc.ping","id":7}"#).unwrap_err();
        assert_eq!(response.id, RequestId::Number(7));
        assert_eq!(response.error.expect("error").code, INVALID_REQUEST);
    }

    #[test]
    fn target_params_prefer_identity_over_line() {
        let params: TargetParams = parse_params(Some(json!({ "id": "4", "line": 9 }))).expect("params");
        assert_eq!(params.selector(), BlockSelector::Identity { id: "4".into() });
        let params: TargetParams = parse_params(None).expect("params");
        assert_eq!(params.selector(), BlockSelector::Cursor);
    }

    #[tokio::test]
    async fn unsolicited_whole_buffer_attaches_the_document() {
        let (state, _rx) = state();
        let notification = Notification::new(
            BUFFER_LINES,
            Some(json!({ "doc": 3, "changetick": 1, "first_line": 0, "last_line": -1, "lines": ["```sh", "ls", "```"] })),
        );
        handle_notification(notification, &state);
        assert!(state.engine().mirror().is_attached(DocumentHandle(3)));

        handle_notification(Notification::new(BUFFER_DETACH, Some(json!({ "doc": 3 }))), &state);
        assert!(!state.engine().mirror().is_attached(DocumentHandle(3)));
    }
}
