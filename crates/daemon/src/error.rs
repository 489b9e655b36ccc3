// Engine error taxonomy and its JSON-RPC mapping.

use fencerun_common::codeblock::ParseError;
use fencerun_common::protocol::jsonrpc::{
    RpcError, ENGINE_ALREADY_RUNNING, ENGINE_CONFIG_ERROR, ENGINE_DOCUMENT_NOT_INITIALIZED,
    ENGINE_EDITOR_ERROR, ENGINE_NOT_FOUND, ENGINE_NOT_STARTED, ENGINE_PARSE_ERROR,
    ENGINE_RUNNER_ERROR, ENGINE_RUNTIME_FAILED, ENGINE_SPAWN_FAILED, ENGINE_UNSUPPORTED_LANGUAGE,
    INTERNAL_ERROR,
};
use fencerun_common::types::DocumentHandle;
use serde_json::json;

use crate::config::ConfigError;
use crate::editor::EditorError;
use crate::mirror::MirrorError;
use crate::runner::RunnerError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("{0}")]
    NotFound(String),
    #[error("codeblock `{id}` is already running")]
    AlreadyRunning { id: String },
    #[error("document {0} is not initialized")]
    DocumentNotInitialized(DocumentHandle),
    #[error("failed to start `{program}`: {message}")]
    Spawn { program: String, message: String },
    #[error("codeblock `{id}` exited with code {exit_code}")]
    Runtime { id: String, exit_code: i32 },
    #[error("codeblock `{id}` has not started yet")]
    NotStarted { id: String },
    #[error("no runner configured for language `{0}`")]
    UnsupportedLanguage(String),
    #[error(transparent)]
    Editor(#[from] EditorError),
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<MirrorError> for EngineError {
    fn from(error: MirrorError) -> Self {
        match error {
            MirrorError::NotInitialized(handle) => Self::DocumentNotInitialized(handle),
            MirrorError::Editor(error) => Self::Editor(error),
        }
    }
}

impl EngineError {
    /// Stable machine-readable name, sent as `data.kind` on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse(_) => "parse",
            Self::NotFound(_) => "not_found",
            Self::AlreadyRunning { .. } => "already_running",
            Self::DocumentNotInitialized(_) => "document_not_initialized",
            Self::Spawn { .. } => "spawn",
            Self::Runtime { .. } => "runtime",
            Self::NotStarted { .. } => "not_started",
            Self::UnsupportedLanguage(_) => "unsupported_language",
            Self::Editor(_) => "editor",
            Self::Runner(_) => "runner",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Parse(_) => ENGINE_PARSE_ERROR,
            Self::NotFound(_) => ENGINE_NOT_FOUND,
            Self::AlreadyRunning { .. } => ENGINE_ALREADY_RUNNING,
            Self::DocumentNotInitialized(_) => ENGINE_DOCUMENT_NOT_INITIALIZED,
            Self::Spawn { .. } => ENGINE_SPAWN_FAILED,
            Self::Runtime { .. } => ENGINE_RUNTIME_FAILED,
            Self::NotStarted { .. } => ENGINE_NOT_STARTED,
            Self::UnsupportedLanguage(_) => ENGINE_UNSUPPORTED_LANGUAGE,
            Self::Editor(_) => ENGINE_EDITOR_ERROR,
            Self::Runner(_) => ENGINE_RUNNER_ERROR,
            Self::Config(_) => ENGINE_CONFIG_ERROR,
            Self::Internal(_) => INTERNAL_ERROR,
        }
    }

    pub fn to_rpc_error(&self) -> RpcError {
        let data = match self {
            Self::Runtime { id, exit_code } => json!({ "kind": self.kind(), "id": id, "exit_code": exit_code }),
            _ => json!({ "kind": self.kind() }),
        };
        RpcError::new(self.code(), self.to_string()).with_data(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_to_rpc_error_with_kind() {
        let error = EngineError::AlreadyRunning { id: "17".into() };
        let rpc = error.to_rpc_error();

        assert_eq!(rpc.code, ENGINE_ALREADY_RUNNING);
        assert_eq!(rpc.message, "codeblock `17` is already running");
        assert_eq!(rpc.data, Some(json!({ "kind": "already_running" })));
    }

    #[test]
    fn runtime_error_carries_the_exit_code() {
        let rpc = EngineError::Runtime { id: "8".into(), exit_code: 2 }.to_rpc_error();

        assert_eq!(rpc.code, ENGINE_RUNTIME_FAILED);
        assert_eq!(rpc.data, Some(json!({ "kind": "runtime", "id": "8", "exit_code": 2 })));
    }

    #[test]
    fn mirror_errors_fold_into_engine_taxonomy() {
        let error: EngineError = MirrorError::NotInitialized(DocumentHandle(5)).into();
        assert!(matches!(error, EngineError::DocumentNotInitialized(DocumentHandle(5))));
        assert_eq!(error.kind(), "document_not_initialized");
    }
}
