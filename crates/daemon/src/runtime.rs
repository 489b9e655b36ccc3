use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tracing::info;

use crate::config::EngineConfig;
use crate::editor::RpcEditor;
use crate::engine::Engine;
use crate::rpc::methods::RpcServerState;
use crate::rpc::peer::{RpcPeer, DEFAULT_REQUEST_TIMEOUT};
use crate::rpc::stdio::serve_connection;

/// Serve the editor over stdin/stdout until it disconnects or asks to shut down.
pub async fn run_stdio(config: EngineConfig) -> Result<()> {
    serve(tokio::io::stdin(), tokio::io::stdout(), config).await
}

/// Wire an engine to one editor connection and serve it.
pub async fn serve<R, W>(reader: R, writer: W, config: EngineConfig) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let peer = Arc::new(RpcPeer::new(outbound_tx, DEFAULT_REQUEST_TIMEOUT));
    let editor = Arc::new(RpcEditor::new(peer.clone()));
    let engine = Arc::new(Engine::new(editor.clone(), config).context("invalid engine configuration")?);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
    let state = RpcServerState::new(engine.clone(), editor, peer).with_shutdown_notifier(shutdown_tx.clone());
    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = ctrl_c_tx.send(());
    });

    info!("engine serving on stdio");
    let result = serve_connection(reader, writer, outbound_rx, state, shutdown_rx).await;
    engine.shutdown();
    info!("engine stopped");
    result.context("stdio connection failed")
}
