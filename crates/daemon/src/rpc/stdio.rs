use anyhow::{Context, Result};
use fencerun_common::protocol::jsonrpc::Message;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::rpc::methods::{decode_request, handle_notification, parse_error_response, serve_request, RpcServerState};

/// Serve JSON-RPC 2.0 over one bidirectional byte stream (stdin/stdout).
///
/// Framing is newline-delimited JSON. Each inbound request runs on its own
/// task; everything written back goes through `outbound`, drained by a single
/// writer task. Returns on end of input or shutdown.
pub async fn serve_connection<R, W>(
    reader: R,
    writer: W,
    outbound: mpsc::UnboundedReceiver<Message>,
    state: RpcServerState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer_task = tokio::spawn(write_frames(writer, outbound));
    let mut reader = BufReader::new(reader);

    loop {
        let mut line = Vec::new();
        let bytes_read = tokio::select! {
            read = reader.read_until(b'\n', &mut line) => read.context("failed to read json-rpc frame")?,
            _ = shutdown.recv() => {
                debug!("shutdown requested");
                break;
            }
        };
        if bytes_read == 0 {
            debug!("input closed");
            break;
        }

        trim_line_endings(&mut line);
        if line.iter().all(|byte| byte.is_ascii_whitespace()) {
            continue;
        }
        route_frame(&line, &state);
    }

    state.peer().close();
    writer_task.await.context("json-rpc writer task failed")?
}

fn route_frame(line: &[u8], state: &RpcServerState) {
    match serde_json::from_slice::<Message>(line) {
        Ok(Message::Request(_)) => match decode_request(line) {
            Ok(request) => {
                tokio::spawn(serve_request(request, state.clone()));
            }
            Err(response) => respond(state, response),
        },
        Ok(Message::Notification(notification)) => handle_notification(notification, state),
        Ok(Message::Response(response)) => {
            state.peer().complete(response);
        }
        Err(error) => respond(state, parse_error_response(error.to_string())),
    }
}

fn respond(state: &RpcServerState, response: fencerun_common::protocol::jsonrpc::Response) {
    if let Err(error) = state.peer().respond(response) {
        warn!(%error, "failed to queue response");
    }
}

async fn write_frames<W>(mut writer: W, mut outbound: mpsc::UnboundedReceiver<Message>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let mut encoded = serde_json::to_vec(&message).context("failed to serialize json-rpc frame")?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await.context("failed to write json-rpc frame")?;
        writer.flush().await.context("failed to flush json-rpc frame")?;
    }
    Ok(())
}

fn trim_line_endings(line: &mut Vec<u8>) {
    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
}
