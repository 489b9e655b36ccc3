// Process streamer: spawn a prepared command and stream its output into the
// target codeblock.
//
// Tasks per execution:
//   stdout reader ─┐
//                  ├─► chunk channel ─► writer (one document write per chunk)
//   stderr reader ─┘
//   status ticker       (animation, stopped by the finalizer)
//   finalizer           (waits for both readers, then for the process)
//   supervisor          (turns a crashed finalizer into a failed execution)

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, SecondsFormat};
use fencerun_common::codeblock::parser::escape_fence_lines;
use fencerun_common::codeblock::{find_source, find_target, Codeblock, OPT_EXIT_CODE, OPT_LAST_RUN};
use fencerun_common::types::DocumentHandle;
use serde::Serialize;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::editor::EditorAdapter;
use crate::error::EngineError;
use crate::mirror::DocumentMirror;
use crate::runner::PreparedCommand;

use super::decode::OutputDecoder;
use super::document::{current_blocks, replace_block};
use super::execution::{Execution, ExecutionState};
use super::join::{CompletionJoin, JoinParty};
use super::registry::ExecutionRegistry;
use super::status::{annotation_ids, StatusIndicator};

const READ_BUFFER_SIZE: usize = 4096;

/// Shared handles every execution task needs.
#[derive(Clone)]
pub struct StreamerContext {
    pub mirror: Arc<DocumentMirror>,
    pub editor: Arc<dyn EditorAdapter>,
    pub registry: Arc<ExecutionRegistry>,
    pub status_interval: Duration,
    /// Serializes read-modify-write cycles on documents.
    pub edits: Arc<Mutex<()>>,
}

pub struct StreamRequest {
    /// Already admitted to the registry.
    pub execution: Arc<Execution>,
    pub command: PreparedCommand,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionOutcome {
    pub id: String,
    pub run_id: Uuid,
    pub document: DocumentHandle,
    /// Process exit code, `128 + signal` when killed by a signal.
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl ExecutionOutcome {
    /// A nonzero exit becomes `EngineError::Runtime`; the block keeps its output either way.
    pub fn into_result(self) -> Result<Self, EngineError> {
        if self.success {
            return Ok(self);
        }
        Err(EngineError::Runtime { id: self.id, exit_code: self.exit_code.unwrap_or(-1) })
    }
}

/// A spawned execution. `wait` resolves once it is finalized.
#[derive(Debug)]
pub struct ExecutionHandle {
    pub id: String,
    pub run_id: Uuid,
    pub document: DocumentHandle,
    completion: JoinHandle<ExecutionOutcome>,
}

impl ExecutionHandle {
    pub async fn wait(self) -> Result<ExecutionOutcome, EngineError> {
        self.completion.await.map_err(|error| EngineError::Internal(format!("execution supervisor failed: {error}")))
    }
}

/// Spawn the command and start streaming.
///
/// Returns once the process is running. A spawn failure is reported on the
/// blocks, releases the registry entry and is returned to the caller.
pub async fn start(ctx: StreamerContext, request: StreamRequest) -> Result<ExecutionHandle, EngineError> {
    let StreamRequest { execution, mut command } = request;
    execution.advance(ExecutionState::Starting);

    let mut process = Command::new(&command.program);
    process
        .args(&command.args)
        .envs(&command.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);
    if let Some(dir) = &command.working_dir {
        process.current_dir(dir);
    }

    let mut child = match process.spawn() {
        Ok(child) => child,
        Err(spawn_error) => {
            let error = EngineError::Spawn { program: command.display(), message: spawn_error.to_string() };
            warn!(id = %execution.id(), %error, "spawn failed");
            report_spawn_failure(&ctx, &execution, &error).await;
            execution.advance(ExecutionState::Failed);
            ctx.registry.release(&execution);
            return Err(error);
        }
    };

    let Some(pid) = child.id() else {
        // Only possible if the child was already reaped, which cannot happen before wait.
        execution.advance(ExecutionState::Failed);
        ctx.registry.release(&execution);
        return Err(EngineError::Internal("spawned process has no pid".into()));
    };
    execution.mark_spawned(pid);
    info!(id = %execution.id(), run_id = %execution.run_id(), pid, command = %command.display(), "execution started");

    let (join, mut parties) = CompletionJoin::new(2);
    let (chunks_tx, chunks_rx) = mpsc::unbounded_channel();
    if let (Some(stdout), Some(party)) = (child.stdout.take(), parties.pop()) {
        tokio::spawn(drain(stdout, "stdout", execution.clone(), chunks_tx.clone(), party));
    }
    if let (Some(stderr), Some(party)) = (child.stderr.take(), parties.pop()) {
        tokio::spawn(drain(stderr, "stderr", execution.clone(), chunks_tx.clone(), party));
    }
    // Parties left over (no pipe) arrive now.
    drop(parties);
    drop(chunks_tx);

    let writer = tokio::spawn(write_output(ctx.clone(), execution.clone(), chunks_rx));
    let (stop_ticker, ticker_stopped) = watch::channel(false);
    let ticker = tokio::spawn(animate(ctx.clone(), execution.clone(), ticker_stopped));

    let scratch = command.scratch.take();
    let finalizer = tokio::spawn(finalize(
        ctx.clone(),
        execution.clone(),
        Finalization { child, join, stop_ticker, ticker, writer, scratch },
    ));

    let supervised = execution.clone();
    let completion = tokio::spawn(async move {
        match finalizer.await {
            Ok(outcome) => outcome,
            Err(join_error) => {
                error!(id = %supervised.id(), %join_error, "execution task crashed");
                supervised.advance(ExecutionState::Failed);
                ctx.registry.release(&supervised);
                if let Err(error) = show_status(&ctx, &supervised, StatusIndicator::failed()).await {
                    debug!(id = %supervised.id(), %error, "could not show failure status");
                }
                ExecutionOutcome {
                    id: supervised.id().to_string(),
                    run_id: supervised.run_id(),
                    document: supervised.document(),
                    exit_code: None,
                    success: false,
                }
            }
        }
    });

    Ok(ExecutionHandle {
        id: execution.id().to_string(),
        run_id: execution.run_id(),
        document: execution.document(),
        completion,
    })
}

// ── Readers and writer ──

async fn drain<R>(
    mut stream: R,
    name: &'static str,
    execution: Arc<Execution>,
    chunks: mpsc::UnboundedSender<String>,
    party: JoinParty,
) where
    R: AsyncRead + Unpin,
{
    let mut decoder = OutputDecoder::default();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match stream.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => forward(&chunks, decoder.push(&buffer[..n])),
            Err(error) => {
                warn!(id = %execution.id(), stream = name, %error, "read failed");
                break;
            }
        }
    }
    forward(&chunks, decoder.finish());
    debug!(id = %execution.id(), stream = name, "end of stream");
    execution.advance(ExecutionState::Draining);
    party.arrive();
}

fn forward(chunks: &mpsc::UnboundedSender<String>, text: String) {
    if !text.is_empty() {
        // The writer outlives the readers, so the send only fails after a crash.
        let _ = chunks.send(text);
    }
}

async fn write_output(ctx: StreamerContext, execution: Arc<Execution>, mut chunks: mpsc::UnboundedReceiver<String>) {
    let mut output = String::new();
    while let Some(chunk) = chunks.recv().await {
        output.push_str(&chunk);
        // Output is escaped as a whole so a fence split across chunks is still caught.
        let text = escape_fence_lines(&output);
        if let Err(error) = update_target(&ctx, &execution, |target| target.text = text).await {
            warn!(id = %execution.id(), %error, "failed to write output");
        }
    }
}

/// Re-locate the target block and rewrite it after `mutate`.
async fn update_target<F>(ctx: &StreamerContext, execution: &Execution, mutate: F) -> Result<(), EngineError>
where
    F: FnOnce(&mut Codeblock),
{
    let _edit = ctx.edits.lock().await;
    let (_, blocks) = current_blocks(&ctx.mirror, execution.document()).await?;
    let current = find_target(&blocks, execution.id())
        .ok_or_else(|| EngineError::NotFound(format!("output block for `{}` is gone", execution.id())))?;
    let mut updated = current.clone();
    mutate(&mut updated);
    replace_block(&ctx.mirror, current, &updated).await
}

// ── Status ──

async fn show_status(ctx: &StreamerContext, execution: &Execution, indicator: StatusIndicator) -> Result<(), EngineError> {
    let doc = execution.document();
    let (_, blocks) = current_blocks(&ctx.mirror, doc).await?;
    let (source_annotation, target_annotation) = annotation_ids(execution.id());
    let placements = [
        (find_source(&blocks, execution.id()), source_annotation),
        (find_target(&blocks, execution.id()), target_annotation),
    ];
    for (block, annotation) in placements {
        if let Some(block) = block {
            ctx.editor
                .set_inline_annotation(doc, block.start_line, annotation, indicator.glyph.to_string(), indicator.style)
                .await?;
        }
    }
    Ok(())
}

async fn animate(ctx: StreamerContext, execution: Arc<Execution>, mut stopped: watch::Receiver<bool>) {
    let mut ticks = tokio::time::interval(ctx.status_interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut frame = 0usize;
    loop {
        tokio::select! {
            _ = stopped.changed() => break,
            _ = ticks.tick() => {
                if let Err(error) = show_status(&ctx, &execution, StatusIndicator::running(frame)).await {
                    debug!(id = %execution.id(), %error, "status tick skipped");
                }
                frame = frame.wrapping_add(1);
            }
        }
    }
}

async fn report_spawn_failure(ctx: &StreamerContext, execution: &Execution, error: &EngineError) {
    let message = format!("{error}\n");
    if let Err(write_error) = update_target(ctx, execution, |target| target.text = message).await {
        warn!(id = %execution.id(), error = %write_error, "could not report spawn failure");
    }
    if let Err(status_error) = show_status(ctx, execution, StatusIndicator::failed()).await {
        debug!(id = %execution.id(), error = %status_error, "could not show failure status");
    }
}

// ── Finalization ──

struct Finalization {
    child: Child,
    join: CompletionJoin,
    stop_ticker: watch::Sender<bool>,
    ticker: JoinHandle<()>,
    writer: JoinHandle<()>,
    /// Generated sources; kept until the process has exited.
    scratch: Option<TempDir>,
}

async fn finalize(ctx: StreamerContext, execution: Arc<Execution>, parts: Finalization) -> ExecutionOutcome {
    let Finalization { mut child, join, stop_ticker, ticker, writer, scratch } = parts;

    join.wait().await;
    execution.advance(ExecutionState::Finalizing);

    let _ = stop_ticker.send(true);
    if let Err(join_error) = ticker.await {
        warn!(id = %execution.id(), %join_error, "status ticker crashed");
    }
    if let Err(join_error) = writer.await {
        warn!(id = %execution.id(), %join_error, "output writer crashed");
    }

    let exit_code = match child.wait().await {
        Ok(status) => Some(exit_code_of(status)),
        Err(error) => {
            warn!(id = %execution.id(), %error, "failed to wait for process");
            None
        }
    };
    drop(scratch);
    let success = exit_code == Some(0);

    let last_run = Local::now().to_rfc3339_opts(SecondsFormat::Secs, false);
    let recorded = update_target(&ctx, &execution, |target| {
        target.opts.insert(OPT_LAST_RUN.to_string(), last_run);
        match exit_code {
            Some(code) => {
                target.opts.insert(OPT_EXIT_CODE.to_string(), code.to_string());
            }
            None => {
                target.opts.remove(OPT_EXIT_CODE);
            }
        }
    })
    .await;
    let indicator = match recorded {
        Ok(()) => StatusIndicator::finished(success),
        Err(error) => {
            warn!(id = %execution.id(), %error, "failed to record exit status");
            StatusIndicator::failed()
        }
    };
    if let Err(error) = show_status(&ctx, &execution, indicator).await {
        warn!(id = %execution.id(), %error, "failed to show final status");
    }

    execution.advance(ExecutionState::Done);
    ctx.registry.release(&execution);
    info!(id = %execution.id(), run_id = %execution.run_id(), ?exit_code, "execution finished");

    ExecutionOutcome {
        id: execution.id().to_string(),
        run_id: execution.run_id(),
        document: execution.document(),
        exit_code,
        success,
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().or_else(|| status.signal().map(|signal| 128 + signal)).unwrap_or(-1)
}
