// Engine: ties the mirror, the registry, the runner table and the editor
// together behind `run`, `kill`, `list` and `configure`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use fencerun_common::codeblock::{
    block_at_cursor, block_containing_line, find_source, find_target, Codeblock, OPT_EXIT_CODE, OPT_ID,
    OPT_SOURCE,
};
use fencerun_common::section::{parse_sections, resolve_env};
use fencerun_common::types::{ChangeEvent, DocumentHandle};
use nix::sys::signal::Signal;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::editor::{ChangeStream, EditorAdapter};
use crate::error::EngineError;
use crate::exec::document::{current_blocks, replace_block};
use crate::exec::{streamer, Execution, ExecutionHandle, ExecutionRegistry, StreamRequest, StreamerContext};
use crate::mirror::{ApplyOutcome, DocumentMirror};
use crate::runner::{RunContext, RunInput, RunnerTable};

pub mod blocks;

pub use blocks::{BlockSelector, BlockSummary};

/// Reply to `codeblock.run` once the process is spawned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunStarted {
    pub id: String,
    pub run_id: Uuid,
    pub document: DocumentHandle,
}

impl From<&ExecutionHandle> for RunStarted {
    fn from(handle: &ExecutionHandle) -> Self {
        Self { id: handle.id.clone(), run_id: handle.run_id, document: handle.document }
    }
}

/// Configuration snapshot taken at the start of each operation.
#[derive(Clone)]
struct EngineSettings {
    config: EngineConfig,
    runners: RunnerTable,
    context: RunContext,
    stop_signal: Signal,
}

impl EngineSettings {
    fn from_config(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let stop_signal = config.stop_signal()?;
        Ok(Self {
            runners: RunnerTable::with_overrides(&config.runners),
            context: RunContext::new(config.container_runtime.clone()),
            stop_signal,
            config,
        })
    }
}

pub struct Engine {
    editor: Arc<dyn EditorAdapter>,
    mirror: Arc<DocumentMirror>,
    registry: Arc<ExecutionRegistry>,
    settings: RwLock<EngineSettings>,
    /// Serializes read-modify-write cycles on documents.
    edits: Arc<tokio::sync::Mutex<()>>,
    attaching: tokio::sync::Mutex<()>,
    pumps: Mutex<HashMap<DocumentHandle, JoinHandle<()>>>,
}

impl Engine {
    pub fn new(editor: Arc<dyn EditorAdapter>, config: EngineConfig) -> Result<Self, EngineError> {
        let settings = EngineSettings::from_config(config)?;
        let mirror = Arc::new(DocumentMirror::new(editor.clone(), settings.config.write_ack_timeout()));
        Ok(Self {
            editor,
            mirror,
            registry: Arc::new(ExecutionRegistry::new()),
            settings: RwLock::new(settings),
            edits: Arc::new(tokio::sync::Mutex::new(())),
            attaching: tokio::sync::Mutex::new(()),
            pumps: Mutex::new(HashMap::new()),
        })
    }

    fn settings(&self) -> EngineSettings {
        self.settings.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    fn pumps(&self) -> MutexGuard<'_, HashMap<DocumentHandle, JoinHandle<()>>> {
        self.pumps.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> EngineConfig {
        self.settings().config
    }

    pub fn mirror(&self) -> &Arc<DocumentMirror> {
        &self.mirror
    }

    /// Replace the configuration. Runs already in flight keep their settings.
    pub fn configure(&self, value: serde_json::Value) -> Result<EngineConfig, EngineError> {
        let config = EngineConfig::from_json(value)?;
        let settings = EngineSettings::from_config(config.clone())?;
        self.mirror.set_ack_timeout(config.write_ack_timeout());
        *self.settings.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = settings;
        info!(
            stop_signal = %config.stop_signal,
            container_runtime = %config.container_runtime,
            runner_overrides = config.runners.len(),
            "engine configured"
        );
        Ok(config)
    }

    // ── Documents ──

    async fn resolve_document(&self, doc: Option<DocumentHandle>) -> Result<DocumentHandle, EngineError> {
        match doc {
            Some(doc) => Ok(doc),
            None => Ok(self.editor.current_document().await?),
        }
    }

    /// Make sure `doc` is mirrored and its change feed is pumped into the mirror.
    pub async fn ensure_attached(&self, doc: DocumentHandle) -> Result<(), EngineError> {
        if self.mirror.is_attached(doc) {
            return Ok(());
        }
        let _attaching = self.attaching.lock().await;
        if self.mirror.is_attached(doc) {
            return Ok(());
        }

        let mut changes = self.editor.subscribe_to_changes(doc).await?;
        match tokio::time::timeout(self.mirror.ack_timeout(), changes.recv()).await {
            Ok(Some(event)) if event.handle == doc && event.is_whole_buffer() => {
                self.mirror.apply_change(event);
            }
            Ok(Some(event)) => {
                warn!(%doc, "change feed did not start with the whole buffer, reading it directly");
                self.attach_directly(doc).await?;
                self.mirror.apply_change(event);
            }
            Ok(None) | Err(_) => {
                warn!(%doc, "no initial buffer from the change feed, reading it directly");
                self.attach_directly(doc).await?;
            }
        }

        let pump = tokio::spawn(pump_changes(doc, changes, self.mirror.clone()));
        if let Some(stale) = self.pumps().insert(doc, pump) {
            stale.abort();
        }
        debug!(%doc, "document attached");
        Ok(())
    }

    async fn attach_directly(&self, doc: DocumentHandle) -> Result<(), EngineError> {
        let lines = self.editor.read_raw_lines(doc, 0, -1).await?;
        self.mirror.attach(doc, lines);
        Ok(())
    }

    /// Apply a change that arrived without a subscription.
    pub fn apply_change(&self, event: ChangeEvent) -> ApplyOutcome {
        self.mirror.apply_change(event)
    }

    /// Stop mirroring `doc`.
    pub fn detach(&self, doc: DocumentHandle) {
        if let Some(pump) = self.pumps().remove(&doc) {
            pump.abort();
        }
        self.mirror.detach(doc);
        debug!(%doc, "document detached");
    }

    /// Current codeblocks of a document.
    pub async fn blocks(&self, doc: Option<DocumentHandle>) -> Result<Vec<Codeblock>, EngineError> {
        let doc = self.resolve_document(doc).await?;
        self.ensure_attached(doc).await?;
        let (_, blocks) = current_blocks(&self.mirror, doc).await?;
        Ok(blocks)
    }

    pub async fn list(&self, doc: Option<DocumentHandle>) -> Result<Vec<BlockSummary>, EngineError> {
        let blocks = self.blocks(doc).await?;
        Ok(blocks
            .iter()
            .map(|block| {
                let state = block.id().and_then(|id| self.registry.lookup(id)).map(|execution| execution.state());
                BlockSummary::new(block, state)
            })
            .collect())
    }

    /// Identities currently executing.
    pub fn running(&self) -> Vec<String> {
        self.registry.ids()
    }

    async fn select(&self, blocks: &[Codeblock], selector: &BlockSelector) -> Result<Codeblock, EngineError> {
        let selected = match selector {
            BlockSelector::Cursor => {
                let cursor = self.editor.current_cursor().await?;
                block_at_cursor(blocks, cursor.line)
                    .ok_or_else(|| EngineError::NotFound(format!("no codeblock under the cursor (line {})", cursor.line)))?
            }
            BlockSelector::Identity { id } => find_source(blocks, id)
                .or_else(|| find_target(blocks, id))
                .ok_or_else(|| EngineError::NotFound(format!("no codeblock with identity `{id}`")))?,
            BlockSelector::Line { line } => block_containing_line(blocks, *line)
                .ok_or_else(|| EngineError::NotFound(format!("no codeblock on line {line}")))?,
        };
        Ok(selected.clone())
    }

    // ── Execution ──

    /// Run a codeblock. Returns once the process is spawned.
    pub async fn run(&self, doc: Option<DocumentHandle>, selector: BlockSelector) -> Result<ExecutionHandle, EngineError> {
        let doc = self.resolve_document(doc).await?;
        self.ensure_attached(doc).await?;
        let settings = self.settings();

        let edit = self.edits.lock().await;
        let (lines, blocks) = current_blocks(&self.mirror, doc).await?;
        let selected = self.select(&blocks, &selector).await?;
        let redirect = match selected.opt(OPT_ID) {
            Some(_) => None,
            None => selected.opt(OPT_SOURCE).map(str::to_string),
        };
        let mut source = match redirect {
            Some(id) => find_source(&blocks, &id)
                .cloned()
                .ok_or_else(|| EngineError::NotFound(format!("no source block for output `{id}`")))?,
            None => selected,
        };

        let id = match source.opt(OPT_ID) {
            Some(id) => id.to_string(),
            None => {
                let id = blocks::fresh_id(&blocks);
                let current = source.clone();
                source.opts.insert(OPT_ID.to_string(), id.clone());
                replace_block(&self.mirror, &current, &source).await?;
                debug!(%doc, %id, "assigned identity");
                id
            }
        };

        let sections = parse_sections(&lines);
        let env = resolve_env(&source, &blocks, &sections);
        let entry = settings
            .runners
            .resolve(&source.language)
            .ok_or_else(|| EngineError::UnsupportedLanguage(source.language.clone()))?;
        let input = RunInput { language: &source.language, text: &source.text, opts: &source.opts, env: &env };
        let command = entry.create_command(&input, &settings.context)?;

        let execution = Arc::new(Execution::new(id.clone(), doc, settings.stop_signal));
        self.registry.admit(execution.clone())?;
        if let Err(error) = self.prepare_target(doc, &id, source.out_language()).await {
            self.registry.release(&execution);
            return Err(error);
        }
        drop(edit);

        info!(%doc, %id, language = %source.language, command = %command.display(), "running codeblock");
        let ctx = StreamerContext {
            mirror: self.mirror.clone(),
            editor: self.editor.clone(),
            registry: self.registry.clone(),
            status_interval: settings.config.status_interval(),
            edits: self.edits.clone(),
        };
        streamer::start(ctx, StreamRequest { execution, command }).await
    }

    /// Clear the output block of `id`, creating it below the source if missing.
    async fn prepare_target(&self, doc: DocumentHandle, id: &str, out_language: &str) -> Result<(), EngineError> {
        let (_, blocks) = current_blocks(&self.mirror, doc).await?;
        if let Some(target) = find_target(&blocks, id) {
            let mut cleared = target.clone();
            cleared.text.clear();
            cleared.opts.remove(OPT_EXIT_CODE);
            return replace_block(&self.mirror, target, &cleared).await;
        }

        let source = find_source(&blocks, id)
            .ok_or_else(|| EngineError::NotFound(format!("source block `{id}` disappeared")))?;
        let mut inserted = vec![String::new()];
        inserted.extend(Codeblock::new_target(doc, out_language, id).render());
        let after = source.end_line + 1;
        self.mirror.write_lines(doc, after, after, inserted).await?;
        Ok(())
    }

    /// Interrupt a running codeblock. Returns its identity.
    pub async fn kill(&self, doc: Option<DocumentHandle>, selector: BlockSelector) -> Result<String, EngineError> {
        let id = match selector {
            BlockSelector::Identity { id } => id,
            other => {
                let blocks = self.blocks(doc).await?;
                let selected = self.select(&blocks, &other).await?;
                selected
                    .id()
                    .map(str::to_string)
                    .ok_or_else(|| EngineError::NotFound("codeblock has never been run".into()))?
            }
        };

        let execution =
            self.registry.lookup(&id).ok_or_else(|| EngineError::NotFound(format!("codeblock `{id}` is not running")))?;
        execution.kill()?;
        Ok(id)
    }

    /// Signal every running execution and stop pumping change feeds.
    pub fn shutdown(&self) {
        for id in self.registry.ids() {
            if let Some(execution) = self.registry.lookup(&id) {
                if let Err(error) = execution.kill() {
                    debug!(%id, %error, "not killed on shutdown");
                }
            }
        }
        for (_, pump) in self.pumps().drain() {
            pump.abort();
        }
    }
}

async fn pump_changes(doc: DocumentHandle, mut changes: ChangeStream, mirror: Arc<DocumentMirror>) {
    while let Some(event) = changes.recv().await {
        mirror.apply_change(event);
    }
    debug!(%doc, "change feed ended");
    mirror.detach(doc);
}
