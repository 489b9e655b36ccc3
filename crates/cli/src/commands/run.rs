// `fencerun run`: execute one codeblock of a markdown file.
//
// The file is loaded into an in-process editor, run through the same engine
// the editor host uses, then written back with the refreshed output block.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use serde::{Deserialize, Serialize};
use tracing::debug;

use fencerun_common::codeblock::{find_target, parse_codeblocks};
use fencerun_common::types::DocumentHandle;
use fencerun_daemon::config::EngineConfig;
use fencerun_daemon::editor::{EditorAdapter, MemoryEditor};
use fencerun_daemon::engine::{BlockSelector, Engine};

use crate::exit_code::ExitCode;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Markdown file.
    pub file: PathBuf,

    /// A line (1-based) inside the codeblock to run.
    #[arg(long, conflicts_with = "id", required_unless_present = "id")]
    pub line: Option<usize>,

    /// Identity (`ID=`/`SOURCE=`) of the codeblock to run.
    #[arg(long)]
    pub id: Option<String>,

    /// Engine config file (defaults to ~/.fencerun/config.toml).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Leave the file untouched.
    #[arg(long)]
    pub no_save: bool,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub file: String,
    pub id: String,
    pub run_id: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
    pub success: bool,
    /// Final contents of the output block.
    #[serde(default)]
    pub output: String,
    pub saved: bool,
}

pub fn run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let format = OutputFormat::detect(args.json);
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;

    match runtime.block_on(execute(&args, format)) {
        Ok(report) => {
            output::print_output(format, &report, format_human)?;
            Ok(if report.success { ExitCode::Success } else { ExitCode::CommandFailed })
        }
        Err(e) => {
            output::print_anyhow_error(format, &e);
            Err(e)
        }
    }
}

fn selector(args: &RunArgs) -> anyhow::Result<BlockSelector> {
    match (&args.id, args.line) {
        (Some(id), _) => Ok(BlockSelector::Identity { id: id.clone() }),
        (None, Some(line)) if line > 0 => Ok(BlockSelector::Line { line: line - 1 }),
        (None, Some(_)) => anyhow::bail!("--line is 1-based"),
        (None, None) => anyhow::bail!("pass --line or --id"),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => {
            EngineConfig::load_from(path).with_context(|| format!("failed to load config `{}`", path.display()))
        }
        None => Ok(EngineConfig::load()),
    }
}

async fn execute(args: &RunArgs, format: OutputFormat) -> anyhow::Result<RunReport> {
    let selector = selector(args)?;
    let config = load_config(args.config.as_deref())?;
    let text = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read `{}`", args.file.display()))?;

    let editor = MemoryEditor::new();
    let doc = editor.open_text(&text);
    let engine = Engine::new(Arc::new(editor.clone()), config)?;
    let mut changes = editor.subscribe_to_changes(doc).await?;

    let handle = engine.run(Some(doc), selector).await?;
    let id = handle.id.clone();
    let run_id = handle.run_id.to_string();
    debug!(id = %id, run_id = %run_id, "codeblock started");

    let mut echo = OutputEcho::new(id.clone());
    let streaming = format == OutputFormat::Human;
    let completion = handle.wait();
    tokio::pin!(completion);

    let outcome = loop {
        tokio::select! {
            outcome = &mut completion => break outcome?,
            Some(_) = changes.recv(), if streaming => {
                if let Some(lines) = editor.lines(doc) {
                    echo.print(&lines, false)?;
                }
            }
            Ok(()) = tokio::signal::ctrl_c() => {
                if let Err(error) = engine.kill(Some(doc), BlockSelector::Identity { id: id.clone() }).await {
                    debug!(id = %id, error = %error, "interrupt arrived after the run ended");
                }
            }
        }
    };
    engine.shutdown();

    let lines = editor.lines(doc).unwrap_or_default();
    if streaming {
        echo.print(&lines, true)?;
    }

    let saved = !args.no_save;
    if saved {
        let updated = editor.text(doc).unwrap_or_default();
        std::fs::write(&args.file, updated)
            .with_context(|| format!("failed to write `{}`", args.file.display()))?;
    }

    Ok(RunReport {
        file: args.file.display().to_string(),
        id: outcome.id,
        run_id,
        exit_code: outcome.exit_code,
        success: outcome.success,
        output: target_body(doc, &lines, &id).map(|body| body.join("\n")).unwrap_or_default(),
        saved,
    })
}

fn target_body<'a>(doc: DocumentHandle, lines: &'a [String], id: &str) -> Option<&'a [String]> {
    let blocks = parse_codeblocks(doc, lines).ok()?;
    let target = find_target(&blocks, id)?;
    lines.get(target.start_line + 1..target.end_line)
}

/// Echoes the output block to stdout as it fills.
///
/// While the run is live the last body line may still grow, so it is held
/// back until the run finishes.
struct OutputEcho {
    id: String,
    printed: usize,
}

impl OutputEcho {
    fn new(id: String) -> Self {
        Self { id, printed: 0 }
    }

    fn settled(&mut self, lines: &[String], finished: bool) -> Vec<String> {
        let Some(body) = target_body(DocumentHandle(0), lines, &self.id) else {
            return Vec::new();
        };
        if self.printed > body.len() {
            self.printed = 0;
        }
        let stable = if finished { body.len() } else { body.len().saturating_sub(1) };
        if stable <= self.printed {
            return Vec::new();
        }
        let fresh = body[self.printed..stable].to_vec();
        self.printed = stable;
        fresh
    }

    fn print(&mut self, lines: &[String], finished: bool) -> std::io::Result<()> {
        let fresh = self.settled(lines, finished);
        if fresh.is_empty() {
            return Ok(());
        }
        let mut out = std::io::stdout().lock();
        for line in fresh {
            writeln!(out, "{line}")?;
        }
        out.flush()
    }
}

fn format_human(report: &RunReport) -> String {
    let status = match report.exit_code {
        Some(code) => format!("exited with code {code}"),
        None => "did not report an exit code".to_string(),
    };
    let saved = if report.saved { format!(", output saved to {}", report.file) } else { String::new() };
    format!("[{}] {status}{saved}", report.id)
}
