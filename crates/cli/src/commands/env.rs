// `fencerun env`: show the section environment a codeblock would run with.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::Args;
use serde::{Deserialize, Serialize};

use fencerun_common::codeblock::{block_containing_line, parse_codeblocks};
use fencerun_common::section::{enclosing_section, parse_sections, resolve_env};
use fencerun_common::types::DocumentHandle;
use fencerun_daemon::error::EngineError;

use crate::exit_code::ExitCode;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct EnvArgs {
    /// Markdown file.
    pub file: PathBuf,

    /// A line (1-based) inside the codeblock.
    #[arg(long)]
    pub line: usize,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvResult {
    pub file: String,
    pub line: usize,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

pub fn run(args: EnvArgs) -> anyhow::Result<ExitCode> {
    let format = OutputFormat::detect(args.json);
    match block_env(&args.file, args.line) {
        Ok(result) => {
            output::print_output(format, &result, format_human)?;
            Ok(ExitCode::Success)
        }
        Err(e) => {
            output::print_anyhow_error(format, &e);
            Err(e)
        }
    }
}

fn block_env(path: &Path, line: usize) -> anyhow::Result<EnvResult> {
    let lines = super::read_lines(path)?;
    let blocks = parse_codeblocks(DocumentHandle(0), &lines)?;
    let sections = parse_sections(&lines);

    let block = line
        .checked_sub(1)
        .and_then(|index| block_containing_line(&blocks, index))
        .ok_or_else(|| EngineError::NotFound(format!("no codeblock at line {line}")))?;

    Ok(EnvResult {
        file: path.display().to_string(),
        line,
        section: enclosing_section(&sections, block.start_line, block.end_line).map(|section| section.heading.clone()),
        env: resolve_env(block, &blocks, &sections),
    })
}

fn format_human(result: &EnvResult) -> String {
    let mut lines = Vec::new();
    match &result.section {
        Some(heading) => lines.push(format!("# {heading}")),
        None => lines.push("# (document root)".to_string()),
    }
    for (key, value) in &result.env {
        lines.push(format!("{key}={value}"));
    }
    lines.join("\n")
}
