// `fencerun blocks`: list the codeblocks of a markdown file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::Args;
use serde::{Deserialize, Serialize};

use fencerun_common::codeblock::{parse_codeblocks, BlockRole, Codeblock};
use fencerun_common::types::DocumentHandle;

use crate::exit_code::ExitCode;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct BlocksArgs {
    /// Markdown file.
    pub file: PathBuf,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlocksResult {
    pub file: String,
    #[serde(default)]
    pub blocks: Vec<BlockRow>,
}

/// One codeblock. Lines are 1-based, as an editor shows them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRow {
    pub start_line: usize,
    pub end_line: usize,
    pub language: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub role: Option<BlockRole>,
    #[serde(default)]
    pub opts: BTreeMap<String, String>,
}

impl From<&Codeblock> for BlockRow {
    fn from(block: &Codeblock) -> Self {
        Self {
            start_line: block.start_line + 1,
            end_line: block.end_line + 1,
            language: block.language.clone(),
            id: block.id().map(str::to_string),
            role: block.id().map(|_| block.role()),
            opts: block.opts.clone(),
        }
    }
}

pub fn run(args: BlocksArgs) -> anyhow::Result<ExitCode> {
    let format = OutputFormat::detect(args.json);
    match list_blocks(&args.file) {
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

fn list_blocks(path: &Path) -> anyhow::Result<BlocksResult> {
    let lines = super::read_lines(path)?;
    let blocks = parse_codeblocks(DocumentHandle(0), &lines)?;
    Ok(BlocksResult { file: path.display().to_string(), blocks: blocks.iter().map(BlockRow::from).collect() })
}

fn format_human(result: &BlocksResult) -> String {
    let mut lines = Vec::new();
    lines.push(format!("{}: {} codeblock(s)", result.file, result.blocks.len()));

    if result.blocks.is_empty() {
        return lines.join("\n");
    }

    lines.push(format!("  {:<11} {:<10} {:<16} {}", "LINES", "LANG", "ID", "OPTIONS"));

    for block in &result.blocks {
        let span = format!("{}-{}", block.start_line, block.end_line);
        let id = match (&block.id, block.role) {
            (Some(id), Some(BlockRole::Target)) => format!("<- {id}"),
            (Some(id), _) => id.clone(),
            (None, _) => "-".into(),
        };
        let opts = block
            .opts
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(" ");
        lines.push(format!("  {:<11} {:<10} {:<16} {}", span, block.language, id, opts).trim_end().to_string());
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTES: &str = "# Notes\n\n```bash ID=1700000000000\necho hi\n```\n\n```out SOURCE=1700000000000 EXIT_CODE=0\nhi\n```\n\n```python\nprint(1)\n```\n";

    fn write_notes() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, NOTES).unwrap();
        (dir, path)
    }

    #[test]
    fn lists_blocks_with_one_based_lines() {
        let (_dir, path) = write_notes();
        let result = list_blocks(&path).unwrap();

        assert_eq!(result.blocks.len(), 3);
        let source = &result.blocks[0];
        assert_eq!((source.start_line, source.end_line), (3, 5));
        assert_eq!(source.id.as_deref(), Some("1700000000000"));
        assert_eq!(source.role, Some(BlockRole::Source));

        let target = &result.blocks[1];
        assert_eq!(target.role, Some(BlockRole::Target));
        assert_eq!(target.opts.get("EXIT_CODE").map(String::as_str), Some("0"));

        assert_eq!(result.blocks[2].id, None);
    }

    #[test]
    fn human_format_shows_table() {
        let (_dir, path) = write_notes();
        let output = format_human(&list_blocks(&path).unwrap());
        assert!(output.contains("3 codeblock(s)"));
        assert!(output.contains("3-5"));
        assert!(output.contains("<- 1700000000000"));
        assert!(output.contains("EXIT_CODE=0"));
    }

    #[test]
    fn human_format_empty() {
        let result = BlocksResult { file: "empty.md".into(), blocks: vec![] };
        assert_eq!(format_human(&result), "empty.md: 0 codeblock(s)");
    }

    #[test]
    fn unterminated_fence_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.md");
        std::fs::write(&path, "```bash\necho never closed\n").unwrap();
        assert!(list_blocks(&path).is_err());
    }

    #[test]
    fn json_format_roundtrips() {
        let (_dir, path) = write_notes();
        let mut buf = Vec::new();
        output::write_output(&mut buf, OutputFormat::Json, &list_blocks(&path).unwrap(), format_human).unwrap();
        let parsed: BlocksResult = serde_json::from_slice(&buf).unwrap();
        assert_eq!(parsed.blocks.len(), 3);
        assert_eq!(parsed.blocks[1].role, Some(BlockRole::Target));
    }
}
