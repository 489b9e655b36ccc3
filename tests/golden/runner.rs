use fencerun_common::codeblock::{parse_codeblocks, Codeblock};
use fencerun_common::section::{parse_sections, resolve_env};
use fencerun_common::types::DocumentHandle;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct GoldenCase {
    name: String,
    document: String,
    expected_blocks: Vec<ExpectedBlock>,
    expected_env: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct ExpectedBlock {
    language: String,
    start_line: usize,
    end_line: usize,
    #[serde(default)]
    opts: BTreeMap<String, String>,
    text: String,
}

impl From<&Codeblock> for ExpectedBlock {
    fn from(block: &Codeblock) -> Self {
        Self {
            language: block.language.clone(),
            start_line: block.start_line,
            end_line: block.end_line,
            opts: block.opts.clone(),
            text: block.text.clone(),
        }
    }
}

#[test]
fn codeblock_golden_cases() {
    let cases_dir = golden_cases_dir();
    let cases = load_cases(&cases_dir);

    assert!(
        !cases.is_empty(),
        "no golden cases found in {}",
        cases_dir.display()
    );

    let mut failures = Vec::new();
    for case in cases {
        if let Err(message) = run_case(&case) {
            failures.push(message);
        }
    }

    if !failures.is_empty() {
        panic!(
            "{} golden case(s) failed:\n\n{}",
            failures.len(),
            failures.join("\n\n")
        );
    }
}

fn golden_cases_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../tests/golden/cases")
}

fn load_cases(cases_dir: &Path) -> Vec<GoldenCase> {
    let mut case_dirs: Vec<PathBuf> = fs::read_dir(cases_dir)
        .unwrap_or_else(|error| panic!("failed to read {}: {error}", cases_dir.display()))
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            if path.is_dir() { Some(path) } else { None }
        })
        .collect();
    case_dirs.sort();
    case_dirs.into_iter().map(load_case).collect()
}

fn load_case(case_dir: PathBuf) -> GoldenCase {
    let name = case_dir
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("<unnamed-case>")
        .to_owned();
    let document_path = case_dir.join("document.md");
    let blocks_path = case_dir.join("expected_blocks.json");
    let env_path = case_dir.join("expected_env.json");

    let document = read_required(&document_path);
    let expected_blocks = serde_json::from_str::<Vec<ExpectedBlock>>(&read_required(&blocks_path))
        .unwrap_or_else(|error| {
            panic!("failed to parse expected blocks in {}: {error}", blocks_path.display())
        });
    let expected_env = if env_path.exists() {
        serde_json::from_str(&read_required(&env_path)).unwrap_or_else(|error| {
            panic!("failed to parse expected env in {}: {error}", env_path.display())
        })
    } else {
        BTreeMap::new()
    };

    GoldenCase { name, document, expected_blocks, expected_env }
}

fn run_case(case: &GoldenCase) -> Result<(), String> {
    let lines: Vec<String> = case.document.lines().map(str::to_string).collect();
    let blocks = parse_codeblocks(DocumentHandle(1), &lines)
        .map_err(|error| format!("case `{}` failed to parse: {error}", case.name))?;
    let actual: Vec<ExpectedBlock> = blocks.iter().map(ExpectedBlock::from).collect();

    if actual != case.expected_blocks {
        return Err(format_blocks_mismatch(&case.name, &case.expected_blocks, &actual));
    }

    let sections = parse_sections(&lines);
    for (id, expected) in &case.expected_env {
        let block = blocks
            .iter()
            .find(|block| block.id() == Some(id.as_str()) && !block.is_target())
            .ok_or_else(|| format!("case `{}` has no source block with ID={id}", case.name))?;
        let env = resolve_env(block, &blocks, &sections);
        if &env != expected {
            return Err(format!(
                "case `{}` env mismatch for ID={id}.\nexpected: {expected:?}\nactual:   {env:?}",
                case.name
            ));
        }
    }

    // Rendering every block in place must reproduce canonical documents.
    let mut rendered = lines.clone();
    for block in blocks.iter().rev() {
        rendered.splice(block.start_line..=block.end_line, block.render());
    }
    if rendered != lines {
        return Err(format!(
            "case `{}` render mismatch.\nexpected: {:?}\nactual:   {:?}",
            case.name, lines, rendered
        ));
    }

    Ok(())
}

fn format_blocks_mismatch(case_name: &str, expected: &[ExpectedBlock], actual: &[ExpectedBlock]) -> String {
    let max_len = expected.len().max(actual.len());

    let mut diff_lines = Vec::with_capacity(max_len);
    for index in 0..max_len {
        let expected_line = expected.get(index).map(|b| format!("{b:?}")).unwrap_or_else(|| "<none>".into());
        let actual_line = actual.get(index).map(|b| format!("{b:?}")).unwrap_or_else(|| "<none>".into());
        let marker = if expected_line == actual_line { " " } else { "!" };
        diff_lines.push(format!(
            "{marker} [{index}] expected: {expected_line}\n      actual:   {actual_line}"
        ));
    }

    format!("case `{case_name}` codeblock mismatch.\nDiff:\n{}", diff_lines.join("\n"))
}

fn read_required(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|error| panic!("failed to read {}: {error}", path.display()))
}
