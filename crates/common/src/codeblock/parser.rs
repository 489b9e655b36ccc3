use std::collections::BTreeMap;

use crate::types::DocumentHandle;

use super::{Codeblock, FENCE};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("codeblock opened at line {line} is never closed")]
    UnclosedFence { line: usize },
}

/// A fence line split into its language tag and options.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FenceHeader {
    pub language: String,
    pub opts: BTreeMap<String, String>,
}

pub fn is_fence_line(line: &str) -> bool {
    line.trim().starts_with(FENCE)
}

/// Marker put in front of body lines that would otherwise read as a fence.
///
/// A zero-width space is not whitespace to `str::trim`, so the escaped line no
/// longer starts with backticks.
pub const FENCE_ESCAPE: char = '\u{200B}';

/// Escape every line of `text` that would open or close a codeblock.
pub fn escape_fence_lines(text: &str) -> String {
    if !text.contains(FENCE) {
        return text.to_string();
    }
    text.split_inclusive('\n')
        .map(|line| if is_fence_line(line) { format!("{FENCE_ESCAPE}{line}") } else { line.to_string() })
        .collect()
}

/// Parse the text after the backticks of an opening fence.
///
/// The first token is the language unless it is itself a `KEY=VALUE` pair, so
/// a header such as ```` ``` ID=3 ```` has no language and renders back the same
/// way. A first token with an `=` in it is never taken as a language name.
/// Tokens that do not split into exactly two parts on `=` are ignored.
pub fn parse_fence_header(line: &str) -> FenceHeader {
    let rest = line.trim().trim_start_matches('`');
    let mut tokens = rest.split_whitespace().peekable();
    let mut header = FenceHeader::default();

    if let Some(first) = tokens.peek() {
        if option_pair(first).is_none() {
            header.language = (*first).to_string();
            tokens.next();
        }
    }

    for token in tokens {
        if let Some((key, value)) = option_pair(token) {
            header.opts.insert(key.to_string(), value.to_string());
        }
    }

    header
}

fn option_pair(token: &str) -> Option<(&str, &str)> {
    let mut parts = token.split('=');
    let key = parts.next()?;
    let value = parts.next()?;
    if parts.next().is_some() || key.is_empty() {
        return None;
    }
    Some((key, value))
}

fn indentation(line: &str) -> usize {
    line.chars().take_while(|ch| ch.is_whitespace()).count()
}

/// Extract every fenced codeblock from `lines`, in document order.
///
/// Fences toggle: a fence line opens a block when none is open and closes the
/// open one otherwise. A trailing unclosed fence is an error.
pub fn parse_codeblocks(document: DocumentHandle, lines: &[String]) -> Result<Vec<Codeblock>, ParseError> {
    let mut blocks = Vec::new();
    let mut open: Option<(usize, &str)> = None;

    for (index, line) in lines.iter().enumerate() {
        if !is_fence_line(line) {
            continue;
        }

        match open.take() {
            None => open = Some((index, line.as_str())),
            Some((start, fence)) => {
                let header = parse_fence_header(fence);
                let interior = &lines[start + 1..index];
                let mut text = interior.join("\n");
                if !text.is_empty() {
                    text.push('\n');
                }

                blocks.push(Codeblock {
                    language: header.language,
                    start_line: start,
                    end_line: index,
                    start_col: indentation(fence),
                    end_col: line.chars().count(),
                    opts: header.opts,
                    text,
                    document,
                });
            }
        }
    }

    if let Some((line, _)) = open {
        return Err(ParseError::UnclosedFence { line });
    }

    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn escaped_fence_lines_no_longer_toggle_blocks() {
        let output = "before\n```\n  ```rust\nafter";
        let escaped = escape_fence_lines(output);
        assert_eq!(escaped, "before\n\u{200B}```\n\u{200B}  ```rust\nafter");
        assert!(escaped.lines().all(|line| !is_fence_line(line)));
        assert_eq!(escape_fence_lines("plain `code`\n"), "plain `code`\n");
    }

    #[test]
    fn parses_language_options_and_text() {
        let doc = lines("# Title\n```sh ID=1 CWD=/tmp\necho hi\necho bye\n```\ntrailer");
        let blocks = parse_codeblocks(DocumentHandle(4), &doc).expect("parse");

        assert_eq!(blocks.len(), 1);
        let block = &blocks[0];
        assert_eq!(block.language, "sh");
        assert_eq!(block.start_line, 1);
        assert_eq!(block.end_line, 4);
        assert_eq!(block.opt("ID"), Some("1"));
        assert_eq!(block.opt("CWD"), Some("/tmp"));
        assert_eq!(block.text, "echo hi\necho bye\n");
        assert_eq!(block.document, DocumentHandle(4));
    }

    #[test]
    fn empty_block_has_empty_text() {
        let blocks = parse_codeblocks(DocumentHandle(1), &lines("```out SOURCE=9\n```")).expect("parse");
        assert_eq!(blocks[0].text, "");
        assert!(blocks[0].is_target());
    }

    #[test]
    fn malformed_option_tokens_are_ignored() {
        let header = parse_fence_header("```py A=1=2 flag B= =x C=3");
        assert_eq!(header.language, "py");
        assert_eq!(header.opts.get("B").map(String::as_str), Some(""));
        assert_eq!(header.opts.get("C").map(String::as_str), Some("3"));
        assert_eq!(header.opts.len(), 2);
    }

    #[test]
    fn first_token_pair_is_an_option_not_a_language() {
        let header = parse_fence_header("``` ID=5");
        assert_eq!(header.language, "");
        assert_eq!(header.opts.get("ID").map(String::as_str), Some("5"));
    }

    #[test]
    fn indented_fences_are_recognised() {
        let doc = lines("  ```bash\n  ls\n  ```");
        let blocks = parse_codeblocks(DocumentHandle(1), &doc).expect("parse");
        assert_eq!(blocks[0].language, "bash");
        assert_eq!(blocks[0].start_col, 2);
        assert_eq!(blocks[0].text, "  ls\n");
    }

    #[test]
    fn unclosed_fence_is_an_error() {
        let doc = lines("```sh\necho\n```\n```py\nprint(1)");
        assert_eq!(
            parse_codeblocks(DocumentHandle(1), &doc),
            Err(ParseError::UnclosedFence { line: 3 })
        );
    }

    #[test]
    fn document_without_blocks_parses_to_nothing() {
        let blocks = parse_codeblocks(DocumentHandle(1), &lines("just\nprose")).expect("parse");
        assert!(blocks.is_empty());
    }
}
