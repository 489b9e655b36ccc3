// Codeblock model: fenced regions tagged with a language and `KEY=VALUE` options.
//
// A source block carries `ID=<id>`; its output block carries `SOURCE=<id>`.
// The shared value is the execution identity of the pair.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::DocumentHandle;

pub mod parser;
pub mod render;

pub use parser::{parse_codeblocks, ParseError};

/// Fence marker opening and closing a codeblock.
pub const FENCE: &str = "```";

pub const OPT_ID: &str = "ID";
pub const OPT_SOURCE: &str = "SOURCE";
pub const OPT_CWD: &str = "CWD";
pub const OPT_OUT: &str = "OUT";
pub const OPT_LAST_RUN: &str = "LAST_RUN";
pub const OPT_EXIT_CODE: &str = "EXIT_CODE";
pub const OPT_IMAGE: &str = "IMAGE";
pub const OPT_DOCKER: &str = "DOCKER";
pub const OPT_FULL_FILE: &str = "FULL_FILE";

/// `CWD=docker:<container>` runs the block inside that container.
pub const DOCKER_CWD_PREFIX: &str = "docker:";

/// Language of output blocks created without an `OUT` option.
pub const DEFAULT_OUT_LANGUAGE: &str = "out";

/// Language of blocks holding section-scoped `KEY=VALUE` bindings.
pub const ENV_LANGUAGE: &str = "env";

/// Which half of a source/target pair a block plays.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BlockRole {
    Source,
    Target,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Codeblock {
    pub language: String,
    /// Line of the opening fence (0-based).
    pub start_line: usize,
    /// Line of the closing fence (0-based).
    pub end_line: usize,
    /// Indentation of the opening fence.
    pub start_col: usize,
    /// Width of the closing fence line.
    pub end_col: usize,
    pub opts: BTreeMap<String, String>,
    /// Interior lines joined with `\n`, with a trailing `\n` unless empty.
    pub text: String,
    pub document: DocumentHandle,
}

impl Codeblock {
    /// An empty output block paired with the source identity `id`.
    pub fn new_target(document: DocumentHandle, language: &str, id: &str) -> Self {
        let mut opts = BTreeMap::new();
        opts.insert(OPT_SOURCE.to_string(), id.to_string());
        Self {
            language: language.to_string(),
            start_line: 0,
            end_line: 1,
            start_col: 0,
            end_col: FENCE.len(),
            opts,
            text: String::new(),
            document,
        }
    }

    /// Execution identity: `ID` if present, otherwise `SOURCE`.
    pub fn id(&self) -> Option<&str> {
        self.opts.get(OPT_ID).or_else(|| self.opts.get(OPT_SOURCE)).map(String::as_str)
    }

    pub fn is_target(&self) -> bool {
        self.opts.contains_key(OPT_SOURCE)
    }

    pub fn role(&self) -> BlockRole {
        if self.opts.contains_key(OPT_ID) {
            BlockRole::Source
        } else if self.is_target() {
            BlockRole::Target
        } else {
            BlockRole::Source
        }
    }

    pub fn opt(&self, key: &str) -> Option<&str> {
        self.opts.get(key).map(String::as_str)
    }

    /// Language tag for the output block of this source.
    pub fn out_language(&self) -> &str {
        self.opt(OPT_OUT).filter(|lang| !lang.is_empty()).unwrap_or(DEFAULT_OUT_LANGUAGE)
    }

    /// Whether `line` (0-based) falls on or between the fences.
    pub fn contains_line(&self, line: usize) -> bool {
        line >= self.start_line && line <= self.end_line
    }
}

/// The source block whose `ID` equals `id`.
pub fn find_source<'a>(blocks: &'a [Codeblock], id: &str) -> Option<&'a Codeblock> {
    blocks.iter().find(|block| block.opt(OPT_ID) == Some(id))
}

/// The output block whose `SOURCE` equals `id`.
pub fn find_target<'a>(blocks: &'a [Codeblock], id: &str) -> Option<&'a Codeblock> {
    blocks.iter().find(|block| block.opt(OPT_SOURCE) == Some(id))
}

/// The block under an editor cursor on 1-based `line`.
///
/// Matches from the opening fence up to the last body line.
pub fn block_at_cursor(blocks: &[Codeblock], line: usize) -> Option<&Codeblock> {
    blocks.iter().find(|block| block.start_line < line && block.end_line >= line)
}

/// The block containing 0-based `line`, fences included.
pub fn block_containing_line(blocks: &[Codeblock], line: usize) -> Option<&Codeblock> {
    blocks.iter().find(|block| block.contains_line(line))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_with(opts: &[(&str, &str)]) -> Codeblock {
        Codeblock {
            language: "sh".into(),
            start_line: 2,
            end_line: 5,
            start_col: 0,
            end_col: 3,
            opts: opts.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            text: String::new(),
            document: DocumentHandle(1),
        }
    }

    #[test]
    fn identity_is_symmetric_across_the_pair() {
        let source = block_with(&[(OPT_ID, "42")]);
        let target = block_with(&[(OPT_SOURCE, "42")]);

        assert_eq!(source.id(), Some("42"));
        assert_eq!(target.id(), Some("42"));
        assert_eq!(source.role(), BlockRole::Source);
        assert_eq!(target.role(), BlockRole::Target);
        assert!(target.is_target());
        assert!(!source.is_target());
    }

    #[test]
    fn block_without_identity_has_no_id() {
        assert_eq!(block_with(&[("CWD", "/tmp")]).id(), None);
    }

    #[test]
    fn out_language_defaults_to_out() {
        assert_eq!(block_with(&[]).out_language(), "out");
        assert_eq!(block_with(&[(OPT_OUT, "json")]).out_language(), "json");
        assert_eq!(block_with(&[(OPT_OUT, "")]).out_language(), "out");
    }

    #[test]
    fn cursor_matching_excludes_closing_fence() {
        let blocks = vec![block_with(&[])];
        // Block spans 0-based lines 2..=5, i.e. editor lines 3..=6.
        assert!(block_at_cursor(&blocks, 2).is_none());
        assert!(block_at_cursor(&blocks, 3).is_some());
        assert!(block_at_cursor(&blocks, 5).is_some());
        assert!(block_at_cursor(&blocks, 6).is_none());
        assert!(block_containing_line(&blocks, 5).is_some());
    }

    #[test]
    fn find_helpers_match_on_role_keys() {
        let blocks = vec![block_with(&[(OPT_ID, "7")]), block_with(&[(OPT_SOURCE, "7")])];

        assert!(find_source(&blocks, "7").is_some_and(|b| !b.is_target()));
        assert!(find_target(&blocks, "7").is_some_and(Codeblock::is_target));
        assert!(find_target(&blocks, "8").is_none());
    }
}
