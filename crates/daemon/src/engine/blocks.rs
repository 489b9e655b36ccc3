// Block selection and listing.

use std::collections::BTreeMap;

use chrono::Utc;
use fencerun_common::codeblock::{BlockRole, Codeblock};
use serde::{Deserialize, Serialize};

use crate::exec::ExecutionState;

/// How a request names the codeblock it acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum BlockSelector {
    /// The block under the editor cursor.
    Cursor,
    /// The source or output block carrying this identity.
    Identity { id: String },
    /// The block containing this 0-based line.
    Line { line: usize },
}

/// One codeblock as reported by `codeblock.list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockSummary {
    pub id: Option<String>,
    pub role: BlockRole,
    pub language: String,
    pub start_line: usize,
    pub end_line: usize,
    pub opts: BTreeMap<String, String>,
    pub state: Option<ExecutionState>,
}

impl BlockSummary {
    pub fn new(block: &Codeblock, state: Option<ExecutionState>) -> Self {
        Self {
            id: block.id().map(str::to_string),
            role: block.role(),
            language: block.language.clone(),
            start_line: block.start_line,
            end_line: block.end_line,
            opts: block.opts.clone(),
            state,
        }
    }
}

/// A new identity: the current Unix time in milliseconds, bumped until no
/// block of the document uses it.
pub fn fresh_id(blocks: &[Codeblock]) -> String {
    fresh_id_from(Utc::now().timestamp_millis(), blocks)
}

fn fresh_id_from(mut candidate: i64, blocks: &[Codeblock]) -> String {
    loop {
        let id = candidate.to_string();
        if !blocks.iter().any(|block| block.id() == Some(id.as_str())) {
            return id;
        }
        candidate += 1;
    }
}

#[cfg(test)]
mod tests {
    use fencerun_common::codeblock::parse_codeblocks;
    use fencerun_common::types::DocumentHandle;
    use serde_json::json;

    use super::*;

    #[test]
    fn fresh_ids_skip_identities_in_use() {
        let lines: Vec<String> = ["```sh ID=100", "ls", "```", "```out SOURCE=101", "```"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let blocks = parse_codeblocks(DocumentHandle(1), &lines).expect("parse");

        assert_eq!(fresh_id_from(100, &blocks), "102");
        assert_eq!(fresh_id_from(5, &blocks), "5");
    }

    #[test]
    fn selectors_decode_from_tagged_json() {
        let selector: BlockSelector = serde_json::from_value(json!({ "by": "identity", "id": "9" })).expect("decode");
        assert_eq!(selector, BlockSelector::Identity { id: "9".into() });

        let selector: BlockSelector = serde_json::from_value(json!({ "by": "cursor" })).expect("decode");
        assert_eq!(selector, BlockSelector::Cursor);
    }
}
