// Section-scoped environment: `env` codeblocks bind variables for every block
// in the same section and in its descendants.

use std::collections::BTreeMap;

use crate::codeblock::{Codeblock, ENV_LANGUAGE};
use crate::types::Section;

use super::parser::{ancestry, enclosing_section};

/// `KEY=VALUE` bindings from an env block body, in order.
///
/// Each line splits once on `=`; both halves are trimmed. Lines without `=` or
/// with an empty key are skipped.
pub fn parse_env_text(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

fn is_env_block(block: &Codeblock) -> bool {
    block.language == ENV_LANGUAGE
}

fn define(env_block: &Codeblock, env: &mut BTreeMap<String, String>) {
    for (key, value) in parse_env_text(&env_block.text) {
        env.entry(key).or_insert(value);
    }
}

/// Environment in effect for `block`.
///
/// Scopes are visited from the innermost enclosing section outward, ending
/// with the env blocks that sit outside every section. The first definition
/// of a key wins; later and outer definitions are ignored.
pub fn resolve_env(block: &Codeblock, blocks: &[Codeblock], sections: &[Section]) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    let env_blocks: Vec<&Codeblock> = blocks.iter().filter(|candidate| is_env_block(candidate)).collect();

    if let Some(section) = enclosing_section(sections, block.start_line, block.end_line) {
        for scope in ancestry(sections, section) {
            for env_block in &env_blocks {
                if scope.encloses(env_block.start_line, env_block.end_line) {
                    define(env_block, &mut env);
                }
            }
        }
    }

    for env_block in &env_blocks {
        if enclosing_section(sections, env_block.start_line, env_block.end_line).is_none() {
            define(env_block, &mut env);
        }
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codeblock::parse_codeblocks;
    use crate::section::parse_sections;
    use crate::types::DocumentHandle;

    fn resolve_for(doc: &str, block_id: &str) -> BTreeMap<String, String> {
        let lines: Vec<String> = doc.lines().map(str::to_string).collect();
        let blocks = parse_codeblocks(DocumentHandle(1), &lines).expect("parse");
        let sections = parse_sections(&lines);
        let block = blocks.iter().find(|b| b.opt("ID") == Some(block_id)).expect("block present");
        resolve_env(block, &blocks, &sections)
    }

    #[test]
    fn parses_env_lines_loosely() {
        let pairs = parse_env_text("A=1\n  B = two words \nnot a binding\n=orphan\nC=x=y\n");
        assert_eq!(
            pairs,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "two words".to_string()),
                ("C".to_string(), "x=y".to_string()),
            ]
        );
    }

    #[test]
    fn innermost_section_wins() {
        let doc = "# Outer\n```env\nA=1\nB=1\n```\n## Inner\n```env\nA=2\n```\n```sh ID=7\necho $A $B\n```\n";
        let env = resolve_for(doc, "7");

        assert_eq!(env.get("A").map(String::as_str), Some("2"));
        assert_eq!(env.get("B").map(String::as_str), Some("1"));
    }

    #[test]
    fn sibling_sections_do_not_leak() {
        let doc = "# One\n```env\nX=1\n```\n# Two\n```sh ID=3\necho\n```\n";
        assert!(resolve_for(doc, "3").is_empty());
    }

    #[test]
    fn env_before_first_heading_applies_everywhere() {
        let doc = "```env\nROOT=yes\nX=0\n```\n# Part\n```env\nX=1\n```\n```sh ID=1\nls\n```\n";
        let env = resolve_for(doc, "1");

        assert_eq!(env.get("ROOT").map(String::as_str), Some("yes"));
        assert_eq!(env.get("X").map(String::as_str), Some("1"));
    }

    #[test]
    fn first_definition_in_a_section_wins() {
        let doc = "# S\n```env\nK=a\nK=c\n```\n```sh ID=2\nls\n```\n```env\nK=b\n```\n";
        assert_eq!(resolve_for(doc, "2").get("K").map(String::as_str), Some("a"));
    }
}
