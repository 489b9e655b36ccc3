use crate::codeblock::parser::is_fence_line;
use crate::types::Section;

#[derive(Debug, Clone)]
struct SectionDraft {
    heading: String,
    level: u8,
    start_line: usize,
}

/// Parse ATX headings (`#` .. `######`) into a section tree.
///
/// Headings inside fenced codeblocks are ignored. Each section spans from its
/// heading up to the next heading of any level; parents follow heading levels.
pub fn parse_sections(lines: &[String]) -> Vec<Section> {
    let mut drafts = Vec::new();
    let mut in_fence = false;

    for (index, line) in lines.iter().enumerate() {
        if is_fence_line(line) {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some((level, heading)) = atx_heading(line) {
            drafts.push(SectionDraft { heading, level, start_line: index });
        }
    }

    build_tree(lines.len(), drafts)
}

fn build_tree(total_lines: usize, drafts: Vec<SectionDraft>) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::with_capacity(drafts.len());
    let mut stack: Vec<usize> = Vec::new();

    for (index, draft) in drafts.iter().enumerate() {
        while let Some(last_index) = stack.last().copied() {
            if sections[last_index].level >= draft.level {
                stack.pop();
            } else {
                break;
            }
        }

        let end_line = drafts.get(index + 1).map(|next| next.start_line).unwrap_or(total_lines);

        sections.push(Section {
            index,
            parent: stack.last().copied(),
            heading: draft.heading.clone(),
            level: draft.level,
            start_line: draft.start_line,
            end_line,
        });
        stack.push(index);
    }

    sections
}

fn atx_heading(line: &str) -> Option<(u8, String)> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|ch| *ch == '#').count();
    if !(1..=6).contains(&level) {
        return None;
    }

    let rest = &trimmed[level..];
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }

    Some((level as u8, strip_closing_sequence(rest.trim()).to_string()))
}

// `## Title ##` closes with a run of `#` preceded by whitespace.
fn strip_closing_sequence(text: &str) -> &str {
    let without = text.trim_end_matches('#');
    if without.is_empty() {
        return without;
    }
    if without.len() != text.len() && without.ends_with(char::is_whitespace) {
        return without.trim_end();
    }
    text
}

/// The innermost section whose span strictly encloses lines `[start, end]`.
pub fn enclosing_section(sections: &[Section], start: usize, end: usize) -> Option<&Section> {
    sections
        .iter()
        .filter(|section| section.encloses(start, end))
        .max_by_key(|section| section.start_line)
}

/// `section` followed by its ancestors, innermost first.
pub fn ancestry<'a>(sections: &'a [Section], section: &'a Section) -> Vec<&'a Section> {
    let mut chain = vec![section];
    let mut parent = section.parent;
    while let Some(index) = parent {
        let Some(next) = sections.get(index) else { break };
        chain.push(next);
        parent = next.parent;
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn parses_only_atx_headings_and_builds_parent_links() {
        let doc = lines("# Root\n\n## Child\n\n### Grandchild\n\n## Sibling\n");
        let sections = parse_sections(&doc);

        assert_eq!(sections.len(), 4);

        assert_eq!(sections[0].heading, "Root");
        assert_eq!(sections[0].parent, None);
        assert_eq!(sections[0].start_line, 0);
        assert_eq!(sections[0].end_line, 2);

        assert_eq!(sections[1].heading, "Child");
        assert_eq!(sections[1].parent, Some(0));
        assert_eq!(sections[1].end_line, 4);

        assert_eq!(sections[2].heading, "Grandchild");
        assert_eq!(sections[2].parent, Some(1));
        assert_eq!(sections[2].level, 3);

        assert_eq!(sections[3].heading, "Sibling");
        assert_eq!(sections[3].parent, Some(0));
        assert_eq!(sections[3].end_line, 7);
    }

    #[test]
    fn ignores_headings_inside_codeblocks_and_hashtags() {
        let doc = lines("#tag\n```sh\n# comment\n```\n####### seven\n## Real ##\n# C#");
        let sections = parse_sections(&doc);

        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].heading, "Real");
        assert_eq!(sections[1].heading, "C#");
        assert_eq!(sections[1].parent, None);
    }

    #[test]
    fn enclosing_section_and_ancestry_follow_levels() {
        let doc = lines("# A\n## B\n```sh\nls\n```\n# C");
        let sections = parse_sections(&doc);

        let inner = enclosing_section(&sections, 2, 4).expect("block is inside B");
        assert_eq!(inner.heading, "B");

        let chain: Vec<&str> = ancestry(&sections, inner).iter().map(|s| s.heading.as_str()).collect();
        assert_eq!(chain, vec!["B", "A"]);

        assert!(enclosing_section(&sections, 5, 5).is_none());
    }
}
