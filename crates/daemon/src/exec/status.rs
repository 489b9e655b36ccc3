// Status indicators shown next to running and finished codeblocks.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use fencerun_common::types::StatusStyle;

pub const CLOCK_FRAMES: [&str; 12] = [
    "󱑖", "󱑋", "󱑌", "󱑍", "󱑎", "󱑏", "󱑐", "󱑑", "󱑒", "󱑓", "󱑔", "󱑕",
];
pub const GLYPH_OK: &str = "";
pub const GLYPH_ERROR: &str = "󱂑";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusIndicator {
    pub glyph: &'static str,
    pub style: StatusStyle,
}

impl StatusIndicator {
    pub fn running(frame: usize) -> Self {
        Self { glyph: CLOCK_FRAMES[frame % CLOCK_FRAMES.len()], style: StatusStyle::Info }
    }

    pub fn succeeded() -> Self {
        Self { glyph: GLYPH_OK, style: StatusStyle::Ok }
    }

    pub fn failed() -> Self {
        Self { glyph: GLYPH_ERROR, style: StatusStyle::Error }
    }

    pub fn finished(success: bool) -> Self {
        if success {
            Self::succeeded()
        } else {
            Self::failed()
        }
    }
}

/// Annotation ids of a source/target pair: `2n` and `2n + 1`.
///
/// Numeric identities use their value; anything else is hashed first.
pub fn annotation_ids(id: &str) -> (u64, u64) {
    let base = match id.parse::<u64>() {
        Ok(n) if n <= u64::MAX / 2 => n,
        _ => {
            let mut hasher = DefaultHasher::new();
            id.hash(&mut hasher);
            hasher.finish() >> 1
        }
    };
    (base * 2, base * 2 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ids_map_to_adjacent_pair() {
        assert_eq!(annotation_ids("1700000000000"), (3_400_000_000_000, 3_400_000_000_001));
        assert_eq!(annotation_ids("0"), (0, 1));
    }

    #[test]
    fn non_numeric_ids_hash_to_a_stable_pair() {
        let (source, target) = annotation_ids("build-step");
        assert_eq!(source % 2, 0);
        assert_eq!(target, source + 1);
        assert_eq!(annotation_ids("build-step"), (source, target));
    }

    #[test]
    fn clock_animation_wraps() {
        assert_eq!(StatusIndicator::running(0).glyph, StatusIndicator::running(12).glyph);
        assert_eq!(StatusIndicator::running(3).style, StatusStyle::Info);
        assert_eq!(StatusIndicator::finished(false), StatusIndicator::failed());
    }
}
