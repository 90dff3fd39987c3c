//! Line-level diff utilities built on Myers diffing, plus the
//! significant-line heuristic used when deciding whether two versions of
//! a file share authored content.

use std::collections::HashSet;

use similar::{Algorithm, ChangeTag, TextDiff};

/// Added/removed line counts between two versions of a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineDiff {
    pub added: usize,
    pub removed: usize,
}

/// Binary content is skipped everywhere: a NUL byte marks it.
pub fn is_binary(content: &[u8]) -> bool {
    content.contains(&0)
}

/// Count added and removed lines between two text buffers. Binary
/// content on either side yields a zero diff.
pub fn line_diff_counts(old: &[u8], new: &[u8]) -> LineDiff {
    if is_binary(old) || is_binary(new) {
        return LineDiff::default();
    }

    let old_text = String::from_utf8_lossy(old);
    let new_text = String::from_utf8_lossy(new);
    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_lines(&old_text, &new_text);

    let mut counts = LineDiff::default();
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => counts.added += 1,
            ChangeTag::Delete => counts.removed += 1,
            ChangeTag::Equal => {}
        }
    }
    counts
}

/// Minimum trimmed length for a line to count as significant.
const SIGNIFICANT_LINE_LEN: usize = 10;

/// Lines of at least ten trimmed characters, deduplicated.
pub fn significant_lines(content: &[u8]) -> HashSet<String> {
    if is_binary(content) {
        return HashSet::new();
    }
    String::from_utf8_lossy(content)
        .lines()
        .map(|line| line.trim())
        .filter(|line| line.len() >= SIGNIFICANT_LINE_LEN)
        .map(|line| line.to_string())
        .collect()
}

/// Whether two buffers share authored content: at least two shared
/// significant lines, or one when the first side has only one.
pub fn significant_overlap(ours: &[u8], theirs: &[u8]) -> bool {
    let our_lines = significant_lines(ours);
    if our_lines.is_empty() {
        return false;
    }
    let their_lines = significant_lines(theirs);
    let shared = our_lines.intersection(&their_lines).count();
    let required = if our_lines.len() == 1 { 1 } else { 2 };
    shared >= required
}
