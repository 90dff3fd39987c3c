//! Content-aware overlap detection and human/agent line attribution.
//!
//! Overlap answers "does this commit contain the session's agent-authored
//! work?" and gates condensation on post-commit. Attribution splits the
//! committed lines of the session's files into agent and human shares.
//! Both operate on flattened trees: the base commit's tree, the shadow
//! tip's tree, and the committed (head) tree.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::diff::{is_binary, line_diff_counts};
use crate::errors::EngineError;
use crate::internal::repo::Repository;
use crate::objects::TreeMap;

/// User edits captured between a prompt and the next checkpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptAttribution {
    /// 1-based checkpoint the edits preceded.
    pub checkpoint_number: u32,
    pub lines_added: usize,
    pub lines_removed: usize,
}

/// Line-count breakdown of a commit into agent and human contributions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InitialAttribution {
    pub agent_lines: usize,
    pub human_added: usize,
    pub human_modified: usize,
    pub human_removed: usize,
    /// Total lines added by the commit across the session's files.
    pub total_committed: usize,
    /// `agent_lines / total_committed`, in percent.
    pub agent_percentage: f64,
}

impl InitialAttribution {
    fn finalize(&mut self) {
        self.agent_percentage = if self.total_committed > 0 {
            (self.agent_lines as f64 * 100.0 / self.total_committed as f64).clamp(0.0, 100.0)
        } else {
            0.0
        };
    }
}

fn blob_bytes(repo: &Repository, tree: &TreeMap, path: &str) -> Result<Vec<u8>, EngineError> {
    match tree.get(path) {
        Some(entry) => Ok(repo.read_blob(&entry.hash)?.data),
        None => Ok(Vec::new()),
    }
}

/// Compute the attribution for a commit over the session's touched files.
///
/// Per file:
/// - `agent_added = commit_added(base→head) − user_added(shadow→head)`, clamped at zero
/// - `human_modified = min(user_added, user_removed)`
/// - `pure_human_added = user_added − human_modified`
/// - `pure_human_removed = user_removed − human_modified`
///
/// Binary files are skipped.
pub fn compute_initial_attribution(
    repo: &Repository,
    base_tree: &TreeMap,
    shadow_tree: &TreeMap,
    head_tree: &TreeMap,
    files_touched: &[String],
) -> Result<InitialAttribution, EngineError> {
    let mut attribution = InitialAttribution::default();

    for path in files_touched {
        let base = blob_bytes(repo, base_tree, path)?;
        let shadow = blob_bytes(repo, shadow_tree, path)?;
        let head = blob_bytes(repo, head_tree, path)?;
        if is_binary(&base) || is_binary(&shadow) || is_binary(&head) {
            continue;
        }

        let commit = line_diff_counts(&base, &head);
        let user = line_diff_counts(&shadow, &head);

        let agent_added = commit.added.saturating_sub(user.added);
        let human_modified = user.added.min(user.removed);

        attribution.agent_lines += agent_added;
        attribution.human_modified += human_modified;
        attribution.human_added += user.added - human_modified;
        attribution.human_removed += user.removed - human_modified;
        attribution.total_committed += commit.added;
    }

    attribution.finalize();
    Ok(attribution)
}

/// Fold in-turn user edits (`prompt_attributions`) into an attribution
/// computed from the final trees. The shadow→head delta is already part
/// of the base computation; this adds the edits users made while the
/// agent was still working.
pub fn accumulate_prompt_attributions(
    mut attribution: InitialAttribution,
    prompt_attributions: &[PromptAttribution],
) -> InitialAttribution {
    for pa in prompt_attributions {
        let modified = pa.lines_added.min(pa.lines_removed);
        attribution.human_modified += modified;
        attribution.human_added += pa.lines_added - modified;
        attribution.human_removed += pa.lines_removed - modified;
        attribution.agent_lines = attribution.agent_lines.saturating_sub(pa.lines_added);
    }
    attribution.finalize();
    attribution
}

/// Content-aware overlap predicate: does the commit contain any of the
/// session's agent-authored work?
///
/// Per touched file that the commit changed:
/// - file existed in the commit's parent tree ⇒ overlap (the user is
///   editing the agent's work, whatever the content);
/// - new file whose committed blob matches the shadow blob ⇒ overlap;
/// - new file with different content ⇒ the agent's version was reverted
///   and replaced, not overlap.
pub fn commit_has_session_overlap(
    parent_tree: &TreeMap,
    head_tree: &TreeMap,
    shadow_tree: &TreeMap,
    files_touched: &[String],
) -> bool {
    for path in files_touched {
        let in_parent = parent_tree.get(path);
        let in_head = head_tree.get(path);

        let changed = match (in_parent, in_head) {
            (Some(old), Some(new)) => old != new,
            (None, Some(_)) | (Some(_), None) => true,
            (None, None) => false,
        };
        if !changed {
            continue;
        }

        if in_parent.is_some() {
            return true;
        }
        // New file: only identical content counts as the agent's work.
        if let (Some(head_entry), Some(shadow_entry)) = (in_head, shadow_tree.get(path))
            && head_entry.hash == shadow_entry.hash
        {
            return true;
        }
    }
    false
}

/// Filename-level fallback when shadow or commit trees are unreadable.
pub fn filename_overlap(files_touched: &[String], committed_files: &[String]) -> bool {
    let overlap = files_touched
        .iter()
        .any(|path| committed_files.iter().any(|committed| committed == path));
    if overlap {
        debug!("overlap check fell back to filename matching");
    }
    overlap
}

/// Files whose agent-authored content the commit did not (fully) pick up.
///
/// A file remains when it was not committed at all, or when its committed
/// blob differs from the shadow blob *and* the two still share significant
/// lines (a partial `add -p`). A committed blob sharing nothing with the
/// shadow means the agent's version was replaced, not split — nothing to
/// carry.
pub fn files_with_remaining_agent_changes(
    repo: &Repository,
    shadow_tree: &TreeMap,
    head_tree: &TreeMap,
    files_touched: &[String],
    committed_files: &[String],
) -> Result<Vec<String>, EngineError> {
    let mut remaining = Vec::new();
    for path in files_touched {
        let Some(shadow_entry) = shadow_tree.get(path) else {
            continue;
        };
        let committed = committed_files.iter().any(|c| c == path);
        if !committed {
            remaining.push(path.clone());
            continue;
        }
        match head_tree.get(path) {
            Some(head_entry) if head_entry.hash == shadow_entry.hash => {}
            _ => {
                let shadow_bytes = repo.read_blob(&shadow_entry.hash)?.data;
                let head_bytes = blob_bytes(repo, head_tree, path)?;
                if crate::diff::significant_overlap(&shadow_bytes, &head_bytes) {
                    remaining.push(path.clone());
                }
            }
        }
    }
    remaining.sort();
    Ok(remaining)
}
