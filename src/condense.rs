//! Condensation: summarize a session's shadow-branch content and state
//! into a sharded checkpoint on the metadata branch.
//!
//! The write is all-or-nothing with respect to session state: the
//! `SessionState` is only mutated after the metadata commit lands, so a
//! failed condensation leaves the base commit, step count and shadow
//! branch untouched and the next post-commit event retries.

use std::fs;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::attribution::{
    accumulate_prompt_attributions, compute_initial_attribution,
    files_with_remaining_agent_changes,
};
use crate::checkpoint::store::{CheckpointStore, CommittedWriteOpts};
use crate::checkpoint::summary::{SessionMetadata, TaskCheckpoint};
use crate::checkpoint::{CheckpointId, FULL_TRANSCRIPT_FILE, META_BRANCH};
use crate::errors::EngineError;
use crate::hash::ObjectHash;
use crate::internal::object::trailer;
use crate::internal::object::tree::TreeItemMode;
use crate::internal::repo::Repository;
use crate::objects::{ObjectLayer, TreeEntry, changed_paths, shadow_branch_name};
use crate::session::SessionState;
use crate::transcript::reader_for;

/// Inputs for one condensation run.
#[derive(Debug, Clone)]
pub struct CondenseOptions {
    /// Pre-allocated ID (from an `Entire-Checkpoint` trailer); a fresh
    /// one is drawn when absent.
    pub checkpoint_id: Option<CheckpointId>,
    /// The commit that triggered condensation (the new HEAD).
    pub head_commit: ObjectHash,
    /// Working branch name, recorded in the checkpoint summary.
    pub branch: String,
    /// Condensed narrative from the summarizer, when enabled.
    pub context: Option<String>,
    /// Delete the shadow branch afterwards. The caller clears this when
    /// another active session still shares the branch.
    pub delete_shadow: bool,
    /// Preserve uncommitted agent changes on a fresh shadow branch at
    /// the new HEAD (manual-commit only).
    pub carry_forward: bool,
}

/// What a condensation run did.
#[derive(Debug, Clone)]
pub struct CondenseOutcome {
    pub checkpoint_id: CheckpointId,
    /// False when the run was skipped (ID reuse with no new content).
    pub condensed: bool,
    /// Files preserved on a fresh shadow branch at the new HEAD.
    pub carried_forward: Vec<String>,
    pub shadow_deleted: bool,
}

/// Condense a session into the metadata branch, then reset its state.
///
/// On failure the state is untouched: base commit not advanced, step
/// count kept, shadow branch retained.
pub fn condense(
    repo: &Repository,
    state: &mut SessionState,
    opts: &CondenseOptions,
) -> Result<CondenseOutcome, EngineError> {
    run_condense(repo, state, opts).map_err(|e| match e {
        e @ EngineError::Condensation { .. } => e,
        other => EngineError::Condensation {
            session_id: state.session_id.clone(),
            cause: other.to_string(),
        },
    })
}

fn run_condense(
    repo: &Repository,
    state: &mut SessionState,
    opts: &CondenseOptions,
) -> Result<CondenseOutcome, EngineError> {
    let layer = ObjectLayer::new(repo);
    let store = CheckpointStore::new(repo);
    let reader = reader_for(&state.agent_type);

    // Prefer the live transcript over any shadow-branch copy; skipped
    // saves would make the copy stale.
    let transcript = fs::read(&state.transcript_path).unwrap_or_default();
    let total_items = reader.count_items(&transcript);
    let has_new_transcript = total_items > state.checkpoint_transcript_start;

    // ID reuse: nothing new since the last condensation means nothing
    // to write.
    if !state.last_checkpoint_id.is_empty() && !has_new_transcript {
        let reused = CheckpointId::parse(&state.last_checkpoint_id)?;
        debug!(session = %state.session_id, checkpoint = %reused, "no new transcript, reusing checkpoint");
        state.base_commit = opts.head_commit.to_string();
        return Ok(CondenseOutcome {
            checkpoint_id: reused,
            condensed: false,
            carried_forward: Vec::new(),
            shadow_deleted: false,
        });
    }

    let checkpoint_id = opts
        .checkpoint_id
        .clone()
        .unwrap_or_else(CheckpointId::generate);

    let base_commit: ObjectHash = state
        .base_commit
        .parse()
        .map_err(EngineError::InvalidHashValue)?;
    let shadow_branch = shadow_branch_name(&base_commit, &state.worktree_id);

    let base_tree = layer.commit_tree(&base_commit)?;
    let shadow_tip = layer.branch_tip(&shadow_branch)?;
    let shadow_tree = match &shadow_tip {
        Some(tip) => layer.commit_tree(tip)?,
        None => base_tree.clone(),
    };
    let head_tree = layer.commit_tree(&opts.head_commit)?;

    // Touched files come from the session's own accumulation; diffing
    // the shadow tree against HEAD would drag in unrelated files.
    let files_touched = state.files_touched.clone();

    let attribution = compute_initial_attribution(
        repo,
        &base_tree,
        &shadow_tree,
        &head_tree,
        &files_touched,
    )?;
    let attribution = accumulate_prompt_attributions(attribution, &state.prompt_attributions);

    // Hash of the files-touched state: path and shadow blob per line.
    let mut hasher = Sha256::new();
    for path in &files_touched {
        if let Some(entry) = shadow_tree.get(path) {
            hasher.update(format!("{path}:{}\n", entry.hash));
        }
    }
    let content_hash = hex::encode(hasher.finalize());

    // Task-checkpoints ride the shadow chain as trailers.
    let mut tasks: Vec<TaskCheckpoint> = Vec::new();
    for commit in store.shadow_chain(&shadow_branch)? {
        for payload in commit.trailer_values(trailer::ENTIRE_METADATA_TASK) {
            match serde_json::from_str::<TaskCheckpoint>(&payload) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!(error = %e, "skipping malformed task-checkpoint trailer"),
            }
        }
    }

    let session_meta = SessionMetadata {
        session_id: state.session_id.clone(),
        agent: state.agent_type.clone(),
        token_usage: state.token_usage,
        files_touched: files_touched.clone(),
        checkpoints_count: state.step_count.max(1),
        initial_attribution: Some(attribution),
        ephemeral_branch: Some(shadow_branch.clone()),
    };

    let write = store.write_committed(
        &CommittedWriteOpts {
            checkpoint_id: checkpoint_id.clone(),
            strategy: "manual-commit".to_string(),
            branch: opts.branch.clone(),
            session: session_meta,
            transcript: transcript.clone(),
            prompts: reader.extract_user_prompts(&transcript),
            context: opts.context.clone(),
            content_hash: Some(content_hash),
            tasks,
            ephemeral_branch: Some(shadow_branch.clone()),
            base_commit: Some(state.base_commit.clone()),
            subject: None,
        },
        false,
    )?;
    debug!(
        checkpoint = %checkpoint_id,
        commit = %write.commit,
        session = %state.session_id,
        "condensed session"
    );

    // Carry-forward: files the commit did not fully pick up survive on
    // a fresh shadow branch rooted at the new HEAD.
    let committed_files = changed_paths(&base_tree, &head_tree);
    let remaining = if opts.carry_forward {
        files_with_remaining_agent_changes(
            repo,
            &shadow_tree,
            &head_tree,
            &files_touched,
            &committed_files,
        )?
    } else {
        Vec::new()
    };

    if !remaining.is_empty() {
        let new_branch = shadow_branch_name(&opts.head_commit, &state.worktree_id);
        let mut entries = head_tree.clone();
        for path in &remaining {
            if let Some(entry) = shadow_tree.get(path) {
                entries.insert(path.clone(), *entry);
            }
        }
        let tree_id = layer.build_tree_from_entries(&entries)?;
        let message = trailer::compose_message(
            &format!("entire: carry-forward for {}", state.session_id),
            None,
            &[
                (trailer::ENTIRE_SESSION.to_string(), state.session_id.clone()),
                (
                    trailer::ENTIRE_STRATEGY.to_string(),
                    "manual-commit".to_string(),
                ),
                (
                    trailer::BASE_COMMIT.to_string(),
                    opts.head_commit.to_string(),
                ),
            ],
        );
        let commit = layer.create_commit(tree_id, vec![opts.head_commit], &message)?;
        layer.set_branch(&new_branch, &commit)?;
    }

    // Success: only now is the session state advanced.
    state.base_commit = opts.head_commit.to_string();
    state.last_checkpoint_id = checkpoint_id.to_string();
    state.prompt_attributions.clear();
    state.pending_prompt_attribution = None;
    state.token_usage = Default::default();
    if remaining.is_empty() {
        state.step_count = 0;
        state.files_touched = Vec::new();
        state.checkpoint_transcript_start = total_items;
    } else {
        // The next turn continues naturally from the carried content.
        state.step_count = 1;
        state.files_touched = remaining.clone();
        state.checkpoint_transcript_start = 0;
        state.last_checkpoint_id = String::new();
    }

    let mut shadow_deleted = false;
    if opts.delete_shadow
        && let Some(_tip) = shadow_tip
    {
        match layer.delete_branch(&shadow_branch) {
            Ok(()) => shadow_deleted = true,
            Err(e) => warn!(branch = %shadow_branch, error = %e, "could not delete shadow branch"),
        }
    }

    Ok(CondenseOutcome {
        checkpoint_id,
        condensed: true,
        carried_forward: remaining,
        shadow_deleted,
    })
}

/// Rewrite `<N>/full.jsonl` of each checkpoint condensed this turn with
/// the complete live transcript. Best-effort per checkpoint: one failure
/// does not abort the rest.
pub fn finalize_turn_transcripts(repo: &Repository, state: &mut SessionState) {
    if state.turn_checkpoint_ids.is_empty() {
        return;
    }
    let transcript = match fs::read(&state.transcript_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %state.transcript_path, error = %e, "transcript unreadable at turn end");
            state.turn_checkpoint_ids.clear();
            return;
        }
    };

    let ids = std::mem::take(&mut state.turn_checkpoint_ids);
    for checkpoint_id in ids {
        if let Err(e) = rewrite_transcript(repo, &checkpoint_id, &transcript) {
            warn!(checkpoint = %checkpoint_id, error = %e, "could not finalize transcript");
        }
    }
}

fn rewrite_transcript(
    repo: &Repository,
    checkpoint_id: &CheckpointId,
    transcript: &[u8],
) -> Result<(), EngineError> {
    let layer = ObjectLayer::new(repo);
    let tip = layer
        .branch_tip(META_BRANCH)?
        .ok_or_else(|| EngineError::NotFound(format!("branch {META_BRANCH}")))?;
    let mut entries = layer.commit_tree(&tip)?;

    let shard_prefix = format!("{}/", checkpoint_id.shard_dir());
    let newest = entries
        .keys()
        .filter_map(|key| key.strip_prefix(&shard_prefix))
        .filter_map(|rest| rest.split('/').next())
        .filter_map(|segment| segment.parse::<usize>().ok())
        .max()
        .ok_or_else(|| EngineError::NotFound(format!("checkpoint {checkpoint_id}")))?;

    let path = format!("{shard_prefix}{newest}/{FULL_TRANSCRIPT_FILE}");
    let hash = layer.write_blob(transcript)?;
    let previous = entries.insert(
        path,
        TreeEntry {
            mode: TreeItemMode::Blob,
            hash,
        },
    );
    if previous.map(|entry| entry.hash) == Some(hash) {
        return Ok(()); // transcript unchanged
    }

    let tree_id = layer.build_tree_from_entries(&entries)?;
    let message = trailer::compose_message(
        &format!("Finalize transcript for {checkpoint_id}"),
        None,
        &[],
    );
    let commit = layer.create_commit(tree_id, vec![tip], &message)?;
    layer.set_branch(META_BRANCH, &commit)
}
