//! The manual-commit strategy: shadow-branch accumulation, condensation
//! on the user's own commits.

use std::fs;

use tracing::{debug, warn};

use crate::attribution::{commit_has_session_overlap, filename_overlap};
use crate::checkpoint::CheckpointId;
use crate::checkpoint::store::{CheckpointStore, TemporaryWriteOpts};
use crate::condense::{CondenseOptions, condense, finalize_turn_transcripts};
use crate::errors::EngineError;
use crate::internal::object::trailer;
use crate::objects::{ObjectLayer, changed_paths, shadow_branch_name};
use crate::session::machine::{self, CommitDisposition};
use crate::session::store::SessionStateStore;
use crate::strategy::{
    CheckpointEvent, EngineContext, PromptEvent, PushEvent, SessionEvent, Strategy,
    init_session_state, pending_prompt_attribution, relativize, shadow_branch_shared,
};
use crate::sync;
use crate::transcript::{TokenUsage, reader_for};

pub struct ManualCommitStrategy;

/// Per-field saturating difference, for token usage deltas between
/// checkpoint events.
fn usage_delta(total: &TokenUsage, seen: &TokenUsage) -> TokenUsage {
    TokenUsage {
        input_tokens: total.input_tokens.saturating_sub(seen.input_tokens),
        output_tokens: total.output_tokens.saturating_sub(seen.output_tokens),
        cached_tokens: total.cached_tokens.saturating_sub(seen.cached_tokens),
    }
}

impl Strategy for ManualCommitStrategy {
    fn name(&self) -> &'static str {
        "manual-commit"
    }

    fn on_user_prompt(
        &self,
        ctx: &EngineContext,
        event: &PromptEvent,
    ) -> Result<(), EngineError> {
        let store = SessionStateStore::new(ctx.repo);
        let mut state = match store.load(&event.session_id)? {
            // An empty base commit is the partial warning state left by
            // an interrupted initialization; start over.
            Some(state) if !state.base_commit.is_empty() => state,
            _ => init_session_state(ctx.repo, event)?,
        };
        let pending = pending_prompt_attribution(ctx.repo, &state);
        machine::apply_prompt(&mut state, pending);
        store.save(&state)
    }

    fn on_checkpoint(
        &self,
        ctx: &EngineContext,
        event: &CheckpointEvent,
    ) -> Result<(), EngineError> {
        let store = SessionStateStore::new(ctx.repo);
        let Some(mut state) = store.load(&event.session_id)? else {
            debug!(session = %event.session_id, "checkpoint without session state, skipping");
            return Ok(());
        };
        if state.base_commit.is_empty() {
            debug!(session = %event.session_id, "session has no base commit yet, skipping");
            return Ok(());
        }
        let _lock = store.lock(&state.session_id)?;

        let reader = reader_for(&state.agent_type);
        let transcript = fs::read(&state.transcript_path).unwrap_or_default();
        let total_items = reader.count_items(&transcript);

        let mut files: Vec<String> = Vec::new();
        for path in event
            .modified_files
            .iter()
            .map(String::as_str)
            .chain(
                reader
                    .extract_modified_files(&transcript, state.checkpoint_transcript_start)
                    .iter()
                    .map(String::as_str),
            )
        {
            if let Some(relative) = relativize(ctx.repo, path)
                && !files.contains(&relative)
            {
                files.push(relative);
            }
        }
        files.sort();

        let opts = TemporaryWriteOpts {
            session_id: state.session_id.clone(),
            strategy: self.name().to_string(),
            base_commit: state.base_commit.clone(),
            worktree_id: state.worktree_id.clone(),
            modified_files: files.clone(),
            deleted_files: event.deleted_files.clone(),
            metadata: event.metadata.clone(),
            task: None,
            subject: None,
        };
        let checkpoint_store = CheckpointStore::new(ctx.repo);
        let written = match &event.task {
            Some(task) => checkpoint_store.write_temporary_task(&opts, task.clone()),
            None => checkpoint_store.write_temporary(&opts),
        };

        match written {
            Ok(_) => {
                let usage = reader.extract_token_usage(&transcript, state.checkpoint_transcript_start);
                let delta = usage_delta(&usage, &state.token_usage);
                machine::apply_checkpoint_saved(&mut state, &files, &delta, total_items, None);
                store.save(&state)
            }
            Err(EngineError::EmptyCommit(reason)) => {
                debug!(session = %state.session_id, reason = %reason, "nothing to snapshot");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn on_git_commit(&self, ctx: &EngineContext) -> Result<(), EngineError> {
        if ctx.repo.rebase_or_merge_in_progress() {
            return Ok(());
        }
        let Some(head) = ctx.repo.head()? else {
            return Ok(());
        };
        let head_commit = ctx.repo.read_commit(&head)?;
        let Some(parent) = head_commit.parent_commit_ids.first().copied() else {
            return Ok(());
        };
        let branch = ctx
            .repo
            .current_branch()?
            .unwrap_or_else(|| "HEAD".to_string());
        if branch.starts_with("entire/") {
            return Ok(());
        }
        let preallocated = head_commit
            .trailer(trailer::ENTIRE_CHECKPOINT)
            .and_then(|value| CheckpointId::parse(&value).ok());

        let layer = ObjectLayer::new(ctx.repo);
        let parent_hex = parent.to_string();
        let trees = layer
            .commit_tree(&parent)
            .and_then(|p| layer.commit_tree(&head).map(|h| (p, h)));

        let session_store = SessionStateStore::new(ctx.repo);
        let sessions = session_store.list()?;

        for state in &sessions {
            if state.base_commit != parent_hex {
                continue;
            }
            let mut state = state.clone();

            let reader = reader_for(&state.agent_type);
            let transcript = fs::read(&state.transcript_path).unwrap_or_default();
            let has_new_transcript =
                reader.count_items(&transcript) > state.checkpoint_transcript_start;

            let shadow_branch = shadow_branch_name(&parent, &state.worktree_id);
            let overlap = match &trees {
                Ok((parent_tree, head_tree)) => {
                    match layer.branch_tip(&shadow_branch).ok().flatten() {
                        Some(tip) => match layer.commit_tree(&tip) {
                            Ok(shadow_tree) => commit_has_session_overlap(
                                parent_tree,
                                head_tree,
                                &shadow_tree,
                                &state.files_touched,
                            ),
                            Err(_) => filename_overlap(
                                &state.files_touched,
                                &changed_paths(parent_tree, head_tree),
                            ),
                        },
                        None => filename_overlap(
                            &state.files_touched,
                            &changed_paths(parent_tree, head_tree),
                        ),
                    }
                }
                Err(_) => !state.files_touched.is_empty(),
            };

            let disposition = machine::commit_disposition(&state, overlap, has_new_transcript);
            match disposition {
                CommitDisposition::CondenseActive
                | CommitDisposition::CondenseIdle
                | CommitDisposition::CondenseEnded => {
                    let delete_shadow =
                        !shadow_branch_shared(&sessions, &shadow_branch, &state.session_id);
                    let opts = CondenseOptions {
                        checkpoint_id: preallocated.clone(),
                        head_commit: head,
                        branch: branch.clone(),
                        context: None,
                        delete_shadow,
                        carry_forward: true,
                    };
                    match condense(ctx.repo, &mut state, &opts) {
                        Ok(outcome) => {
                            if disposition == CommitDisposition::CondenseActive
                                && outcome.condensed
                            {
                                state.turn_checkpoint_ids.push(outcome.checkpoint_id.clone());
                            }
                            debug!(
                                session = %state.session_id,
                                checkpoint = %outcome.checkpoint_id,
                                carried = outcome.carried_forward.len(),
                                "post-commit condensation done"
                            );
                            session_store.save(&state)?;
                        }
                        // State untouched; the next commit retries.
                        Err(e) => {
                            warn!(session = %state.session_id, error = %e, "condensation failed")
                        }
                    }
                }
                CommitDisposition::AdvanceBase => {
                    state.base_commit = head.to_string();
                    session_store.save(&state)?;
                }
                CommitDisposition::Skip => {}
            }
        }
        Ok(())
    }

    fn on_turn_end(&self, ctx: &EngineContext, event: &SessionEvent) -> Result<(), EngineError> {
        let store = SessionStateStore::new(ctx.repo);
        let Some(mut state) = store.load(&event.session_id)? else {
            return Ok(());
        };
        finalize_turn_transcripts(ctx.repo, &mut state);
        machine::apply_turn_end(&mut state);
        store.save(&state)
    }

    fn on_session_end(
        &self,
        ctx: &EngineContext,
        event: &SessionEvent,
    ) -> Result<(), EngineError> {
        let store = SessionStateStore::new(ctx.repo);
        let Some(mut state) = store.load(&event.session_id)? else {
            return Ok(());
        };
        finalize_turn_transcripts(ctx.repo, &mut state);
        machine::apply_session_end(&mut state);
        store.save(&state)
    }

    fn on_pre_push(&self, ctx: &EngineContext, event: &PushEvent) -> Result<(), EngineError> {
        if !ctx.settings.strategy_options.push_sessions {
            return Ok(());
        }
        // Never break the user's push over metadata sync trouble.
        if let Err(e) = sync::push_metadata_branch(ctx.repo, &event.remote) {
            warn!(remote = %event.remote, error = %e, "sessions branch push failed");
        }
        Ok(())
    }
}
