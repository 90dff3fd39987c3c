//! The auto-commit strategy: every agent turn becomes a real commit on
//! the working branch, carrying an `Entire-Checkpoint` trailer, with
//! checkpoint metadata written directly to the metadata branch.
//!
//! Auto-commit assumes clean in-turn commits and omits carry-forward;
//! partial user commits (agent commit, user amend) are out of its model.

use std::fs;

use tracing::{debug, warn};

use crate::attribution::compute_initial_attribution;
use crate::checkpoint::CheckpointId;
use crate::checkpoint::store::{CheckpointStore, CommittedWriteOpts};
use crate::checkpoint::summary::SessionMetadata;
use crate::errors::EngineError;
use crate::internal::object::trailer;
use crate::internal::object::tree::TreeItemMode;
use crate::objects::{ObjectLayer, TreeEntry};
use crate::session::machine;
use crate::session::store::SessionStateStore;
use crate::strategy::{
    CheckpointEvent, EngineContext, PromptEvent, PushEvent, SessionEvent, Strategy,
    init_session_state, pending_prompt_attribution, relativize,
};
use crate::sync;
use crate::transcript::{TokenUsage, reader_for};

pub struct AutoCommitStrategy;

impl Strategy for AutoCommitStrategy {
    fn name(&self) -> &'static str {
        "auto-commit"
    }

    fn on_user_prompt(
        &self,
        ctx: &EngineContext,
        event: &PromptEvent,
    ) -> Result<(), EngineError> {
        let store = SessionStateStore::new(ctx.repo);
        let mut state = match store.load(&event.session_id)? {
            Some(state) if !state.base_commit.is_empty() => state,
            _ => init_session_state(ctx.repo, event)?,
        };
        let pending = pending_prompt_attribution(ctx.repo, &state);
        machine::apply_prompt(&mut state, pending);
        store.save(&state)
    }

    /// Auto-commit accumulates touched files in session state only; the
    /// snapshot happens once per turn, as a real commit.
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

        let usage = reader.extract_token_usage(&transcript, state.checkpoint_transcript_start);
        let delta = TokenUsage {
            input_tokens: usage.input_tokens.saturating_sub(state.token_usage.input_tokens),
            output_tokens: usage
                .output_tokens
                .saturating_sub(state.token_usage.output_tokens),
            cached_tokens: usage
                .cached_tokens
                .saturating_sub(state.token_usage.cached_tokens),
        };
        machine::apply_checkpoint_saved(&mut state, &files, &delta, total_items, None);
        store.save(&state)
    }

    /// User commits just advance session bases; the turn commits this
    /// strategy creates carry their metadata already.
    fn on_git_commit(&self, ctx: &EngineContext) -> Result<(), EngineError> {
        if ctx.repo.rebase_or_merge_in_progress() {
            return Ok(());
        }
        let Some(head) = ctx.repo.head()? else {
            return Ok(());
        };
        let head_commit = ctx.repo.read_commit(&head)?;
        // Our own turn commits re-enter through the post-commit hook;
        // their sessions are already up to date.
        if head_commit.trailer(trailer::ENTIRE_CHECKPOINT).is_some() {
            return Ok(());
        }
        let Some(parent) = head_commit.parent_commit_ids.first() else {
            return Ok(());
        };
        let parent_hex = parent.to_string();

        let store = SessionStateStore::new(ctx.repo);
        for state in store.list()? {
            if state.base_commit != parent_hex {
                continue;
            }
            let mut state = state;
            state.base_commit = head.to_string();
            store.save(&state)?;
        }
        Ok(())
    }

    fn on_turn_end(&self, ctx: &EngineContext, event: &SessionEvent) -> Result<(), EngineError> {
        let store = SessionStateStore::new(ctx.repo);
        let Some(mut state) = store.load(&event.session_id)? else {
            return Ok(());
        };
        if !state.has_content() || state.base_commit.is_empty() {
            machine::apply_turn_end(&mut state);
            return store.save(&state);
        }
        let Some(branch) = ctx.repo.current_branch()? else {
            warn!(session = %state.session_id, "detached HEAD, skipping auto-commit turn");
            machine::apply_turn_end(&mut state);
            return store.save(&state);
        };
        let Some(head) = ctx.repo.head()? else {
            return Ok(());
        };

        let layer = ObjectLayer::new(ctx.repo);
        let head_tree = layer.commit_tree(&head)?;
        let mut entries = head_tree.clone();
        for path in &state.files_touched.clone() {
            match ctx.repo.read_worktree_file(path) {
                Ok(content) => {
                    let mode = if ctx.repo.worktree_file_is_executable(path) {
                        TreeItemMode::BlobExecutable
                    } else {
                        TreeItemMode::Blob
                    };
                    let hash = layer.write_blob(&content)?;
                    entries.insert(path.clone(), TreeEntry { mode, hash });
                }
                Err(_) => {
                    entries.remove(path);
                }
            }
        }
        if entries == head_tree {
            debug!(session = %state.session_id, "turn produced no tree changes");
            machine::apply_turn_end(&mut state);
            return store.save(&state);
        }

        let checkpoint_id = CheckpointId::generate();
        let reader = reader_for(&state.agent_type);
        let transcript = fs::read(&state.transcript_path).unwrap_or_default();
        let total_items = reader.count_items(&transcript);

        let tree_id = layer.build_tree_from_entries(&entries)?;
        let message = trailer::compose_message(
            &format!("entire: agent turn ({} files)", state.files_touched.len()),
            None,
            &[
                (
                    trailer::ENTIRE_CHECKPOINT.to_string(),
                    checkpoint_id.to_string(),
                ),
                (trailer::ENTIRE_SESSION.to_string(), state.session_id.clone()),
                (trailer::ENTIRE_STRATEGY.to_string(), self.name().to_string()),
                (trailer::ENTIRE_AGENT.to_string(), state.agent_type.clone()),
            ],
        );
        let commit = layer.create_commit(tree_id, vec![head], &message)?;
        layer.set_branch(&branch, &commit)?;

        // The whole turn diff is agent work; the turn tree doubles as
        // the shadow side so user edits (none, by assumption) are zero.
        let turn_tree = layer.commit_tree(&commit)?;
        let attribution = compute_initial_attribution(
            ctx.repo,
            &head_tree,
            &turn_tree,
            &turn_tree,
            &state.files_touched,
        )?;

        let checkpoint_store = CheckpointStore::new(ctx.repo);
        let session_meta = SessionMetadata {
            session_id: state.session_id.clone(),
            agent: state.agent_type.clone(),
            token_usage: state.token_usage,
            files_touched: state.files_touched.clone(),
            checkpoints_count: state.step_count.max(1),
            initial_attribution: Some(attribution),
            ephemeral_branch: None,
        };
        checkpoint_store.write_committed(
            &CommittedWriteOpts {
                checkpoint_id: checkpoint_id.clone(),
                strategy: self.name().to_string(),
                branch: branch.clone(),
                session: session_meta,
                transcript: transcript.clone(),
                prompts: reader.extract_user_prompts(&transcript),
                context: None,
                content_hash: None,
                tasks: Vec::new(),
                ephemeral_branch: None,
                base_commit: Some(state.base_commit.clone()),
                subject: None,
            },
            true,
        )?;

        state.base_commit = commit.to_string();
        state.step_count = 0;
        state.files_touched = Vec::new();
        state.checkpoint_transcript_start = total_items;
        state.last_checkpoint_id = checkpoint_id.to_string();
        state.token_usage = TokenUsage::default();
        state.prompt_attributions.clear();
        state.pending_prompt_attribution = None;
        machine::apply_turn_end(&mut state);
        store.save(&state)
    }

    fn on_session_end(
        &self,
        ctx: &EngineContext,
        event: &SessionEvent,
    ) -> Result<(), EngineError> {
        // Flush any uncommitted turn before the session goes away.
        self.on_turn_end(ctx, event)?;
        let store = SessionStateStore::new(ctx.repo);
        let Some(mut state) = store.load(&event.session_id)? else {
            return Ok(());
        };
        machine::apply_session_end(&mut state);
        store.save(&state)
    }

    fn on_pre_push(&self, ctx: &EngineContext, event: &PushEvent) -> Result<(), EngineError> {
        if !ctx.settings.strategy_options.push_sessions {
            return Ok(());
        }
        if let Err(e) = sync::push_metadata_branch(ctx.repo, &event.remote) {
            warn!(remote = %event.remote, error = %e, "sessions branch push failed");
        }
        Ok(())
    }
}
