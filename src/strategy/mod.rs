//! Capture strategies.
//!
//! A strategy decides what each hook event does with the checkpoint
//! stores. Two exist:
//!
//! - **manual-commit**: agent checkpoints accumulate on a shadow branch;
//!   the user's own commits trigger condensation onto the metadata
//!   branch (with carry-forward for partial commits).
//! - **auto-commit**: every agent turn lands as a real commit on the
//!   working branch, with metadata written directly to the sharded tree.
//!
//! Strategies are a closed sum behind a shared trait; a registry maps
//! the configured name to a constructor. Hook binaries call the trait
//! methods and treat recoverable errors as log-and-continue.

pub mod auto;
pub mod manual;

use tracing::debug;

use crate::attribution::PromptAttribution;
use crate::checkpoint::summary::TaskCheckpoint;
use crate::config::{Settings, StrategyName};
use crate::diff::line_diff_counts;
use crate::errors::EngineError;
use crate::internal::repo::Repository;
use crate::objects::{ObjectLayer, TreeMap, shadow_branch_name};
use crate::session::SessionState;

/// Everything a strategy needs for one hook invocation.
pub struct EngineContext<'a> {
    pub repo: &'a Repository,
    pub settings: &'a Settings,
}

/// `UserPromptSubmit` hook payload.
#[derive(Debug, Clone, Default)]
pub struct PromptEvent {
    pub session_id: String,
    pub agent_type: String,
    pub transcript_path: String,
    /// Untracked files present when the session started, captured by
    /// the hook on first contact.
    pub untracked_files: Vec<String>,
}

/// A checkpoint-save event (the agent finished a step).
#[derive(Debug, Clone, Default)]
pub struct CheckpointEvent {
    pub session_id: String,
    /// Files the hook reports changed; merged with what the transcript
    /// itself records.
    pub modified_files: Vec<String>,
    pub deleted_files: Vec<String>,
    pub metadata: Option<serde_json::Value>,
    /// Present for task-checkpoint saves.
    pub task: Option<TaskCheckpoint>,
}

/// `TurnEnd` / `SessionEnd` hook payload.
#[derive(Debug, Clone, Default)]
pub struct SessionEvent {
    pub session_id: String,
}

/// `PrePush` hook payload.
#[derive(Debug, Clone, Default)]
pub struct PushEvent {
    pub remote: String,
}

/// Operations every strategy implements. Hook entry points dispatch
/// here after loading settings.
pub trait Strategy {
    fn name(&self) -> &'static str;

    fn on_user_prompt(&self, ctx: &EngineContext, event: &PromptEvent)
    -> Result<(), EngineError>;

    fn on_checkpoint(&self, ctx: &EngineContext, event: &CheckpointEvent)
    -> Result<(), EngineError>;

    /// Post-commit processing. Never runs during a rebase or merge.
    fn on_git_commit(&self, ctx: &EngineContext) -> Result<(), EngineError>;

    fn on_turn_end(&self, ctx: &EngineContext, event: &SessionEvent) -> Result<(), EngineError>;

    fn on_session_end(&self, ctx: &EngineContext, event: &SessionEvent)
    -> Result<(), EngineError>;

    fn on_pre_push(&self, ctx: &EngineContext, event: &PushEvent) -> Result<(), EngineError>;
}

/// Map a configured strategy to its implementation.
pub fn strategy_for(name: StrategyName) -> Box<dyn Strategy> {
    match name {
        StrategyName::ManualCommit => Box::new(manual::ManualCommitStrategy),
        StrategyName::AutoCommit => Box::new(auto::AutoCommitStrategy),
    }
}

// ----- shared helpers --------------------------------------------------

/// Initialize (or re-initialize) session state at the current HEAD.
/// An unborn branch leaves `base_commit` empty — the partial warning
/// state a later prompt re-initializes from.
pub(crate) fn init_session_state(
    repo: &Repository,
    event: &PromptEvent,
) -> Result<SessionState, EngineError> {
    let base = repo.head()?.map(|h| h.to_string()).unwrap_or_default();
    let mut state = SessionState::new(
        &event.session_id,
        &base,
        &repo.workdir.to_string_lossy(),
        &repo.worktree_id(),
        &event.agent_type,
        &event.transcript_path,
    )?;
    state.untracked_files_at_start = event.untracked_files.clone();
    debug!(session = %state.session_id, base = %state.base_commit, "initialized session state");
    Ok(state)
}

/// Compute the pending prompt attribution: the user's edits between the
/// last checkpoint (or session base) and the current worktree, restricted
/// to the session's touched files.
pub(crate) fn pending_prompt_attribution(
    repo: &Repository,
    state: &SessionState,
) -> Option<PromptAttribution> {
    if state.files_touched.is_empty() || state.base_commit.is_empty() {
        return None;
    }
    let layer = ObjectLayer::new(repo);
    let base: crate::hash::ObjectHash = state.base_commit.parse().ok()?;
    let shadow = shadow_branch_name(&base, &state.worktree_id);
    let reference: TreeMap = match layer.branch_tip(&shadow).ok()? {
        Some(tip) => layer.commit_tree(&tip).ok()?,
        None => layer.commit_tree(&base).ok()?,
    };

    let mut added = 0usize;
    let mut removed = 0usize;
    for path in &state.files_touched {
        let old = reference
            .get(path)
            .and_then(|entry| repo.read_blob(&entry.hash).ok())
            .map(|blob| blob.data)
            .unwrap_or_default();
        let new = repo.read_worktree_file(path).unwrap_or_default();
        let diff = line_diff_counts(&old, &new);
        added += diff.added;
        removed += diff.removed;
    }
    if added == 0 && removed == 0 {
        return None;
    }
    Some(PromptAttribution {
        checkpoint_number: 0, // assigned when the next checkpoint lands
        lines_added: added,
        lines_removed: removed,
    })
}

/// Make an agent-reported path worktree-relative; paths outside the
/// worktree are dropped.
pub(crate) fn relativize(repo: &Repository, path: &str) -> Option<String> {
    let workdir = repo.workdir.to_string_lossy().to_string();
    if let Some(rest) = path.strip_prefix(&format!("{workdir}/")) {
        return Some(rest.to_string());
    }
    if path.starts_with('/') {
        return None;
    }
    Some(path.to_string())
}

/// True when another session still needs this shadow branch: an active
/// session keeps it alive even before its first snapshot, and any
/// session with un-condensed content or pending turn checkpoints does
/// too. A shared shadow branch is never deleted out from under them.
pub(crate) fn shadow_branch_shared(
    sessions: &[SessionState],
    branch: &str,
    excluding_session: &str,
) -> bool {
    use crate::session::Phase;
    sessions.iter().any(|other| {
        other.session_id != excluding_session
            && !other.base_commit.is_empty()
            && other
                .base_commit
                .parse::<crate::hash::ObjectHash>()
                .map(|base| shadow_branch_name(&base, &other.worktree_id) == branch)
                .unwrap_or(false)
            && (other.phase == Phase::Active
                || other.has_content()
                || !other.turn_checkpoint_ids.is_empty())
    })
}
