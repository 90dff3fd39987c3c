//! Strategy-agnostic lifecycle transitions.
//!
//! ```text
//!   UserPromptSubmit
//! Idle ─────────────► Active
//! Active ── TurnEnd ──► Idle
//! Active ── SessionEnd ──► Ended
//! Idle   ── SessionEnd ──► Ended
//! Ended  (terminal; GitCommit may still fire cleanup actions)
//! ```
//!
//! The functions here mutate a [`SessionState`] for each event; the
//! strategies decide what to do around the transition (snapshot,
//! condense, push). Keeping the transitions pure makes every rule in
//! this module unit-testable without a repository.

use chrono::Utc;

use crate::attribution::PromptAttribution;
use crate::session::{Phase, SessionState};
use crate::transcript::TokenUsage;

/// What a post-commit event should do with one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitDisposition {
    /// Active session whose work the commit contains: condense now,
    /// record the checkpoint for turn-end finalization, stay Active.
    CondenseActive,
    /// Idle session with content: condense, then clean up the shadow
    /// branch if no active session still needs it.
    CondenseIdle,
    /// Ended session with content and fresh transcript: condense, then
    /// advance the base commit for potential follow-up commits.
    CondenseEnded,
    /// Nothing to condense (idle or ended): just advance the base commit.
    AdvanceBase,
    /// Session unrelated to this commit.
    Skip,
}

/// Apply a `UserPromptSubmit` event. The caller computes the pending
/// attribution (worktree vs last-checkpoint tree) beforehand.
pub fn apply_prompt(state: &mut SessionState, pending: Option<PromptAttribution>) {
    state.phase = Phase::Active;
    state.last_interaction_time = Utc::now();
    if pending.is_some() {
        state.pending_prompt_attribution = pending;
    }
}

/// Apply a saved checkpoint: promote the pending prompt attribution,
/// bump the step counter, merge touched files, accumulate tokens, and
/// record the transcript watermark on the first checkpoint.
pub fn apply_checkpoint_saved(
    state: &mut SessionState,
    files: &[String],
    token_usage: &TokenUsage,
    transcript_items: usize,
    transcript_uuid: Option<String>,
) {
    if let Some(mut pending) = state.pending_prompt_attribution.take() {
        pending.checkpoint_number = state.step_count + 1;
        state.prompt_attributions.push(pending);
    }
    if state.step_count == 0 {
        state.transcript_lines_at_start = transcript_items;
        state.transcript_uuid_at_start = transcript_uuid;
    }
    state.step_count += 1;
    state.touch_files(files);
    state.token_usage.add(token_usage);
    state.last_interaction_time = Utc::now();
}

/// Apply a `TurnEnd` event.
pub fn apply_turn_end(state: &mut SessionState) {
    if state.phase == Phase::Active {
        state.phase = Phase::Idle;
    }
    state.last_interaction_time = Utc::now();
}

/// Apply a `SessionEnd` event. Terminal.
pub fn apply_session_end(state: &mut SessionState) {
    state.phase = Phase::Ended;
    state.ended_at = Some(Utc::now());
    state.last_interaction_time = Utc::now();
}

/// Decide what a post-commit event does with a session whose base
/// commit is the commit's parent.
///
/// `has_overlap` is the content-aware predicate of the attribution
/// module; `has_new_transcript` reports fresh transcript items past the
/// session's watermark.
pub fn commit_disposition(
    state: &SessionState,
    has_overlap: bool,
    has_new_transcript: bool,
) -> CommitDisposition {
    match state.phase {
        Phase::Active if state.has_content() && has_overlap => CommitDisposition::CondenseActive,
        // An active session mid-turn stays rooted at its base so the
        // next snapshot chains onto the existing shadow branch.
        Phase::Active => CommitDisposition::Skip,
        Phase::Idle if state.has_content() && has_overlap => CommitDisposition::CondenseIdle,
        Phase::Idle => CommitDisposition::AdvanceBase,
        Phase::Ended if state.has_content() && has_new_transcript => {
            CommitDisposition::CondenseEnded
        }
        Phase::Ended => CommitDisposition::AdvanceBase,
    }
}
