//! Per-session lifecycle records.
//!
//! One JSON file per session lives in the Git common directory (shared
//! across worktrees) and is the single source of truth for active
//! sessions: lifecycle phase, transcript watermark, touched files, and
//! accumulated attribution counters. Condensed sessions need not retain
//! state.

pub mod machine;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attribution::PromptAttribution;
use crate::checkpoint::CheckpointId;
use crate::errors::EngineError;
use crate::transcript::TokenUsage;

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Active,
    Idle,
    Ended,
}

/// Everything the engine remembers about a session between hook
/// invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    /// Full SHA of the working-branch HEAD when the session began (or
    /// was last condensed). Empty in the partial warning state left by
    /// an interrupted initialization.
    pub base_commit: String,
    pub worktree_path: String,
    pub worktree_id: String,
    /// Agent type, selects the transcript reader (`claude-code`, `gemini`).
    pub agent_type: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub last_interaction_time: DateTime<Utc>,
    pub phase: Phase,
    /// Checkpoints recorded since the last condensation.
    #[serde(default)]
    pub step_count: u32,
    /// Offset (in the transcript format's own unit) of the prefix that
    /// previous condensations already covered.
    #[serde(default)]
    pub checkpoint_transcript_start: usize,
    pub transcript_path: String,
    /// Files changed by this session since the last condensation,
    /// sorted and deduplicated.
    #[serde(default)]
    pub files_touched: Vec<String>,
    #[serde(default)]
    pub untracked_files_at_start: Vec<String>,
    /// Checkpoint reused when no new content arrived; empty when none.
    #[serde(default)]
    pub last_checkpoint_id: String,
    /// Checkpoints condensed during the current turn, pending transcript
    /// finalization at turn end.
    #[serde(default)]
    pub turn_checkpoint_ids: Vec<CheckpointId>,
    #[serde(default)]
    pub token_usage: TokenUsage,
    #[serde(default)]
    pub prompt_attributions: Vec<PromptAttribution>,
    /// Captured at prompt submit, attached to the next checkpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_prompt_attribution: Option<PromptAttribution>,
    /// Transcript length observed at the first checkpoint of the session.
    #[serde(default)]
    pub transcript_lines_at_start: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_uuid_at_start: Option<String>,
}

impl SessionState {
    /// Initialize a fresh session rooted at `base_commit`.
    pub fn new(
        session_id: &str,
        base_commit: &str,
        worktree_path: &str,
        worktree_id: &str,
        agent_type: &str,
        transcript_path: &str,
    ) -> Result<SessionState, EngineError> {
        validate_session_id(session_id)?;
        let now = Utc::now();
        Ok(SessionState {
            session_id: session_id.to_string(),
            base_commit: base_commit.to_string(),
            worktree_path: worktree_path.to_string(),
            worktree_id: worktree_id.to_string(),
            agent_type: agent_type.to_string(),
            started_at: now,
            ended_at: None,
            last_interaction_time: now,
            phase: Phase::Active,
            step_count: 0,
            checkpoint_transcript_start: 0,
            transcript_path: transcript_path.to_string(),
            files_touched: Vec::new(),
            untracked_files_at_start: Vec::new(),
            last_checkpoint_id: String::new(),
            turn_checkpoint_ids: Vec::new(),
            token_usage: TokenUsage::default(),
            prompt_attributions: Vec::new(),
            pending_prompt_attribution: None,
            transcript_lines_at_start: 0,
            transcript_uuid_at_start: None,
        })
    }

    /// Whether there is anything to condense.
    pub fn has_content(&self) -> bool {
        !self.files_touched.is_empty()
    }

    /// Merge newly touched files, keeping the list sorted and unique.
    pub fn touch_files(&mut self, files: &[String]) {
        for file in files {
            if !self.files_touched.contains(file) {
                self.files_touched.push(file.clone());
            }
        }
        self.files_touched.sort();
    }
}

/// Session IDs come from the agent and become file and path names; they
/// must be date-prefixed, path-safe slugs.
pub fn validate_session_id(session_id: &str) -> Result<(), EngineError> {
    let valid = !session_id.is_empty()
        && session_id.len() <= 128
        && !session_id.starts_with('.')
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(EngineError::InvalidArgument(format!(
            "`{session_id}` is not a path-safe session id"
        )))
    }
}
