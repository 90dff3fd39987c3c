//! Serialized records stored inside a sharded checkpoint directory.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::attribution::InitialAttribution;
use crate::checkpoint::CheckpointId;
use crate::transcript::TokenUsage;

/// Aggregate record at the shard root (`<shard>/metadata.json`).
///
/// When several sessions condense into the same checkpoint as sibling
/// `<N>/` subtrees, counters are summed and `files_touched` unioned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointSummary {
    pub checkpoint_id: CheckpointId,
    pub strategy: String,
    /// Working branch the checkpoint was captured on.
    pub branch: String,
    /// Total checkpoints across all contained sessions.
    pub checkpoints_count: u32,
    /// Union of files touched by all contained sessions, sorted.
    pub files_touched: Vec<String>,
    /// Tree-root-relative paths to the per-session metadata files.
    pub sessions: Vec<String>,
    #[serde(default)]
    pub token_usage: TokenUsage,
}

impl CheckpointSummary {
    /// Fold one more session into the aggregate.
    pub fn absorb(&mut self, session: &SessionMetadata, session_path: String) {
        self.checkpoints_count += session.checkpoints_count;
        self.token_usage.add(&session.token_usage);
        for file in &session.files_touched {
            if !self.files_touched.contains(file) {
                self.files_touched.push(file.clone());
            }
        }
        self.files_touched.sort();
        self.sessions.push(session_path);
    }
}

/// Per-session record (`<shard>/<N>/metadata.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionMetadata {
    pub session_id: String,
    /// Agent type that produced the session (`claude-code`, `gemini`).
    pub agent: String,
    #[serde(default)]
    pub token_usage: TokenUsage,
    pub files_touched: Vec<String>,
    pub checkpoints_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_attribution: Option<InitialAttribution>,
    /// Shadow branch the session condensed from, as a provenance hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_branch: Option<String>,
}

/// A task-checkpoint recorded by the agent mid-turn, carried on shadow
/// commits as single-line JSON in the `Entire-Metadata-Task` trailer and
/// materialized under `<N>/tasks/<tool-use-id>/` at condensation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskCheckpoint {
    pub tool_use_id: String,
    #[serde(default)]
    pub is_incremental: bool,
    /// Free-form task payload (tool name, description, progress).
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}
