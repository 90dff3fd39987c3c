//! Error types for the checkpoint engine.
//!
//! This module defines a unified error enumeration used across object
//! parsing, repository access, checkpoint writes, condensation, and the
//! metadata-branch sync path. It integrates with `thiserror` to provide
//! rich `Display` implementations and error source chaining.
//!
//! Notes:
//! - Each variant carries contextual details via its message payload.
//! - Hook entry points treat most variants as recoverable: they log and
//!   return cleanly so the user's Git workflow is never broken. Library
//!   functions always propagate.

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the checkpoint engine.
///
/// - Used across object I/O, ref handling, checkpoint stores, session
///   state, condensation, cleanup and sync.
/// - Implements `std::error::Error` via `thiserror`.
pub enum EngineError {
    /// Invalid or unsupported git object type name.
    #[error("The `{0}` is not a valid git object type.")]
    InvalidObjectType(String),

    /// Malformed tree object.
    #[error("Not a valid git tree object: {0}")]
    InvalidTreeObject(String),

    /// Malformed commit object.
    #[error("Not a valid git commit object.")]
    InvalidCommitObject,

    /// Invalid commit signature line.
    #[error("The `{0}` is not a valid git commit signature.")]
    InvalidSignature(String),

    /// Invalid SHA-1/SHA-256 hash formatting or value.
    #[error("The {0} is not a valid hash value.")]
    InvalidHashValue(String),

    /// Invalid function argument (checkpoint IDs, session IDs, paths).
    #[error("Argument parse failed: {0}")]
    InvalidArgument(String),

    /// Ref, object, or file absent. Recoverable in hook paths.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Requested snapshot carries no changes. Resolved by returning the
    /// current tip of the shadow branch; never fatal.
    #[error("Empty commit: {0}")]
    EmptyCommit(String),

    /// A new session tried to write to a shadow branch already owned by
    /// a different session ID. Fatal for the new session's first
    /// checkpoint; no partial write is performed.
    #[error("Shadow branch `{branch}` is owned by session `{owner}`, refusing write for `{requested}`")]
    SessionIdConflict {
        branch: String,
        owner: String,
        requested: String,
    },

    /// An existing shadow ref points at work from a different worktree.
    #[error("Shadow branch `{branch}` belongs to worktree `{existing_worktree}` (last active {last_activity}), not `{requested_worktree}`")]
    ShadowBranchConflict {
        branch: String,
        existing_worktree: String,
        requested_worktree: String,
        last_activity: String,
    },

    /// Condensation failed. Session state is not advanced, the shadow
    /// branch is retained, and the next commit retries.
    #[error("Condensation failed for session `{session_id}`: {cause}")]
    Condensation { session_id: String, cause: String },

    /// A checkpoint write targeted a sharded path that already exists.
    #[error("Checkpoint `{0}` already exists on the metadata branch")]
    CheckpointExists(String),

    /// I/O error from the repository or the filesystem.
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error for persisted records.
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),

    /// Text encoding or UTF-8 conversion error.
    #[error("UTF-8 conversion error: {0}")]
    Conversion(String),

    /// `git fetch`/`git push` sub-process failure or deadline overrun.
    #[error("Network Error: {0}")]
    Network(String),

    /// Generic custom error for miscellaneous failures.
    #[error("{0}")]
    Custom(String),
}

impl EngineError {
    /// True for conditions a hook entry point may log and skip without
    /// aborting the user's Git operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::NotFound(_) | EngineError::EmptyCommit(_) | EngineError::Network(_)
        )
    }
}
