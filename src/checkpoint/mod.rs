//! Checkpoint identity and the sharded layout on the metadata branch.
//!
//! A checkpoint is a 12-hex-character ID (48 bits of crypto randomness)
//! mapped onto the tree as `<id[0:2]>/<id[2:]>/…` — a 256-way shard that
//! keeps any single directory from growing without bound.

pub mod store;
pub mod summary;

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::EngineError;

/// Name of the permanent metadata branch. Reserved: never treated as a
/// shadow branch even though it lives under `entire/`.
pub const META_BRANCH: &str = "entire/sessions";

/// File names inside a sharded checkpoint directory.
pub const SUMMARY_FILE: &str = "metadata.json";
pub const SESSION_METADATA_FILE: &str = "metadata.json";
pub const FULL_TRANSCRIPT_FILE: &str = "full.jsonl";
pub const PROMPT_FILE: &str = "prompt.txt";
pub const CONTEXT_FILE: &str = "context.md";
pub const CONTENT_HASH_FILE: &str = "content_hash.txt";
pub const TASKS_DIR: &str = "tasks";

/// A validated 12-character lowercase-hex checkpoint identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointId(String);

impl Display for CheckpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl CheckpointId {
    /// Allocate a fresh random ID (48 bits from a v4 UUID).
    pub fn generate() -> CheckpointId {
        let uuid = Uuid::new_v4();
        CheckpointId(hex::encode(&uuid.as_bytes()[..6]))
    }

    /// Validate an ID read from a trailer, a path, or user input.
    pub fn parse(s: &str) -> Result<CheckpointId, EngineError> {
        if s.len() == 12 && s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            Ok(CheckpointId(s.to_string()))
        } else {
            Err(EngineError::InvalidArgument(format!(
                "`{s}` is not a 12-hex checkpoint id"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Sharded directory of this checkpoint, relative to the tree root.
    pub fn shard_dir(&self) -> String {
        format!("{}/{}", &self.0[..2], &self.0[2..])
    }

    /// Recover an ID from the two path segments of a sharded directory.
    pub fn from_shard_segments(first: &str, rest: &str) -> Option<CheckpointId> {
        if first.len() == 2 && rest.len() == 10 {
            CheckpointId::parse(&format!("{first}{rest}")).ok()
        } else {
            None
        }
    }
}
