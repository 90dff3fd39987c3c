//! Object model definitions for Git blobs, trees, commits, and the trailer
//! conventions the engine layers on commit messages.
//!
//! Checkpoint metadata lives in two places: structured JSON files inside
//! sharded trees on the metadata branch, and key/value trailers on commit
//! messages. The object model here is deliberately small — just enough to
//! snapshot worktrees, build sharded metadata trees, and chain commits —
//! while staying byte-compatible with what `git fsck` expects.

pub mod blob;
pub mod commit;
pub mod signature;
pub mod trailer;
pub mod tree;
pub mod types;

use std::fmt::Display;

use crate::{errors::EngineError, hash::ObjectHash, internal::object::types::ObjectType};

/// Common interface for the Git object types the engine materializes.
pub trait ObjectTrait: Send + Sync + Display {
    /// Creates a new object from a byte slice (raw object payload, header
    /// already stripped).
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, EngineError>
    where
        Self: Sized;

    /// Returns the type of the object.
    fn get_type(&self) -> ObjectType;

    /// Serialize the object payload (without the loose-object header).
    fn to_data(&self) -> Result<Vec<u8>, EngineError>;

    /// Computes the object hash from serialized data.
    fn object_hash(&self) -> Result<ObjectHash, EngineError> {
        let data = self.to_data()?;
        Ok(ObjectHash::from_type_and_data(self.get_type(), &data))
    }
}
