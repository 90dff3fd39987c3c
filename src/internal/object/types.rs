//! Object type enumeration shared by the object database and the object model.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

/// The four base Git object types the engine reads and writes.
///
/// The engine never produces deltified objects: every write is a plain
/// loose object, which any Git implementation can repack later.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ObjectType {
    /// Lowercase type name as it appears in loose-object headers.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Commit => "commit",
            ObjectType::Tree => "tree",
            ObjectType::Blob => "blob",
            ObjectType::Tag => "tag",
        }
    }

    /// Type name bytes for object-ID hashing and loose-object headers.
    pub fn as_bytes(&self) -> &'static [u8] {
        self.as_str().as_bytes()
    }

    /// Parse a type name from a loose-object header.
    pub fn from_string(s: &str) -> Result<ObjectType, EngineError> {
        match s {
            "commit" => Ok(ObjectType::Commit),
            "tree" => Ok(ObjectType::Tree),
            "blob" => Ok(ObjectType::Blob),
            "tag" => Ok(ObjectType::Tag),
            _ => Err(EngineError::InvalidObjectType(s.to_string())),
        }
    }
}
