//! The Blob object stores raw file content. The engine writes one blob per
//! snapshotted worktree file and per metadata file on the sharded tree.

use std::fmt::Display;

use crate::errors::EngineError;
use crate::hash::ObjectHash;
use crate::internal::object::ObjectTrait;
use crate::internal::object::types::ObjectType;

/// A file's content, addressed by the hash of `blob <len>\0<data>`.
#[derive(Eq, Debug, Clone)]
pub struct Blob {
    pub id: ObjectHash,
    pub data: Vec<u8>,
}

impl PartialEq for Blob {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "blob {} ({} bytes)", self.id, self.data.len())
    }
}

impl Blob {
    /// Build a blob from raw content, computing its object ID.
    pub fn from_content(content: &[u8]) -> Blob {
        Blob {
            id: ObjectHash::from_type_and_data(ObjectType::Blob, content),
            data: content.to_vec(),
        }
    }
}

impl ObjectTrait for Blob {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, EngineError> {
        Ok(Blob {
            id: hash,
            data: data.to_vec(),
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Blob
    }

    fn to_data(&self) -> Result<Vec<u8>, EngineError> {
        Ok(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, set_hash_kind_for_test};

    #[test]
    fn test_blob_id_matches_git() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let blob = Blob::from_content(b"what is up, doc?");
        assert_eq!(
            blob.id.to_string(),
            "bd9dbf5aae1a3862dd1526723246b20206e5fc37"
        );
    }

    #[test]
    fn test_empty_blob() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let blob = Blob::from_content(b"");
        // Known empty-blob ID every Git repository shares.
        assert_eq!(
            blob.id.to_string(),
            "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"
        );
    }
}
