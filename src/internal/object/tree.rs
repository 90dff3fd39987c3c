//! The Tree object maps names to blobs and subtrees. The engine builds trees
//! in two situations: snapshotting a worktree onto a shadow branch, and
//! rewriting the sharded metadata tree on the sessions branch.
//!
//! Serialization is byte-compatible with Git: entries are
//! `<mode> <name>\0<raw hash>`, sorted with the directory-as-`name/`
//! comparison Git uses, so trees built here hash identically to trees
//! built by Git itself for the same contents.

use std::fmt::Display;

use bstr::ByteSlice;

use crate::errors::EngineError;
use crate::hash::{ObjectHash, get_hash_kind};
use crate::internal::object::ObjectTrait;
use crate::internal::object::types::ObjectType;

/// File mode of a tree entry.
#[derive(Eq, Debug, Clone, Copy, PartialEq, Hash)]
pub enum TreeItemMode {
    Blob,
    BlobExecutable,
    Link,
    Tree,
    Commit,
}

impl Display for TreeItemMode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            TreeItemMode::Blob => "100644",
            TreeItemMode::BlobExecutable => "100755",
            TreeItemMode::Link => "120000",
            TreeItemMode::Tree => "040000",
            TreeItemMode::Commit => "160000",
        })
    }
}

impl TreeItemMode {
    /// Mode bytes as stored in a raw tree entry (no leading zero for trees).
    pub fn to_bytes(self) -> &'static [u8] {
        match self {
            TreeItemMode::Blob => b"100644",
            TreeItemMode::BlobExecutable => b"100755",
            TreeItemMode::Link => b"120000",
            TreeItemMode::Tree => b"40000",
            TreeItemMode::Commit => b"160000",
        }
    }

    /// Parse the mode field of a raw tree entry.
    pub fn from_bytes(mode: &[u8]) -> Result<TreeItemMode, EngineError> {
        Ok(match mode {
            b"100644" | b"100664" => TreeItemMode::Blob,
            b"100755" => TreeItemMode::BlobExecutable,
            b"120000" => TreeItemMode::Link,
            b"40000" | b"040000" => TreeItemMode::Tree,
            b"160000" => TreeItemMode::Commit,
            _ => {
                return Err(EngineError::InvalidTreeObject(format!(
                    "unknown mode {}",
                    String::from_utf8_lossy(mode)
                )));
            }
        })
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, TreeItemMode::Tree)
    }
}

/// A single entry of a tree: mode, object hash and name.
#[derive(Eq, Debug, Clone, PartialEq)]
pub struct TreeItem {
    pub mode: TreeItemMode,
    pub id: ObjectHash,
    pub name: String,
}

impl TreeItem {
    pub fn new(mode: TreeItemMode, id: ObjectHash, name: String) -> TreeItem {
        TreeItem { mode, id, name }
    }

    /// Key Git sorts tree entries by: directories compare as `name/`.
    fn sort_key(&self) -> Vec<u8> {
        let mut key = self.name.as_bytes().to_vec();
        if self.mode.is_tree() {
            key.push(b'/');
        }
        key
    }
}

/// A full tree object.
#[derive(Eq, Debug, Clone, PartialEq)]
pub struct Tree {
    pub id: ObjectHash,
    pub tree_items: Vec<TreeItem>,
}

impl Display for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "tree {}", self.id)?;
        for item in &self.tree_items {
            writeln!(f, "{} {} {}", item.mode, item.id, item.name)?;
        }
        Ok(())
    }
}

impl Tree {
    /// Build a tree from entries, sorting them the way Git requires and
    /// computing the object ID. Rejects empty trees: the engine never
    /// writes one (Git tolerates them but nothing here produces them).
    pub fn from_tree_items(mut tree_items: Vec<TreeItem>) -> Result<Tree, EngineError> {
        if tree_items.is_empty() {
            return Err(EngineError::InvalidTreeObject(
                "tree has no entries".to_string(),
            ));
        }
        tree_items.sort_by_key(|a| a.sort_key());

        let mut tree = Tree {
            id: ObjectHash::default(),
            tree_items,
        };
        tree.id = ObjectHash::from_type_and_data(ObjectType::Tree, &tree.to_data()?);
        Ok(tree)
    }

    /// Look up a direct child entry by name.
    pub fn find(&self, name: &str) -> Option<&TreeItem> {
        self.tree_items.iter().find(|i| i.name == name)
    }
}

impl ObjectTrait for Tree {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, EngineError> {
        let hash_size = get_hash_kind().size();
        let mut tree_items = Vec::new();
        let mut rest = data;

        while !rest.is_empty() {
            let mode_end = rest
                .find_byte(b' ')
                .ok_or_else(|| EngineError::InvalidTreeObject("truncated mode".to_string()))?;
            let mode = TreeItemMode::from_bytes(&rest[..mode_end])?;

            let name_end = rest
                .find_byte(b'\0')
                .ok_or_else(|| EngineError::InvalidTreeObject("truncated name".to_string()))?;
            let name = rest[mode_end + 1..name_end]
                .to_str()
                .map_err(|e| EngineError::Conversion(e.to_string()))?
                .to_string();

            if rest.len() < name_end + 1 + hash_size {
                return Err(EngineError::InvalidTreeObject(
                    "truncated entry hash".to_string(),
                ));
            }
            let id = ObjectHash::from_bytes(&rest[name_end + 1..name_end + 1 + hash_size])
                .map_err(EngineError::InvalidHashValue)?;

            tree_items.push(TreeItem { mode, id, name });
            rest = &rest[name_end + 1 + hash_size..];
        }

        Ok(Tree { id: hash, tree_items })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tree
    }

    fn to_data(&self) -> Result<Vec<u8>, EngineError> {
        let mut data = Vec::new();
        for item in &self.tree_items {
            data.extend(item.mode.to_bytes());
            data.push(b' ');
            data.extend(item.name.as_bytes());
            data.push(b'\0');
            data.extend(item.id.as_ref());
        }
        Ok(data)
    }
}
