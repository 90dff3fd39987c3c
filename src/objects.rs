//! The object layer makes Git look like a transactional map of
//! `path -> (mode, blob-hash)`.
//!
//! Trees are flattened into full-path maps before mutation and rebuilt
//! bottom-up afterwards. Building is deterministic (sorted maps in,
//! Git-sorted trees out) and idempotent for equal inputs, so rewriting
//! an unchanged tree produces the same hash. Nothing here moves a
//! worktree HEAD; branch updates are plain ref writes.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::errors::EngineError;
use crate::hash::ObjectHash;
use crate::internal::object::ObjectTrait;
use crate::internal::object::commit::Commit;
use crate::internal::object::signature::{Signature, SignatureType};
use crate::internal::object::tree::{Tree, TreeItem, TreeItemMode};
use crate::internal::object::types::ObjectType;
use crate::internal::repo::Repository;
use crate::internal::repo::refs::branch_ref;

/// One entry of a flattened tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: TreeItemMode,
    pub hash: ObjectHash,
}

/// Flattened tree: full slash-separated path to entry, sorted.
pub type TreeMap = BTreeMap<String, TreeEntry>;

/// Shadow branch name for a base commit and worktree:
/// `entire/<first 7 hex of base>-<first 6 hex of SHA-256(worktree_id)>`.
///
/// Pure and stable across processes; the worktree digest keeps hash
/// collisions per-worktree instead of per-base.
pub fn shadow_branch_name(base_commit: &ObjectHash, worktree_id: &str) -> String {
    let digest = Sha256::digest(worktree_id.as_bytes());
    format!("entire/{}-{}", base_commit.short(), &hex::encode(digest)[..6])
}

/// Tree and commit plumbing bound to one repository.
pub struct ObjectLayer<'a> {
    repo: &'a Repository,
}

impl<'a> ObjectLayer<'a> {
    pub fn new(repo: &'a Repository) -> ObjectLayer<'a> {
        ObjectLayer { repo }
    }

    /// Recursively expand a tree into a full-path map.
    pub fn flatten_tree(&self, tree_id: &ObjectHash) -> Result<TreeMap, EngineError> {
        let mut map = TreeMap::new();
        self.flatten_into(tree_id, "", &mut map)?;
        Ok(map)
    }

    fn flatten_into(
        &self,
        tree_id: &ObjectHash,
        prefix: &str,
        map: &mut TreeMap,
    ) -> Result<(), EngineError> {
        let tree = self.repo.read_tree(tree_id)?;
        for item in tree.tree_items {
            let path = if prefix.is_empty() {
                item.name.clone()
            } else {
                format!("{prefix}/{}", item.name)
            };
            if item.mode.is_tree() {
                self.flatten_into(&item.id, &path, map)?;
            } else {
                map.insert(
                    path,
                    TreeEntry {
                        mode: item.mode,
                        hash: item.id,
                    },
                );
            }
        }
        Ok(())
    }

    /// Build (and store) a tree from a flattened map, bottom-up.
    ///
    /// Fails atomically: child objects written before an error are
    /// unreachable garbage, and no ref observes a partial tree.
    pub fn build_tree_from_entries(&self, entries: &TreeMap) -> Result<ObjectHash, EngineError> {
        if entries.is_empty() {
            // The canonical empty tree, shared by every Git repository.
            return self.repo.write_object(ObjectType::Tree, &[]);
        }

        let mut files: Vec<TreeItem> = Vec::new();
        let mut subdirs: BTreeMap<String, TreeMap> = BTreeMap::new();

        for (path, entry) in entries {
            match path.split_once('/') {
                None => files.push(TreeItem::new(entry.mode, entry.hash, path.clone())),
                Some((dir, rest)) => {
                    subdirs
                        .entry(dir.to_string())
                        .or_default()
                        .insert(rest.to_string(), *entry);
                }
            }
        }

        let mut items = files;
        for (dir, children) in &subdirs {
            let child_id = self.build_tree_from_entries(children)?;
            items.push(TreeItem::new(TreeItemMode::Tree, child_id, dir.clone()));
        }

        let tree = Tree::from_tree_items(items)?;
        self.repo.write_object(ObjectType::Tree, &tree.to_data()?)
    }

    /// Store file content, returning the blob hash.
    pub fn write_blob(&self, data: &[u8]) -> Result<ObjectHash, EngineError> {
        self.repo.write_object(ObjectType::Blob, data)
    }

    /// Create a commit object with the repository's configured identity.
    pub fn create_commit(
        &self,
        tree_id: ObjectHash,
        parents: Vec<ObjectHash>,
        message: &str,
    ) -> Result<ObjectHash, EngineError> {
        let (name, email) = self.repo.identity();
        let author = Signature::now(SignatureType::Author, &name, &email);
        let committer = Signature::now(SignatureType::Committer, &name, &email);
        let commit = Commit::new(author, committer, tree_id, parents, message)?;
        self.repo
            .write_object(ObjectType::Commit, &commit.to_data()?)
    }

    /// Point `refs/heads/<name>` at a commit. Never touches worktree HEAD.
    pub fn set_branch(&self, name: &str, hash: &ObjectHash) -> Result<(), EngineError> {
        self.repo.write_ref(&branch_ref(name), hash)
    }

    /// Delete `refs/heads/<name>`.
    pub fn delete_branch(&self, name: &str) -> Result<(), EngineError> {
        self.repo.delete_ref(&branch_ref(name))
    }

    /// Resolve a branch tip.
    pub fn branch_tip(&self, name: &str) -> Result<Option<ObjectHash>, EngineError> {
        self.repo.read_ref(&branch_ref(name))
    }

    /// Flattened tree of a commit.
    pub fn commit_tree(&self, commit_id: &ObjectHash) -> Result<TreeMap, EngineError> {
        let commit = self.repo.read_commit(commit_id)?;
        self.flatten_tree(&commit.tree_id)
    }
}

/// Paths whose entries differ between two flattened trees (added,
/// removed, or changed either way).
pub fn changed_paths(old: &TreeMap, new: &TreeMap) -> Vec<String> {
    let mut changed = Vec::new();
    for (path, entry) in new {
        match old.get(path) {
            Some(previous) if previous == entry => {}
            _ => changed.push(path.clone()),
        }
    }
    for path in old.keys() {
        if !new.contains_key(path) {
            changed.push(path.clone());
        }
    }
    changed.sort();
    changed.dedup();
    changed
}
