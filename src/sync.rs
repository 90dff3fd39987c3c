//! Push and non-fast-forward reconciliation of the metadata branch.
//!
//! Sessions branches from different clones never rewrite each other's
//! checkpoints: session subtrees are disjoint by construction, so a
//! rejected push is resolved by unioning the two trees and committing a
//! merge with both parents. Local entries win on (theoretical) path
//! collisions.

use tracing::{debug, info};

use crate::checkpoint::META_BRANCH;
use crate::errors::EngineError;
use crate::hash::ObjectHash;
use crate::internal::repo::Repository;
use crate::internal::repo::refs::branch_ref;
use crate::objects::ObjectLayer;

/// Push the metadata branch to `remote`, reconciling a non-fast-forward
/// rejection by tree union. Fetch and push each run under the two-minute
/// network deadline.
pub fn push_metadata_branch(repo: &Repository, remote: &str) -> Result<(), EngineError> {
    let layer = ObjectLayer::new(repo);
    let Some(local) = layer.branch_tip(META_BRANCH)? else {
        debug!("no local sessions branch, nothing to push");
        return Ok(());
    };

    let refspec = format!("{}:{}", branch_ref(META_BRANCH), branch_ref(META_BRANCH));
    if repo.push(remote, &refspec)? {
        return Ok(());
    }

    info!(remote, "sessions push rejected, merging remote state");
    repo.fetch(remote, &branch_ref(META_BRANCH))?;
    let remote_tip = repo.fetch_head()?;

    let merged = merge_metadata_commits(repo, &local, &remote_tip)?;
    layer.set_branch(META_BRANCH, &merged)?;

    if !repo.push(remote, &refspec)? {
        return Err(EngineError::Network(format!(
            "sessions push to {remote} still rejected after merge"
        )));
    }
    Ok(())
}

/// Union two sessions-branch tips into a merge commit.
///
/// Entries from both trees are kept; on a duplicate path (which the
/// checkpoint-ID injectivity invariant rules out in practice) the local
/// side wins.
pub fn merge_metadata_commits(
    repo: &Repository,
    local: &ObjectHash,
    remote: &ObjectHash,
) -> Result<ObjectHash, EngineError> {
    let layer = ObjectLayer::new(repo);
    if local == remote {
        return Ok(*local);
    }

    let local_tree = layer.commit_tree(local)?;
    let remote_tree = layer.commit_tree(remote)?;

    let mut merged = remote_tree;
    for (path, entry) in local_tree {
        merged.insert(path, entry);
    }

    let tree_id = layer.build_tree_from_entries(&merged)?;
    layer.create_commit(
        tree_id,
        vec![*local, *remote],
        "Merge remote sessions branch\n",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointId;
    use crate::checkpoint::store::{CheckpointStore, CommittedWriteOpts};
    use crate::checkpoint::summary::SessionMetadata;
    use crate::hash::{HashKind, set_hash_kind_for_test};
    use crate::transcript::TokenUsage;

    fn write_checkpoint(repo: &Repository, id: &str, session: &str) -> ObjectHash {
        let store = CheckpointStore::new(repo);
        store
            .write_committed(
                &CommittedWriteOpts {
                    checkpoint_id: CheckpointId::parse(id).unwrap(),
                    strategy: "manual-commit".to_string(),
                    branch: "main".to_string(),
                    session: SessionMetadata {
                        session_id: session.to_string(),
                        agent: "claude-code".to_string(),
                        token_usage: TokenUsage::default(),
                        files_touched: Vec::new(),
                        checkpoints_count: 1,
                        initial_attribution: None,
                        ephemeral_branch: None,
                    },
                    transcript: Vec::new(),
                    prompts: Vec::new(),
                    context: None,
                    content_hash: None,
                    tasks: Vec::new(),
                    ephemeral_branch: None,
                    base_commit: None,
                    subject: None,
                },
                true,
            )
            .unwrap()
            .commit
    }

    /// Divergent sessions branches union without losing checkpoints.
    #[test]
    fn test_merge_keeps_both_sides() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let layer = ObjectLayer::new(&repo);

        // "Remote" lineage: one checkpoint, then rewind the local ref to
        // simulate divergence.
        let remote_tip = write_checkpoint(&repo, "cccccccccccc", "2025-08-01-remote");
        repo.delete_ref(&branch_ref(META_BRANCH)).unwrap();

        let local_a = write_checkpoint(&repo, "a1b2c3d4e5f6", "2025-08-01-a");
        let local_b = write_checkpoint(&repo, "b2c3d4e5f6a1", "2025-08-01-b");
        assert_ne!(local_a, remote_tip);

        let merged = merge_metadata_commits(&repo, &local_b, &remote_tip).unwrap();
        let commit = repo.read_commit(&merged).unwrap();
        assert_eq!(commit.parent_commit_ids, vec![local_b, remote_tip]);

        layer.set_branch(META_BRANCH, &merged).unwrap();
        let ids = CheckpointStore::new(&repo).list_committed().unwrap();
        let names: Vec<&str> = ids.iter().map(|i| i.as_str()).collect();
        assert_eq!(
            names,
            vec!["a1b2c3d4e5f6", "b2c3d4e5f6a1", "cccccccccccc"]
        );
    }

    #[test]
    fn test_merge_identical_tips_is_noop() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let tip = write_checkpoint(&repo, "a1b2c3d4e5f6", "2025-08-01-a");
        assert_eq!(merge_metadata_commits(&repo, &tip, &tip).unwrap(), tip);
    }
}
