//! Orphan detection and deletion.
//!
//! Three artifact classes can leak when hooks are interrupted: shadow
//! branches nobody will condense, session state files for sessions that
//! never condensed, and checkpoint directories no commit references any
//! more. Cleanup is best-effort per item; an individual failure never
//! aborts the batch.

use std::collections::HashSet;
use std::sync::OnceLock;

use chrono::{Duration, Utc};
use regex::Regex;
use tracing::{debug, warn};

use crate::checkpoint::summary::SessionMetadata;
use crate::checkpoint::{CheckpointId, META_BRANCH, SESSION_METADATA_FILE};
use crate::config::CleanupSettings;
use crate::errors::EngineError;
use crate::internal::object::trailer;
use crate::internal::repo::Repository;
use crate::objects::ObjectLayer;
use crate::session::store::SessionStateStore;

/// What one cleanup run removed.
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub deleted_shadow_branches: Vec<String>,
    pub deleted_session_files: Vec<String>,
    pub deleted_checkpoints: Vec<CheckpointId>,
}

fn shadow_branch_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^entire/[0-9a-f]{7,}-[0-9a-f]{6}$").unwrap())
}

/// Shadow branches no live session still maps to.
pub fn find_orphan_shadow_branches(repo: &Repository) -> Result<Vec<String>, EngineError> {
    let sessions = SessionStateStore::new(repo).list()?;
    let mut needed: HashSet<String> = HashSet::new();
    for state in &sessions {
        if let Ok(base) = state.base_commit.parse::<crate::hash::ObjectHash>()
            && (state.has_content() || !state.turn_checkpoint_ids.is_empty())
        {
            needed.insert(crate::objects::shadow_branch_name(&base, &state.worktree_id));
        }
    }

    let mut orphans = Vec::new();
    for (ref_name, _) in repo.list_refs("refs/heads/entire/")? {
        let branch = ref_name.trim_start_matches("refs/heads/").to_string();
        if branch == META_BRANCH || !shadow_branch_pattern().is_match(&branch) {
            continue;
        }
        if !needed.contains(&branch) {
            orphans.push(branch);
        }
    }
    Ok(orphans)
}

/// Session IDs recorded in any condensed checkpoint on the metadata
/// branch.
fn condensed_session_ids(repo: &Repository) -> Result<HashSet<String>, EngineError> {
    let layer = ObjectLayer::new(repo);
    let mut ids = HashSet::new();
    let Some(tip) = layer.branch_tip(META_BRANCH)? else {
        return Ok(ids);
    };
    for (path, entry) in layer.commit_tree(&tip)? {
        // <shard>/<N>/metadata.json
        let segments: Vec<&str> = path.split('/').collect();
        if segments.len() == 4
            && segments[3] == SESSION_METADATA_FILE
            && segments[2].parse::<usize>().is_ok()
            && let Ok(blob) = repo.read_blob(&entry.hash)
            && let Ok(meta) = serde_json::from_slice::<SessionMetadata>(&blob.data)
        {
            ids.insert(meta.session_id);
        }
    }
    Ok(ids)
}

/// Session state files that never condensed, match no shadow branch, and
/// exceeded the grace period.
pub fn find_stale_sessions(
    repo: &Repository,
    settings: &CleanupSettings,
) -> Result<Vec<String>, EngineError> {
    let condensed = condensed_session_ids(repo)?;
    let shadow_prefixes: Vec<String> = repo
        .list_refs("refs/heads/entire/")?
        .into_iter()
        .filter_map(|(name, _)| {
            let branch = name.trim_start_matches("refs/heads/entire/").to_string();
            branch.split('-').next().map(|p| p.to_string())
        })
        .collect();
    let cutoff = Utc::now() - Duration::minutes(settings.grace_period_minutes as i64);

    let mut stale = Vec::new();
    for state in SessionStateStore::new(repo).list()? {
        if condensed.contains(&state.session_id) {
            continue;
        }
        let base_prefix: String = state.base_commit.chars().take(7).collect();
        if !base_prefix.is_empty() && shadow_prefixes.iter().any(|p| *p == base_prefix) {
            continue;
        }
        if state.started_at > cutoff {
            continue;
        }
        stale.push(state.session_id);
    }
    Ok(stale)
}

/// Checkpoint IDs on the metadata branch that no reachable
/// `Entire-Checkpoint` trailer references from any non-`entire/*`
/// branch. The walk is capped per branch.
pub fn find_unreferenced_checkpoints(
    repo: &Repository,
    settings: &CleanupSettings,
) -> Result<Vec<CheckpointId>, EngineError> {
    let store = crate::checkpoint::store::CheckpointStore::new(repo);
    let on_meta: Vec<CheckpointId> = store.list_committed()?;
    if on_meta.is_empty() {
        return Ok(Vec::new());
    }

    let mut referenced: HashSet<CheckpointId> = HashSet::new();
    for (ref_name, tip) in repo.list_refs("refs/heads/")? {
        if ref_name.starts_with("refs/heads/entire/") {
            continue;
        }
        let mut queue = vec![tip];
        let mut seen: HashSet<crate::hash::ObjectHash> = HashSet::new();
        let mut walked = 0usize;
        while let Some(hash) = queue.pop() {
            if walked >= settings.max_walk_depth || !seen.insert(hash) {
                continue;
            }
            walked += 1;
            let Ok(commit) = repo.read_commit(&hash) else {
                continue;
            };
            for value in commit.trailer_values(trailer::ENTIRE_CHECKPOINT) {
                if let Ok(id) = CheckpointId::parse(&value) {
                    referenced.insert(id);
                }
            }
            queue.extend(commit.parent_commit_ids);
        }
    }

    Ok(on_meta
        .into_iter()
        .filter(|id| !referenced.contains(id))
        .collect())
}

/// Rewrite the metadata branch with the given checkpoint subtrees
/// removed.
pub fn remove_checkpoints(
    repo: &Repository,
    ids: &[CheckpointId],
) -> Result<(), EngineError> {
    if ids.is_empty() {
        return Ok(());
    }
    let layer = ObjectLayer::new(repo);
    let Some(tip) = layer.branch_tip(META_BRANCH)? else {
        return Ok(());
    };
    let mut entries = layer.commit_tree(&tip)?;
    let before = entries.len();
    for id in ids {
        let prefix = format!("{}/", id.shard_dir());
        entries.retain(|path, _| !path.starts_with(&prefix));
    }
    if entries.len() == before {
        return Ok(());
    }

    let tree_id = layer.build_tree_from_entries(&entries)?;
    let subject = format!("Remove {} orphaned checkpoint(s)", ids.len());
    let commit = layer.create_commit(tree_id, vec![tip], &format!("{subject}\n"))?;
    layer.set_branch(META_BRANCH, &commit)
}

/// Run all three passes. Every deletion is best-effort.
pub fn run_cleanup(
    repo: &Repository,
    settings: &CleanupSettings,
) -> Result<CleanupReport, EngineError> {
    let mut report = CleanupReport::default();
    let layer = ObjectLayer::new(repo);

    for branch in find_orphan_shadow_branches(repo)? {
        match layer.delete_branch(&branch) {
            Ok(()) => report.deleted_shadow_branches.push(branch),
            Err(e) => warn!(branch, error = %e, "could not delete orphan shadow branch"),
        }
    }

    let session_store = SessionStateStore::new(repo);
    for session_id in find_stale_sessions(repo, settings)? {
        match session_store.clear(&session_id) {
            Ok(()) => report.deleted_session_files.push(session_id),
            Err(e) => warn!(session = %session_id, error = %e, "could not delete stale session"),
        }
    }

    let unreferenced = find_unreferenced_checkpoints(repo, settings)?;
    if !unreferenced.is_empty() {
        match remove_checkpoints(repo, &unreferenced) {
            Ok(()) => report.deleted_checkpoints = unreferenced,
            Err(e) => warn!(error = %e, "could not rewrite sessions branch"),
        }
    }

    debug!(
        shadows = report.deleted_shadow_branches.len(),
        sessions = report.deleted_session_files.len(),
        checkpoints = report.deleted_checkpoints.len(),
        "cleanup finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, ObjectHash, set_hash_kind_for_test};
    use crate::internal::object::tree::TreeItemMode;
    use crate::objects::{TreeEntry, TreeMap, shadow_branch_name};
    use crate::session::SessionState;

    fn scratch() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        (dir, repo)
    }

    fn seed_commit(repo: &Repository, marker: &str) -> ObjectHash {
        let layer = ObjectLayer::new(repo);
        let mut entries = TreeMap::new();
        entries.insert(
            "seed.txt".to_string(),
            TreeEntry {
                mode: TreeItemMode::Blob,
                hash: layer.write_blob(marker.as_bytes()).unwrap(),
            },
        );
        let tree = layer.build_tree_from_entries(&entries).unwrap();
        let commit = layer.create_commit(tree, vec![], "seed\n").unwrap();
        layer.set_branch("main", &commit).unwrap();
        commit
    }

    #[test]
    fn test_orphan_shadow_detection() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let (_dir, repo) = scratch();
        let base = seed_commit(&repo, "seed");
        let layer = ObjectLayer::new(&repo);

        // A shadow branch with a live session keeping it.
        let kept = shadow_branch_name(&base, "/live");
        layer.set_branch(&kept, &base).unwrap();
        let mut state = SessionState::new(
            "2025-08-01-live",
            &base.to_string(),
            "/live",
            "/live",
            "claude-code",
            "/t.jsonl",
        )
        .unwrap();
        state.touch_files(&["seed.txt".to_string()]);
        SessionStateStore::new(&repo).save(&state).unwrap();

        // A shadow branch nobody needs.
        let orphan = shadow_branch_name(&base, "/gone");
        layer.set_branch(&orphan, &base).unwrap();

        // A non-shadow name under entire/ is never touched.
        layer.set_branch("entire/sessions", &base).unwrap();

        let orphans = find_orphan_shadow_branches(&repo).unwrap();
        assert_eq!(orphans, vec![orphan]);
    }

    #[test]
    fn test_stale_session_grace_period() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let (_dir, repo) = scratch();
        let store = SessionStateStore::new(&repo);

        let mut fresh = SessionState::new(
            "2025-08-01-fresh",
            "0123456789012345678901234567890123456789",
            "/w",
            "/w",
            "claude-code",
            "/t.jsonl",
        )
        .unwrap();
        store.save(&fresh).unwrap();

        fresh.session_id = "2025-08-01-old".to_string();
        fresh.started_at = Utc::now() - Duration::minutes(30);
        store.save(&fresh).unwrap();

        let settings = CleanupSettings::default();
        let stale = find_stale_sessions(&repo, &settings).unwrap();
        assert_eq!(stale, vec!["2025-08-01-old"]);
    }

    #[test]
    fn test_unreferenced_checkpoint_removal() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let (_dir, repo) = scratch();
        let layer = ObjectLayer::new(&repo);
        let store = crate::checkpoint::store::CheckpointStore::new(&repo);

        // Two checkpoints on the metadata branch.
        for id in ["a1b2c3d4e5f6", "b2c3d4e5f6a1"] {
            store
                .write_committed(
                    &crate::checkpoint::store::CommittedWriteOpts {
                        checkpoint_id: CheckpointId::parse(id).unwrap(),
                        strategy: "manual-commit".to_string(),
                        branch: "main".to_string(),
                        session: SessionMetadata {
                            session_id: format!("2025-08-01-{id}"),
                            agent: "claude-code".to_string(),
                            token_usage: Default::default(),
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
                .unwrap();
        }

        // `main` references only the first one.
        let mut entries = TreeMap::new();
        entries.insert(
            "work.txt".to_string(),
            TreeEntry {
                mode: TreeItemMode::Blob,
                hash: layer.write_blob(b"work").unwrap(),
            },
        );
        let tree = layer.build_tree_from_entries(&entries).unwrap();
        let message = crate::internal::object::trailer::compose_message(
            "Apply agent work",
            None,
            &[(
                trailer::ENTIRE_CHECKPOINT.to_string(),
                "a1b2c3d4e5f6".to_string(),
            )],
        );
        let commit = layer.create_commit(tree, vec![], &message).unwrap();
        layer.set_branch("main", &commit).unwrap();

        let settings = CleanupSettings::default();
        let unreferenced = find_unreferenced_checkpoints(&repo, &settings).unwrap();
        assert_eq!(unreferenced.len(), 1);
        assert_eq!(unreferenced[0].as_str(), "b2c3d4e5f6a1");

        remove_checkpoints(&repo, &unreferenced).unwrap();
        let remaining = store.list_committed().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].as_str(), "a1b2c3d4e5f6");
    }
}
