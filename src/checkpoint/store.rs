//! The checkpoint store: temporary (shadow-branch) snapshot writes and
//! committed (metadata-branch) checkpoint reads and writes.
//!
//! Shadow writes append working-tree snapshots to the ephemeral branch
//! derived from the session's base commit and worktree. Committed writes
//! append one sharded subtree per call to the permanent sessions branch.
//! Both paths build the whole new tree before a single ref update, so a
//! failed write leaves the store unchanged.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::checkpoint::summary::{CheckpointSummary, SessionMetadata, TaskCheckpoint};
use crate::checkpoint::{
    CheckpointId, CONTENT_HASH_FILE, CONTEXT_FILE, FULL_TRANSCRIPT_FILE, META_BRANCH, PROMPT_FILE,
    SESSION_METADATA_FILE, SUMMARY_FILE, TASKS_DIR,
};
use crate::errors::EngineError;
use crate::hash::ObjectHash;
use crate::internal::object::trailer;
use crate::internal::object::tree::TreeItemMode;
use crate::internal::object::commit::Commit;
use crate::internal::repo::Repository;
use crate::objects::{ObjectLayer, TreeEntry, TreeMap, shadow_branch_name};

/// Cap on shadow-chain walks; a session never accumulates this many
/// snapshots between condensations.
const SHADOW_WALK_LIMIT: usize = 1000;

/// Inputs for a temporary (shadow) snapshot write.
#[derive(Debug, Clone, Default)]
pub struct TemporaryWriteOpts {
    pub session_id: String,
    pub strategy: String,
    pub base_commit: String,
    pub worktree_id: String,
    /// Files created or modified since the previous snapshot,
    /// worktree-relative.
    pub modified_files: Vec<String>,
    /// Files deleted since the previous snapshot.
    pub deleted_files: Vec<String>,
    /// Per-step metadata carried as single-line JSON in a trailer.
    pub metadata: Option<Value>,
    /// Task-checkpoint payload (set by `write_temporary_task`).
    pub task: Option<TaskCheckpoint>,
    pub subject: Option<String>,
}

/// Inputs for a committed (metadata-branch) checkpoint write.
#[derive(Debug, Clone)]
pub struct CommittedWriteOpts {
    pub checkpoint_id: CheckpointId,
    pub strategy: String,
    /// Working branch the checkpoint was captured on.
    pub branch: String,
    pub session: SessionMetadata,
    /// Full transcript bytes for `<N>/full.jsonl`.
    pub transcript: Vec<u8>,
    pub prompts: Vec<String>,
    /// Condensed narrative for `<N>/context.md`, when a summarizer ran.
    pub context: Option<String>,
    /// Hash of the files-touched state for `<N>/content_hash.txt`.
    pub content_hash: Option<String>,
    /// Task-checkpoints in chain order; incremental ones are numbered
    /// by occurrence per tool-use ID.
    pub tasks: Vec<TaskCheckpoint>,
    /// Origin shadow branch, recorded as an `Ephemeral-branch` trailer.
    pub ephemeral_branch: Option<String>,
    pub base_commit: Option<String>,
    pub subject: Option<String>,
}

/// Result of a committed write.
#[derive(Debug, Clone)]
pub struct CommittedWrite {
    pub commit: ObjectHash,
    pub session_index: usize,
    /// Tree-root-relative path of the new `<N>/metadata.json`.
    pub session_path: String,
}

/// A condensed checkpoint read back from the metadata branch.
#[derive(Debug, Clone)]
pub struct CommittedCheckpoint {
    pub summary: CheckpointSummary,
    pub session: SessionMetadata,
    pub transcript: Vec<u8>,
    pub prompts: Vec<String>,
    pub context: Option<String>,
}

pub struct CheckpointStore<'a> {
    repo: &'a Repository,
}

impl<'a> CheckpointStore<'a> {
    pub fn new(repo: &'a Repository) -> CheckpointStore<'a> {
        CheckpointStore { repo }
    }

    fn layer(&self) -> ObjectLayer<'a> {
        ObjectLayer::new(self.repo)
    }

    /// Whether the shadow branch for a base commit / worktree pair exists.
    pub fn shadow_branch_exists(
        &self,
        base_commit: &ObjectHash,
        worktree_id: &str,
    ) -> Result<bool, EngineError> {
        let name = shadow_branch_name(base_commit, worktree_id);
        Ok(self.layer().branch_tip(&name)?.is_some())
    }

    /// Append a working-tree snapshot to the session's shadow branch.
    ///
    /// The snapshot tree is `modified ∪ new` minus `deleted`, layered
    /// over the previous shadow tree (or the base commit's tree for the
    /// first snapshot). Returns the snapshot commit — or the current tip
    /// unchanged when the snapshot would be empty.
    pub fn write_temporary(&self, opts: &TemporaryWriteOpts) -> Result<ObjectHash, EngineError> {
        let layer = self.layer();
        let base_commit: ObjectHash = opts
            .base_commit
            .parse()
            .map_err(EngineError::InvalidHashValue)?;
        let branch = shadow_branch_name(&base_commit, &opts.worktree_id);

        let tip = layer.branch_tip(&branch)?;
        if let Some(tip_hash) = &tip {
            let tip_commit = self.repo.read_commit(tip_hash)?;
            if let Some(owner) = tip_commit.trailer(trailer::ENTIRE_SESSION)
                && owner != opts.session_id
            {
                // A same-name branch from another worktree is a hash
                // collision, not a session race; report both sides.
                let owner_state = crate::session::store::SessionStateStore::new(self.repo)
                    .load(&owner)
                    .unwrap_or(None);
                if let Some(owner_state) = owner_state
                    && owner_state.worktree_id != opts.worktree_id
                {
                    return Err(EngineError::ShadowBranchConflict {
                        branch,
                        existing_worktree: owner_state.worktree_path,
                        requested_worktree: opts.worktree_id.clone(),
                        last_activity: owner_state.last_interaction_time.to_rfc3339(),
                    });
                }
                return Err(EngineError::SessionIdConflict {
                    branch,
                    owner,
                    requested: opts.session_id.clone(),
                });
            }
        }

        let mut entries = match &tip {
            Some(tip_hash) => layer.commit_tree(tip_hash)?,
            None => layer.commit_tree(&base_commit)?,
        };
        let before = entries.clone();

        for path in &opts.modified_files {
            match self.repo.read_worktree_file(path) {
                Ok(content) => {
                    let mode = if self.repo.worktree_file_is_executable(path) {
                        TreeItemMode::BlobExecutable
                    } else {
                        TreeItemMode::Blob
                    };
                    let hash = layer.write_blob(&content)?;
                    entries.insert(path.clone(), TreeEntry { mode, hash });
                }
                Err(_) => {
                    // Listed as modified but already gone again.
                    debug!(path, "snapshot skipping vanished file");
                    entries.remove(path);
                }
            }
        }
        for path in &opts.deleted_files {
            entries.remove(path);
        }

        if entries == before {
            return match tip {
                Some(tip_hash) => Ok(tip_hash),
                None => Err(EngineError::EmptyCommit(format!(
                    "no changes to snapshot for session {}",
                    opts.session_id
                ))),
            };
        }

        let tree_id = layer.build_tree_from_entries(&entries)?;
        let mut trailers = vec![
            (trailer::ENTIRE_SESSION.to_string(), opts.session_id.clone()),
            (trailer::ENTIRE_STRATEGY.to_string(), opts.strategy.clone()),
            (trailer::BASE_COMMIT.to_string(), base_commit.to_string()),
        ];
        if let Some(metadata) = &opts.metadata {
            trailers.push((
                trailer::ENTIRE_METADATA.to_string(),
                serde_json::to_string(metadata)?,
            ));
        }
        if let Some(task) = &opts.task {
            trailers.push((
                trailer::ENTIRE_METADATA_TASK.to_string(),
                serde_json::to_string(task)?,
            ));
        }

        let subject = opts
            .subject
            .clone()
            .unwrap_or_else(|| format!("entire: checkpoint for {}", opts.session_id));
        let message = trailer::compose_message(&subject, None, &trailers);

        let parent = tip.unwrap_or(base_commit);
        let commit = layer.create_commit(tree_id, vec![parent], &message)?;
        layer.set_branch(&branch, &commit)?;
        Ok(commit)
    }

    /// Append a snapshot that also records a task-checkpoint. Incremental
    /// task-checkpoints skip transcript-related metadata entirely; the
    /// payload rides the commit trailer either way.
    pub fn write_temporary_task(
        &self,
        opts: &TemporaryWriteOpts,
        task: TaskCheckpoint,
    ) -> Result<ObjectHash, EngineError> {
        let mut opts = opts.clone();
        if task.is_incremental {
            opts.metadata = None;
        }
        opts.task = Some(task);
        self.write_temporary(&opts)
    }

    /// Commits of the shadow branch in chain order (oldest first),
    /// stopping below the base commit.
    pub fn shadow_chain(&self, branch: &str) -> Result<Vec<Commit>, EngineError> {
        let layer = self.layer();
        let Some(tip) = layer.branch_tip(branch)? else {
            return Ok(Vec::new());
        };

        let mut chain = Vec::new();
        let mut cursor = Some(tip);
        while let Some(hash) = cursor {
            if chain.len() >= SHADOW_WALK_LIMIT {
                break;
            }
            let commit = self.repo.read_commit(&hash)?;
            if commit.trailer(trailer::ENTIRE_SESSION).is_none() {
                break; // reached the base commit
            }
            cursor = commit.parent_commit_ids.first().copied();
            chain.push(commit);
        }
        chain.reverse();
        Ok(chain)
    }

    /// Write a condensed checkpoint subtree onto the metadata branch.
    ///
    /// With `expect_new`, an already-populated shard path fails the write
    /// (the caller must have allocated a fresh ID). Otherwise the session
    /// lands as the next `<N>/` sibling and the shard-root summary is
    /// re-aggregated.
    pub fn write_committed(
        &self,
        opts: &CommittedWriteOpts,
        expect_new: bool,
    ) -> Result<CommittedWrite, EngineError> {
        let layer = self.layer();
        let meta_tip = layer.branch_tip(META_BRANCH)?;
        let mut entries = match &meta_tip {
            Some(tip) => layer.commit_tree(tip)?,
            None => TreeMap::new(),
        };

        let shard = opts.checkpoint_id.shard_dir();
        let shard_prefix = format!("{shard}/");
        let occupied = entries.keys().any(|k| k.starts_with(&shard_prefix));
        if occupied && expect_new {
            return Err(EngineError::CheckpointExists(
                opts.checkpoint_id.to_string(),
            ));
        }

        let session_index = next_session_index(&entries, &shard_prefix);
        let session_dir = format!("{shard}/{session_index}");
        let session_path = format!("{session_dir}/{SESSION_METADATA_FILE}");

        put(
            &layer,
            &mut entries,
            session_path.clone(),
            &serde_json::to_vec_pretty(&opts.session)?,
        )?;
        put(
            &layer,
            &mut entries,
            format!("{session_dir}/{FULL_TRANSCRIPT_FILE}"),
            &opts.transcript,
        )?;
        let prompt_lines: Vec<String> = opts
            .prompts
            .iter()
            .map(|p| p.replace('\n', " "))
            .collect();
        put(
            &layer,
            &mut entries,
            format!("{session_dir}/{PROMPT_FILE}"),
            format!("{}\n", prompt_lines.join("\n")).as_bytes(),
        )?;
        if let Some(context) = &opts.context {
            put(
                &layer,
                &mut entries,
                format!("{session_dir}/{CONTEXT_FILE}"),
                context.as_bytes(),
            )?;
        }
        if let Some(content_hash) = &opts.content_hash {
            put(
                &layer,
                &mut entries,
                format!("{session_dir}/{CONTENT_HASH_FILE}"),
                format!("{content_hash}\n").as_bytes(),
            )?;
        }

        let mut incremental_sequence: BTreeMap<String, u32> = BTreeMap::new();
        for task in &opts.tasks {
            let bytes = serde_json::to_vec_pretty(task)?;
            let path = if task.is_incremental {
                let seq = incremental_sequence
                    .entry(task.tool_use_id.clone())
                    .or_insert(0);
                let path = format!(
                    "{session_dir}/{TASKS_DIR}/{}/checkpoints/{:03}-{}.json",
                    task.tool_use_id, seq, task.tool_use_id
                );
                *seq += 1;
                path
            } else {
                format!(
                    "{session_dir}/{TASKS_DIR}/{}/checkpoint.json",
                    task.tool_use_id
                )
            };
            put(&layer, &mut entries, path, &bytes)?;
        }

        // Aggregate the shard-root summary.
        let summary_path = format!("{shard}/{SUMMARY_FILE}");
        let mut summary = match entries.get(&summary_path) {
            Some(entry) => serde_json::from_slice::<CheckpointSummary>(
                &self.repo.read_blob(&entry.hash)?.data,
            )?,
            None => CheckpointSummary {
                checkpoint_id: opts.checkpoint_id.clone(),
                strategy: opts.strategy.clone(),
                branch: opts.branch.clone(),
                checkpoints_count: 0,
                files_touched: Vec::new(),
                sessions: Vec::new(),
                token_usage: Default::default(),
            },
        };
        summary.strategy = opts.strategy.clone();
        summary.branch = opts.branch.clone();
        summary.absorb(&opts.session, session_path.clone());
        put(
            &layer,
            &mut entries,
            summary_path,
            &serde_json::to_vec_pretty(&summary)?,
        )?;

        let tree_id = layer.build_tree_from_entries(&entries)?;
        let mut trailers = Vec::new();
        if let Some(ephemeral) = &opts.ephemeral_branch {
            trailers.push((trailer::EPHEMERAL_BRANCH.to_string(), ephemeral.clone()));
        }
        trailers.push((
            trailer::ENTIRE_SESSION.to_string(),
            opts.session.session_id.clone(),
        ));
        trailers.push((trailer::ENTIRE_STRATEGY.to_string(), opts.strategy.clone()));
        trailers.push((trailer::ENTIRE_AGENT.to_string(), opts.session.agent.clone()));
        if let Some(base) = &opts.base_commit {
            trailers.push((trailer::BASE_COMMIT.to_string(), base.clone()));
        }

        let subject = opts.subject.clone().unwrap_or_else(|| {
            format!(
                "Condense session {} into {}",
                opts.session.session_id, opts.checkpoint_id
            )
        });
        let message = trailer::compose_message(&subject, None, &trailers);

        let parents = meta_tip.into_iter().collect();
        let commit = layer.create_commit(tree_id, parents, &message)?;
        layer.set_branch(META_BRANCH, &commit)?;

        Ok(CommittedWrite {
            commit,
            session_index,
            session_path,
        })
    }

    /// Read a condensed checkpoint, preferring the newest session subtree
    /// unless a specific index is requested.
    pub fn read_committed(
        &self,
        checkpoint_id: &CheckpointId,
        session_index: Option<usize>,
    ) -> Result<CommittedCheckpoint, EngineError> {
        let layer = self.layer();
        let meta_tip = layer
            .branch_tip(META_BRANCH)?
            .ok_or_else(|| EngineError::NotFound(format!("branch {META_BRANCH}")))?;
        let entries = layer.commit_tree(&meta_tip)?;

        let shard = checkpoint_id.shard_dir();
        let shard_prefix = format!("{shard}/");

        let summary_entry = entries
            .get(&format!("{shard}/{SUMMARY_FILE}"))
            .ok_or_else(|| EngineError::NotFound(format!("checkpoint {checkpoint_id}")))?;
        let summary: CheckpointSummary =
            serde_json::from_slice(&self.repo.read_blob(&summary_entry.hash)?.data)?;

        let index = match session_index {
            Some(index) => index,
            None => newest_session_index(&entries, &shard_prefix).ok_or_else(|| {
                EngineError::NotFound(format!("checkpoint {checkpoint_id} has no sessions"))
            })?,
        };
        let session_dir = format!("{shard}/{index}");

        let read_file = |name: &str| -> Result<Option<Vec<u8>>, EngineError> {
            match entries.get(&format!("{session_dir}/{name}")) {
                Some(entry) => Ok(Some(self.repo.read_blob(&entry.hash)?.data)),
                None => Ok(None),
            }
        };

        let session_bytes = read_file(SESSION_METADATA_FILE)?.ok_or_else(|| {
            EngineError::NotFound(format!("checkpoint {checkpoint_id} session {index}"))
        })?;
        let session: SessionMetadata = serde_json::from_slice(&session_bytes)?;

        let transcript = read_file(FULL_TRANSCRIPT_FILE)?.unwrap_or_default();
        let prompts = read_file(PROMPT_FILE)?
            .map(|bytes| {
                String::from_utf8_lossy(&bytes)
                    .lines()
                    .filter(|l| !l.is_empty())
                    .map(|l| l.to_string())
                    .collect()
            })
            .unwrap_or_default();
        let context = read_file(CONTEXT_FILE)?
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string());

        Ok(CommittedCheckpoint {
            summary,
            session,
            transcript,
            prompts,
            context,
        })
    }

    /// All checkpoint IDs present on the metadata branch.
    pub fn list_committed(&self) -> Result<Vec<CheckpointId>, EngineError> {
        let layer = self.layer();
        let Some(meta_tip) = layer.branch_tip(META_BRANCH)? else {
            return Ok(Vec::new());
        };
        let entries = layer.commit_tree(&meta_tip)?;

        let mut ids: Vec<CheckpointId> = Vec::new();
        for path in entries.keys() {
            let mut segments = path.split('/');
            if let (Some(first), Some(rest)) = (segments.next(), segments.next())
                && let Some(id) = CheckpointId::from_shard_segments(first, rest)
                && !ids.contains(&id)
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Store `bytes` as a blob and map `path` to it.
fn put(
    layer: &ObjectLayer,
    entries: &mut TreeMap,
    path: String,
    bytes: &[u8],
) -> Result<(), EngineError> {
    let hash = layer.write_blob(bytes)?;
    entries.insert(
        path,
        TreeEntry {
            mode: TreeItemMode::Blob,
            hash,
        },
    );
    Ok(())
}

/// Next free `<N>/` index under a shard prefix.
fn next_session_index(entries: &TreeMap, shard_prefix: &str) -> usize {
    newest_session_index(entries, shard_prefix).map_or(0, |max| max + 1)
}

/// Highest existing `<N>/` index under a shard prefix.
fn newest_session_index(entries: &TreeMap, shard_prefix: &str) -> Option<usize> {
    entries
        .keys()
        .filter_map(|key| key.strip_prefix(shard_prefix))
        .filter_map(|rest| rest.split('/').next())
        .filter_map(|segment| segment.parse::<usize>().ok())
        .max()
}
