//! Shared fixtures for the integration suite: scratch repositories built
//! through the crate's own plumbing (no `git` binary required), plus
//! helpers for seeding commits, sessions, and transcripts.

use std::fs;
use std::path::PathBuf;

use entire_core::hash::ObjectHash;
use entire_core::internal::object::tree::TreeItemMode;
use entire_core::internal::repo::Repository;
use entire_core::objects::{ObjectLayer, TreeEntry, TreeMap};
use entire_core::session::store::SessionStateStore;
use entire_core::session::{Phase, SessionState};

pub struct Scratch {
    pub repo: Repository,
    // Held for its Drop; the tempdir outlives the repository handle.
    _dir: tempfile::TempDir,
}

impl Scratch {
    pub fn new() -> Scratch {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        Scratch { repo, _dir: dir }
    }

    /// Write files into the worktree and commit them on `main`, layered
    /// over the parent's tree. Returns the commit hash.
    pub fn commit_files(
        &self,
        files: &[(&str, &str)],
        parent: Option<ObjectHash>,
        message: &str,
    ) -> ObjectHash {
        let layer = ObjectLayer::new(&self.repo);
        let mut entries = match &parent {
            Some(parent) => layer.commit_tree(parent).unwrap(),
            None => TreeMap::new(),
        };
        for (path, content) in files {
            let full = self.repo.workdir.join(path);
            if let Some(dir) = full.parent() {
                fs::create_dir_all(dir).unwrap();
            }
            fs::write(&full, content).unwrap();
            entries.insert(
                path.to_string(),
                TreeEntry {
                    mode: TreeItemMode::Blob,
                    hash: layer.write_blob(content.as_bytes()).unwrap(),
                },
            );
        }
        let tree = layer.build_tree_from_entries(&entries).unwrap();
        let commit = layer
            .create_commit(tree, parent.into_iter().collect(), message)
            .unwrap();
        layer.set_branch("main", &commit).unwrap();
        commit
    }

    /// Write a JSONL transcript with one user prompt per entry and
    /// return its path.
    pub fn write_transcript(&self, name: &str, prompts: &[&str]) -> PathBuf {
        let path = self.repo.workdir.join(".entire").join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut content = String::new();
        for prompt in prompts {
            content.push_str(&format!(
                "{{\"type\":\"user\",\"message\":{{\"content\":\"{prompt}\"}}}}\n"
            ));
        }
        fs::write(&path, content).unwrap();
        path
    }

    /// Create and persist a session rooted at `base`.
    pub fn seed_session(
        &self,
        session_id: &str,
        base: &ObjectHash,
        transcript: &PathBuf,
        phase: Phase,
        files_touched: &[&str],
    ) -> SessionState {
        let mut state = SessionState::new(
            session_id,
            &base.to_string(),
            &self.repo.workdir.to_string_lossy(),
            &self.repo.worktree_id(),
            "claude-code",
            &transcript.to_string_lossy(),
        )
        .unwrap();
        state.phase = phase;
        if !files_touched.is_empty() {
            state.touch_files(
                &files_touched
                    .iter()
                    .map(|f| f.to_string())
                    .collect::<Vec<_>>(),
            );
            state.step_count = files_touched.len() as u32;
        }
        SessionStateStore::new(&self.repo).save(&state).unwrap();
        state
    }
}
