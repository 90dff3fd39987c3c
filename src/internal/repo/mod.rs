//! Repository access: discovery, worktree layout, object and ref I/O,
//! sequencer sentinels, and the `git fetch`/`git push` sub-processes.
//!
//! The engine is hook-resident: it opens the repository the hook fired
//! in, does its work synchronously, and exits. Worktrees share one
//! common directory (objects, refs, session state); `gitdir` holds the
//! per-worktree files (HEAD, rebase/merge sentinels).

pub mod odb;
pub mod refs;

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::errors::EngineError;
use crate::hash::{HashKind, ObjectHash, set_hash_kind};
use crate::internal::object::ObjectTrait;
use crate::internal::object::blob::Blob;
use crate::internal::object::commit::Commit;
use crate::internal::object::tree::Tree;
use crate::internal::object::types::ObjectType;

/// Deadline applied to `git fetch`/`git push` sub-processes.
pub const NETWORK_DEADLINE: Duration = Duration::from_secs(120);

/// An opened Git repository (possibly a linked worktree).
#[derive(Debug, Clone)]
pub struct Repository {
    /// Root of the working tree.
    pub workdir: PathBuf,
    /// Per-worktree git directory (HEAD, sequencer state).
    pub gitdir: PathBuf,
    /// Shared git directory (objects, refs, session state).
    pub common_dir: PathBuf,
    /// Object format of this repository.
    pub hash_kind: HashKind,
}

impl Repository {
    /// Walk up from `start` to find the enclosing repository. Resolves
    /// `.git` files (linked worktrees) and the `commondir` indirection.
    pub fn discover(start: &Path) -> Result<Repository, EngineError> {
        let mut dir = start
            .canonicalize()
            .map_err(|_| EngineError::NotFound(format!("path {}", start.display())))?;

        loop {
            let dot_git = dir.join(".git");
            if dot_git.is_dir() {
                return Self::open_layout(&dir, &dot_git);
            }
            if dot_git.is_file() {
                let content = fs::read_to_string(&dot_git)?;
                let target = content
                    .trim()
                    .strip_prefix("gitdir: ")
                    .ok_or_else(|| EngineError::NotFound(".git file target".to_string()))?;
                let gitdir = if Path::new(target).is_absolute() {
                    PathBuf::from(target)
                } else {
                    dir.join(target)
                };
                let gitdir = gitdir
                    .canonicalize()
                    .map_err(|_| EngineError::NotFound(format!("gitdir {target}")))?;
                return Self::open_layout(&dir, &gitdir);
            }
            if !dir.pop() {
                return Err(EngineError::NotFound(format!(
                    "no git repository above {}",
                    start.display()
                )));
            }
        }
    }

    fn open_layout(workdir: &Path, gitdir: &Path) -> Result<Repository, EngineError> {
        let commondir_file = gitdir.join("commondir");
        let common_dir = if commondir_file.is_file() {
            let rel = fs::read_to_string(&commondir_file)?;
            let candidate = gitdir.join(rel.trim());
            candidate
                .canonicalize()
                .map_err(|_| EngineError::NotFound("commondir target".to_string()))?
        } else {
            gitdir.to_path_buf()
        };

        let repo = Repository {
            workdir: workdir.to_path_buf(),
            gitdir: gitdir.to_path_buf(),
            common_dir,
            hash_kind: HashKind::Sha1,
        };
        let kind = match repo.config_value("extensions", "objectformat").as_deref() {
            Some("sha256") => HashKind::Sha256,
            _ => HashKind::Sha1,
        };
        set_hash_kind(kind);
        Ok(Repository { hash_kind: kind, ..repo })
    }

    /// Create a fresh non-bare repository at `path` with an unborn `main`
    /// branch. Used by the integration suite to build scratch repos
    /// without shelling out.
    pub fn init(path: &Path) -> Result<Repository, EngineError> {
        let gitdir = path.join(".git");
        fs::create_dir_all(gitdir.join("objects").join("info"))?;
        fs::create_dir_all(gitdir.join("objects").join("pack"))?;
        fs::create_dir_all(gitdir.join("refs").join("heads"))?;
        fs::create_dir_all(gitdir.join("refs").join("tags"))?;
        fs::write(gitdir.join("HEAD"), "ref: refs/heads/main\n")?;
        fs::write(
            gitdir.join("config"),
            "[core]\n\trepositoryformatversion = 0\n\tfilemode = true\n\tbare = false\n",
        )?;
        Self::discover(path)
    }

    /// Canonical worktree identifier, input to the shadow branch name.
    pub fn worktree_id(&self) -> String {
        self.workdir.to_string_lossy().to_string()
    }

    /// `.entire/` directory in the worktree.
    pub fn entire_dir(&self) -> PathBuf {
        self.workdir.join(".entire")
    }

    /// Shared directory holding per-session state files.
    pub fn sessions_dir(&self) -> PathBuf {
        self.common_dir.join("entire-sessions")
    }

    fn objects_dir(&self) -> PathBuf {
        self.common_dir.join("objects")
    }

    /// A rebase or merge is underway in this worktree; post-commit
    /// processing must not run.
    pub fn rebase_or_merge_in_progress(&self) -> bool {
        self.gitdir.join("rebase-merge").exists()
            || self.gitdir.join("rebase-apply").exists()
            || self.gitdir.join("MERGE_HEAD").exists()
    }

    /// Minimal `.git/config` lookup (`[section] key = value`).
    pub fn config_value(&self, section: &str, key: &str) -> Option<String> {
        let content = fs::read_to_string(self.common_dir.join("config")).ok()?;
        let mut in_section = false;
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('[') {
                in_section = line
                    .trim_start_matches('[')
                    .trim_end_matches(']')
                    .trim()
                    .eq_ignore_ascii_case(section);
                continue;
            }
            if in_section
                && let Some((k, v)) = line.split_once('=')
                && k.trim().eq_ignore_ascii_case(key)
            {
                return Some(v.trim().to_string());
            }
        }
        None
    }

    /// Committer identity for engine-authored commits.
    pub fn identity(&self) -> (String, String) {
        let name = self
            .config_value("user", "name")
            .unwrap_or_else(|| "entire".to_string());
        let email = self
            .config_value("user", "email")
            .unwrap_or_else(|| "agent@entire.dev".to_string());
        (name, email)
    }

    // ----- objects ---------------------------------------------------

    /// Read an object by hash: loose first, `git cat-file` for packed.
    pub fn read_object(&self, hash: &ObjectHash) -> Result<(ObjectType, Vec<u8>), EngineError> {
        match odb::read_loose(&self.objects_dir(), hash) {
            Ok(found) => Ok(found),
            Err(EngineError::NotFound(_)) => self.cat_file(hash),
            Err(e) => Err(e),
        }
    }

    /// Packed-object fallback through the host `git` binary.
    fn cat_file(&self, hash: &ObjectHash) -> Result<(ObjectType, Vec<u8>), EngineError> {
        let id = hash.to_string();
        let type_out = self.run_git(&["cat-file", "-t", &id], Duration::from_secs(10))?;
        let type_name = String::from_utf8_lossy(&type_out).trim().to_string();
        if type_name.is_empty() {
            return Err(EngineError::NotFound(format!("object {hash}")));
        }
        let object_type = ObjectType::from_string(&type_name)?;
        let data = self.run_git(
            &["cat-file", object_type.as_str(), &id],
            Duration::from_secs(30),
        )?;
        Ok((object_type, data))
    }

    pub fn write_object(
        &self,
        object_type: ObjectType,
        data: &[u8],
    ) -> Result<ObjectHash, EngineError> {
        odb::write_loose(&self.objects_dir(), object_type, data)
    }

    pub fn read_commit(&self, hash: &ObjectHash) -> Result<Commit, EngineError> {
        let (object_type, data) = self.read_object(hash)?;
        if object_type != ObjectType::Commit {
            return Err(EngineError::InvalidObjectType(format!(
                "{hash} is a {object_type}, expected commit"
            )));
        }
        Commit::from_bytes(&data, *hash)
    }

    pub fn read_tree(&self, hash: &ObjectHash) -> Result<Tree, EngineError> {
        let (object_type, data) = self.read_object(hash)?;
        if object_type != ObjectType::Tree {
            return Err(EngineError::InvalidObjectType(format!(
                "{hash} is a {object_type}, expected tree"
            )));
        }
        Tree::from_bytes(&data, *hash)
    }

    pub fn read_blob(&self, hash: &ObjectHash) -> Result<Blob, EngineError> {
        let (object_type, data) = self.read_object(hash)?;
        if object_type != ObjectType::Blob {
            return Err(EngineError::InvalidObjectType(format!(
                "{hash} is a {object_type}, expected blob"
            )));
        }
        Blob::from_bytes(&data, *hash)
    }

    // ----- refs and HEAD ---------------------------------------------

    pub fn read_ref(&self, name: &str) -> Result<Option<ObjectHash>, EngineError> {
        refs::read_ref(&self.common_dir, name)
    }

    pub fn write_ref(&self, name: &str, hash: &ObjectHash) -> Result<(), EngineError> {
        refs::write_ref(&self.common_dir, name, hash)
    }

    pub fn delete_ref(&self, name: &str) -> Result<(), EngineError> {
        refs::delete_ref(&self.common_dir, name)
    }

    pub fn list_refs(&self, prefix: &str) -> Result<Vec<(String, ObjectHash)>, EngineError> {
        refs::list_refs(&self.common_dir, prefix)
    }

    /// The branch HEAD points at, or `None` when detached.
    pub fn current_branch(&self) -> Result<Option<String>, EngineError> {
        let head = fs::read_to_string(self.gitdir.join("HEAD"))?;
        Ok(head
            .trim()
            .strip_prefix("ref: refs/heads/")
            .map(|b| b.to_string()))
    }

    /// Commit HEAD resolves to, or `None` on an unborn branch.
    pub fn head(&self) -> Result<Option<ObjectHash>, EngineError> {
        let head = fs::read_to_string(self.gitdir.join("HEAD"))?;
        let trimmed = head.trim();
        if let Some(target) = trimmed.strip_prefix("ref: ") {
            return refs::read_ref(&self.common_dir, target.trim());
        }
        ObjectHash::from_str(trimmed)
            .map(Some)
            .map_err(EngineError::InvalidHashValue)
    }

    /// Read a file from the working tree.
    pub fn read_worktree_file(&self, path: &str) -> Result<Vec<u8>, EngineError> {
        fs::read(self.workdir.join(path))
            .map_err(|_| EngineError::NotFound(format!("worktree file {path}")))
    }

    /// Whether the worktree has an executable bit set for `path`.
    #[cfg(unix)]
    pub fn worktree_file_is_executable(&self, path: &str) -> bool {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(self.workdir.join(path))
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    pub fn worktree_file_is_executable(&self, _path: &str) -> bool {
        false
    }

    // ----- sub-processes ---------------------------------------------

    /// Run `git` in the worktree with a hard deadline, returning stdout.
    /// The child is killed when the deadline passes.
    pub fn run_git(&self, args: &[&str], deadline: Duration) -> Result<Vec<u8>, EngineError> {
        let mut child = Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EngineError::Network(format!("spawn git {}: {e}", args.join(" "))))?;

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_thread = std::thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf);
            }
            buf
        });
        let stderr_thread = std::thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf);
            }
            buf
        });

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child
                .try_wait()
                .map_err(|e| EngineError::Network(e.to_string()))?
            {
                break status;
            }
            if started.elapsed() > deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(EngineError::Network(format!(
                    "git {} exceeded {}s deadline",
                    args.join(" "),
                    deadline.as_secs()
                )));
            }
            std::thread::sleep(Duration::from_millis(25));
        };

        let stdout = stdout_thread.join().unwrap_or_default();
        let stderr = stderr_thread.join().unwrap_or_default();
        if !status.success() {
            return Err(EngineError::Network(format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&stderr).trim()
            )));
        }
        Ok(stdout)
    }

    /// Fetch one ref from a remote into `FETCH_HEAD`.
    pub fn fetch(&self, remote: &str, refspec: &str) -> Result<(), EngineError> {
        self.run_git(&["fetch", remote, refspec], NETWORK_DEADLINE)?;
        Ok(())
    }

    /// Resolve `FETCH_HEAD` after a fetch.
    pub fn fetch_head(&self) -> Result<ObjectHash, EngineError> {
        let content = fs::read_to_string(self.gitdir.join("FETCH_HEAD"))
            .map_err(|_| EngineError::NotFound("FETCH_HEAD".to_string()))?;
        let first = content
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().next())
            .ok_or_else(|| EngineError::NotFound("FETCH_HEAD entry".to_string()))?;
        ObjectHash::from_str(first).map_err(EngineError::InvalidHashValue)
    }

    /// Push one refspec. Returns `Ok(false)` on a non-fast-forward
    /// rejection so the caller can reconcile and retry.
    pub fn push(&self, remote: &str, refspec: &str) -> Result<bool, EngineError> {
        match self.run_git(&["push", remote, refspec], NETWORK_DEADLINE) {
            Ok(_) => Ok(true),
            Err(EngineError::Network(message))
                if message.contains("non-fast-forward")
                    || message.contains("fetch first")
                    || message.contains("[rejected]") =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_and_discover() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        assert_eq!(repo.gitdir, repo.common_dir);
        assert_eq!(repo.current_branch().unwrap().as_deref(), Some("main"));
        assert!(repo.head().unwrap().is_none());
        assert!(!repo.rebase_or_merge_in_progress());

        let nested = dir.path().join("src").join("deep");
        fs::create_dir_all(&nested).unwrap();
        let rediscovered = Repository::discover(&nested).unwrap();
        assert_eq!(rediscovered.common_dir, repo.common_dir);
    }

    #[test]
    fn test_config_value() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        fs::write(
            repo.common_dir.join("config"),
            "[core]\n\tbare = false\n[user]\n\tname = Ada\n\temail = ada@example.com\n",
        )
        .unwrap();
        assert_eq!(repo.config_value("user", "name").as_deref(), Some("Ada"));
        assert_eq!(repo.identity().1, "ada@example.com");
    }

    #[test]
    fn test_merge_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        fs::write(repo.gitdir.join("MERGE_HEAD"), "deadbeef\n").unwrap();
        assert!(repo.rebase_or_merge_in_progress());
    }
}
