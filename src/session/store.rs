//! Persistence for session state: one JSON file per session under
//! `<git-common-dir>/entire-sessions/`, written atomically
//! (temp file + rename) so readers always see a consistent snapshot.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::errors::EngineError;
use crate::internal::repo::Repository;
use crate::session::{SessionState, validate_session_id};

/// A lock held by one writer is considered abandoned after this long;
/// hook processes are short-lived.
const LOCK_STALE_AFTER: Duration = Duration::from_secs(60);

pub struct SessionStateStore {
    dir: PathBuf,
}

impl SessionStateStore {
    pub fn new(repo: &Repository) -> SessionStateStore {
        SessionStateStore {
            dir: repo.sessions_dir(),
        }
    }

    fn state_path(&self, session_id: &str) -> Result<PathBuf, EngineError> {
        validate_session_id(session_id)?;
        Ok(self.dir.join(format!("{session_id}.json")))
    }

    /// Load a session's state; `None` when it has never been saved or
    /// was cleared after condensation.
    pub fn load(&self, session_id: &str) -> Result<Option<SessionState>, EngineError> {
        let path = self.state_path(session_id)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist a session's state atomically.
    pub fn save(&self, state: &SessionState) -> Result<(), EngineError> {
        let path = self.state_path(&state.session_id)?;
        fs::create_dir_all(&self.dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&serde_json::to_vec_pretty(state)?)?;
        tmp.persist(&path).map_err(|e| EngineError::Io(e.error))?;
        Ok(())
    }

    /// Remove a session's state file. Missing files are fine.
    pub fn clear(&self, session_id: &str) -> Result<(), EngineError> {
        let path = self.state_path(session_id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// All stored session states. Unreadable files are skipped with a
    /// warning: one corrupt record must not hide the others.
    pub fn list(&self) -> Result<Vec<SessionState>, EngineError> {
        let mut states = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(states),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path).map_err(EngineError::from).and_then(|bytes| {
                serde_json::from_slice::<SessionState>(&bytes).map_err(EngineError::from)
            }) {
                Ok(state) => states.push(state),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable session state"),
            }
        }
        states.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        Ok(states)
    }

    /// Serialize shadow-branch writers for one session. The lock file
    /// sits next to the state file; a stale lock (older than 60 s) is
    /// broken, since writers are short-lived hook processes.
    pub fn lock(&self, session_id: &str) -> Result<SessionLock, EngineError> {
        let path = self.state_path(session_id)?.with_extension("lock");
        fs::create_dir_all(&self.dir)?;

        for _ in 0..50 {
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(SessionLock { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let stale = fs::metadata(&path)
                        .and_then(|m| m.modified())
                        .ok()
                        .and_then(|t| t.elapsed().ok())
                        .is_some_and(|age| age > LOCK_STALE_AFTER);
                    if stale {
                        warn!(path = %path.display(), "breaking stale session lock");
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::Custom(format!(
            "could not acquire lock for session {session_id}"
        )))
    }
}

/// Guard for the per-session lock file; releases on drop.
pub struct SessionLock {
    path: PathBuf,
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
