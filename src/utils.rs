//! Shared helpers: tracing setup for hook binaries and the small pieces
//! of on-disk state under `.entire/`.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

use crate::errors::EngineError;
use crate::internal::repo::Repository;
use crate::session::validate_session_id;

/// Initialize tracing for a hook process. Diagnostics go to stderr so
/// hook stdout stays clean for Git; `ENTIRE_LOG` selects the filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("ENTIRE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Path of the live transcript mirror for a session.
pub fn transcript_mirror_path(repo: &Repository, session_id: &str) -> PathBuf {
    repo.entire_dir()
        .join("metadata")
        .join(session_id)
        .join("full.jsonl")
}

/// Read `.entire/current_session`, the ID of the session in flight.
pub fn read_current_session(repo: &Repository) -> Result<Option<String>, EngineError> {
    let path = repo.entire_dir().join("current_session");
    match fs::read_to_string(&path) {
        Ok(content) => {
            let id = content.trim().to_string();
            if id.is_empty() {
                Ok(None)
            } else {
                validate_session_id(&id)?;
                Ok(Some(id))
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Record the current session ID, atomically.
pub fn write_current_session(repo: &Repository, session_id: &str) -> Result<(), EngineError> {
    validate_session_id(session_id)?;
    let dir = repo.entire_dir();
    fs::create_dir_all(&dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    writeln!(tmp, "{session_id}")?;
    tmp.persist(dir.join("current_session"))
        .map_err(|e| EngineError::Io(e.error))?;
    Ok(())
}
