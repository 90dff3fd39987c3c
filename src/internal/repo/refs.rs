//! Ref reading and writing against the refs directory and `packed-refs`.
//!
//! The engine only ever touches branch refs (`refs/heads/...`). Updates
//! are plain loose-ref writes via temp file + rename; the refdb itself
//! serializes concurrent writers. Worktree HEAD is never moved here.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use crate::errors::EngineError;
use crate::hash::ObjectHash;

/// Full ref name for a branch.
pub fn branch_ref(name: &str) -> String {
    format!("refs/heads/{name}")
}

/// Read a ref by full name (`refs/heads/main`), consulting loose refs
/// first and `packed-refs` second.
pub fn read_ref(common_dir: &Path, name: &str) -> Result<Option<ObjectHash>, EngineError> {
    let loose = common_dir.join(name);
    if loose.is_file() {
        let content = fs::read_to_string(&loose)?;
        let trimmed = content.trim();
        if let Some(target) = trimmed.strip_prefix("ref: ") {
            return read_ref(common_dir, target.trim());
        }
        return ObjectHash::from_str(trimmed)
            .map(Some)
            .map_err(EngineError::InvalidHashValue);
    }

    for (ref_name, hash) in packed_refs(common_dir)? {
        if ref_name == name {
            return Ok(Some(hash));
        }
    }
    Ok(None)
}

/// Point a ref at a commit, creating parent directories as needed.
pub fn write_ref(common_dir: &Path, name: &str, hash: &ObjectHash) -> Result<(), EngineError> {
    let path = common_dir.join(name);
    let parent = path
        .parent()
        .ok_or_else(|| EngineError::InvalidArgument(format!("bad ref name {name}")))?;
    fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    writeln!(tmp, "{hash}")?;
    tmp.persist(&path).map_err(|e| EngineError::Io(e.error))?;
    Ok(())
}

/// Delete a ref. Removes the loose file and, when necessary, rewrites
/// `packed-refs` without the entry.
pub fn delete_ref(common_dir: &Path, name: &str) -> Result<(), EngineError> {
    let loose = common_dir.join(name);
    let mut existed = false;
    if loose.is_file() {
        fs::remove_file(&loose)?;
        existed = true;
    }

    let packed_path = common_dir.join("packed-refs");
    if packed_path.is_file() {
        let content = fs::read_to_string(&packed_path)?;
        let mut kept = Vec::new();
        let mut dropped = false;
        let mut skip_peel = false;
        for line in content.lines() {
            if skip_peel && line.starts_with('^') {
                skip_peel = false;
                continue;
            }
            skip_peel = false;
            if let Some((_, ref_name)) = line.split_once(' ')
                && !line.starts_with('#')
                && ref_name == name
            {
                dropped = true;
                skip_peel = true;
                continue;
            }
            kept.push(line);
        }
        if dropped {
            existed = true;
            let mut tmp = tempfile::NamedTempFile::new_in(common_dir)?;
            for line in kept {
                writeln!(tmp, "{line}")?;
            }
            tmp.persist(&packed_path)
                .map_err(|e| EngineError::Io(e.error))?;
        }
    }

    if existed {
        Ok(())
    } else {
        Err(EngineError::NotFound(format!("ref {name}")))
    }
}

/// Enumerate refs under a prefix (e.g. `refs/heads/entire/`), deduplicated
/// with loose refs winning over packed entries.
pub fn list_refs(
    common_dir: &Path,
    prefix: &str,
) -> Result<Vec<(String, ObjectHash)>, EngineError> {
    let mut found: Vec<(String, ObjectHash)> = Vec::new();

    let root = common_dir.join("refs");
    if root.is_dir() {
        let mut stack = vec![root.clone()];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                let name = path
                    .strip_prefix(common_dir)
                    .map_err(|e| EngineError::Custom(e.to_string()))?
                    .to_string_lossy()
                    .replace('\\', "/");
                if !name.starts_with(prefix) {
                    continue;
                }
                if let Some(hash) = read_ref(common_dir, &name)? {
                    found.push((name, hash));
                }
            }
        }
    }

    for (name, hash) in packed_refs(common_dir)? {
        if name.starts_with(prefix) && !found.iter().any(|(n, _)| *n == name) {
            found.push((name, hash));
        }
    }

    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found)
}

/// Parse `packed-refs`, skipping comments and peeled-tag lines.
fn packed_refs(common_dir: &Path) -> Result<Vec<(String, ObjectHash)>, EngineError> {
    let path = common_dir.join("packed-refs");
    if !path.is_file() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&path)?;
    let mut refs = Vec::new();
    for line in content.lines() {
        if line.starts_with('#') || line.starts_with('^') || line.trim().is_empty() {
            continue;
        }
        if let Some((hash, name)) = line.split_once(' ')
            && let Ok(hash) = ObjectHash::from_str(hash.trim())
        {
            refs.push((name.trim().to_string(), hash));
        }
    }
    Ok(refs)
}
