//! Loose-object database I/O.
//!
//! Every object the engine writes is a plain zlib-compressed loose object
//! under `objects/<2-hex>/<rest>`; repacking is left to Git. Reads cover
//! loose objects only — the repository layer falls back to `git cat-file`
//! for objects that live in packs.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::errors::EngineError;
use crate::hash::ObjectHash;
use crate::internal::object::types::ObjectType;

/// Path of a loose object inside an `objects/` directory.
pub fn loose_path(objects_dir: &Path, hash: &ObjectHash) -> PathBuf {
    let hex = hash.to_string();
    objects_dir.join(&hex[..2]).join(&hex[2..])
}

/// True when the object exists loose.
pub fn has_loose(objects_dir: &Path, hash: &ObjectHash) -> bool {
    loose_path(objects_dir, hash).is_file()
}

/// Read and inflate a loose object, returning its type and payload.
pub fn read_loose(
    objects_dir: &Path,
    hash: &ObjectHash,
) -> Result<(ObjectType, Vec<u8>), EngineError> {
    let path = loose_path(objects_dir, hash);
    let compressed = fs::read(&path)
        .map_err(|_| EngineError::NotFound(format!("loose object {hash}")))?;

    let mut decoder = ZlibDecoder::new(compressed.as_slice());
    let mut raw = Vec::new();
    decoder.read_to_end(&mut raw)?;

    parse_header(&raw, hash)
}

/// Split `<type> <len>\0<payload>` and validate the declared length.
fn parse_header(raw: &[u8], hash: &ObjectHash) -> Result<(ObjectType, Vec<u8>), EngineError> {
    let nul = raw
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| EngineError::InvalidObjectType(format!("{hash}: missing header")))?;
    let header = std::str::from_utf8(&raw[..nul])
        .map_err(|e| EngineError::Conversion(e.to_string()))?;
    let (type_name, size) = header
        .split_once(' ')
        .ok_or_else(|| EngineError::InvalidObjectType(header.to_string()))?;

    let object_type = ObjectType::from_string(type_name)?;
    let declared: usize = size
        .parse()
        .map_err(|_| EngineError::InvalidObjectType(header.to_string()))?;

    let payload = raw[nul + 1..].to_vec();
    if payload.len() != declared {
        return Err(EngineError::InvalidObjectType(format!(
            "{hash}: size mismatch ({} != {declared})",
            payload.len()
        )));
    }
    Ok((object_type, payload))
}

/// Compress and store an object, returning its ID. Writing is atomic
/// (temp file + rename) and skipped when the object already exists —
/// content addressing makes the write idempotent.
pub fn write_loose(
    objects_dir: &Path,
    object_type: ObjectType,
    data: &[u8],
) -> Result<ObjectHash, EngineError> {
    let hash = ObjectHash::from_type_and_data(object_type, data);
    let path = loose_path(objects_dir, &hash);
    if path.is_file() {
        return Ok(hash);
    }

    let parent = path
        .parent()
        .ok_or_else(|| EngineError::Custom("object path has no parent".to_string()))?;
    fs::create_dir_all(parent)?;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(object_type.as_bytes())?;
    encoder.write_all(b" ")?;
    encoder.write_all(data.len().to_string().as_bytes())?;
    encoder.write_all(b"\x00")?;
    encoder.write_all(data)?;
    let compressed = encoder.finish()?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(&compressed)?;
    tmp.persist(&path)
        .map_err(|e| EngineError::Io(e.error))?;
    Ok(hash)
}
