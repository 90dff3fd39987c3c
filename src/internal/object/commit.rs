//! The Commit object ties a tree snapshot to its history. The engine
//! creates three kinds of commits, distinguished only by their trailers:
//!
//! - shadow commits: one working-tree snapshot per agent checkpoint,
//!   chained on an ephemeral `entire/<base7>-<wt6>` branch;
//! - metadata commits: append a sharded checkpoint subtree to the
//!   permanent sessions branch (orphan history);
//! - auto-commit turn commits: real commits on the user's working branch
//!   carrying an `Entire-Checkpoint` trailer.

use std::fmt::Display;
use std::str::FromStr;

use bstr::ByteSlice;

use crate::errors::EngineError;
use crate::hash::ObjectHash;
use crate::internal::object::ObjectTrait;
use crate::internal::object::signature::Signature;
use crate::internal::object::trailer;
use crate::internal::object::types::ObjectType;

/// A commit object: tree pointer, parent chain, signatures and message.
#[derive(Eq, Debug, Clone)]
pub struct Commit {
    pub id: ObjectHash,
    pub tree_id: ObjectHash,
    pub parent_commit_ids: Vec<ObjectHash>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

impl PartialEq for Commit {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Commit {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "tree: {}", self.tree_id)?;
        for parent in self.parent_commit_ids.iter() {
            writeln!(f, "parent: {parent}")?;
        }
        writeln!(f, "author {}", self.author)?;
        writeln!(f, "committer {}", self.committer)?;
        writeln!(f, "{}", self.message)
    }
}

impl Commit {
    pub fn new(
        author: Signature,
        committer: Signature,
        tree_id: ObjectHash,
        parent_commit_ids: Vec<ObjectHash>,
        message: &str,
    ) -> Result<Commit, EngineError> {
        let mut commit = Commit {
            id: ObjectHash::default(),
            tree_id,
            parent_commit_ids,
            author,
            committer,
            message: message.to_string(),
        };
        commit.id = ObjectHash::from_type_and_data(ObjectType::Commit, &commit.to_data()?);
        Ok(commit)
    }

    /// Subject line of the commit message.
    pub fn subject(&self) -> String {
        self.message
            .lines()
            .find(|line| !line.trim().is_empty())
            .map(|line| line.to_owned())
            .unwrap_or_default()
    }

    /// All values of a message trailer, e.g. every `Entire-Session`.
    pub fn trailer_values(&self, key: &str) -> Vec<String> {
        trailer::trailer_values(&self.message, key)
    }

    /// First value of a message trailer, if present.
    pub fn trailer(&self, key: &str) -> Option<String> {
        trailer::first_trailer(&self.message, key)
    }
}

impl ObjectTrait for Commit {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, EngineError> {
        let mut rest = data;

        // tree line
        let tree_end = rest.find_byte(0x0a).ok_or(EngineError::InvalidCommitObject)?;
        if !rest.starts_with(b"tree ") {
            return Err(EngineError::InvalidCommitObject);
        }
        let tree_id = ObjectHash::from_str(
            rest[5..tree_end]
                .to_str()
                .map_err(|_| EngineError::InvalidCommitObject)?,
        )
        .map_err(EngineError::InvalidHashValue)?;
        rest = &rest[tree_end + 1..];

        // parent lines
        let mut parent_commit_ids = Vec::new();
        while rest.starts_with(b"parent ") {
            let line_end = rest.find_byte(0x0a).ok_or(EngineError::InvalidCommitObject)?;
            let parent = ObjectHash::from_str(
                rest[7..line_end]
                    .to_str()
                    .map_err(|_| EngineError::InvalidCommitObject)?,
            )
            .map_err(EngineError::InvalidHashValue)?;
            parent_commit_ids.push(parent);
            rest = &rest[line_end + 1..];
        }

        // author and committer lines
        let author_end = rest.find_byte(0x0a).ok_or(EngineError::InvalidCommitObject)?;
        let author = Signature::from_data(rest[..author_end].to_vec())?;
        rest = &rest[author_end + 1..];

        let committer_end = rest.find_byte(0x0a).ok_or(EngineError::InvalidCommitObject)?;
        let committer = Signature::from_data(rest[..committer_end].to_vec())?;
        rest = &rest[committer_end + 1..];

        // Anything between the committer line and the blank separator
        // (gpgsig, encoding headers) is folded into the message verbatim.
        let message = rest
            .to_str()
            .map_err(|e| EngineError::Conversion(e.to_string()))?
            .trim_start_matches('\n')
            .to_string();

        Ok(Commit {
            id: hash,
            tree_id,
            parent_commit_ids,
            author,
            committer,
            message,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Commit
    }

    fn to_data(&self) -> Result<Vec<u8>, EngineError> {
        let mut data = Vec::new();

        data.extend(b"tree ");
        data.extend(self.tree_id.to_string().as_bytes());
        data.push(0x0a);

        for parent in &self.parent_commit_ids {
            data.extend(b"parent ");
            data.extend(parent.to_string().as_bytes());
            data.push(0x0a);
        }

        data.extend(self.author.to_data()?);
        data.push(0x0a);
        data.extend(self.committer.to_data()?);
        data.push(0x0a);
        data.push(0x0a);
        data.extend(self.message.as_bytes());

        Ok(data)
    }
}
