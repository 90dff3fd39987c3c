//! entire-core is the checkpoint engine for AI coding-agent sessions:
//! it records, per prompt/response cycle, what an agent changed in a Git
//! repository — without polluting the main line of history.
//!
//! Three coupled structures back every session:
//!
//! - ephemeral **shadow branches** (`entire/<base7>-<wt6>`) holding full
//!   working-tree snapshots per agent checkpoint;
//! - the permanent **metadata branch** (`entire/sessions`) with a
//!   sharded tree of condensed checkpoints (transcripts, prompts, token
//!   accounting, line-level attribution);
//! - per-session **state files** under the Git common directory.
//!
//! Capture runs under one of two strategies: `manual-commit` (shadow
//! accumulation, condensed when the user commits) and `auto-commit`
//! (one real commit per agent turn, linked by an `Entire-Checkpoint`
//! trailer). The library is invoked from short-lived hook processes and
//! is fully synchronous; the only sub-processes are `git fetch` and
//! `git push`.

pub mod attribution;
pub mod checkpoint;
pub mod cleanup;
pub mod condense;
pub mod config;
pub mod diff;
pub mod errors;
pub mod hash;
pub mod internal;
pub mod objects;
pub mod session;
pub mod strategy;
pub mod sync;
pub mod transcript;
pub mod utils;
