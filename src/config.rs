//! Engine settings, loaded from `.entire/settings.json` in the worktree.
//! Every key is opt-in; a missing file yields the defaults.

use std::fs;

use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::internal::repo::Repository;

/// Capture strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StrategyName {
    #[default]
    #[serde(rename = "manual-commit")]
    ManualCommit,
    #[serde(rename = "auto-commit")]
    AutoCommit,
}

impl StrategyName {
    pub const fn as_str(&self) -> &'static str {
        match self {
            StrategyName::ManualCommit => "manual-commit",
            StrategyName::AutoCommit => "auto-commit",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub strategy: StrategyName,
    pub strategy_options: StrategyOptions,
    pub cleanup: CleanupSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyOptions {
    /// Push the sessions branch alongside the user's own pushes.
    pub push_sessions: bool,
    pub summarize: SummarizeOptions,
}

impl Default for StrategyOptions {
    fn default() -> Self {
        StrategyOptions {
            push_sessions: true,
            summarize: SummarizeOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizeOptions {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupSettings {
    /// Minutes before a stale session file becomes an orphan candidate.
    pub grace_period_minutes: u64,
    /// Commits walked per branch when hunting checkpoint references.
    pub max_walk_depth: usize,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        CleanupSettings {
            grace_period_minutes: 10,
            max_walk_depth: 1000,
        }
    }
}

impl Settings {
    /// Load settings from the repository, falling back to defaults when
    /// the file is absent. A malformed file is an error: silently
    /// ignoring it would flip the user onto a different strategy.
    pub fn load(repo: &Repository) -> Result<Settings, EngineError> {
        let path = repo.entire_dir().join("settings.json");
        match fs::read(&path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.strategy, StrategyName::ManualCommit);
        assert!(settings.strategy_options.push_sessions);
        assert!(!settings.strategy_options.summarize.enabled);
        assert_eq!(settings.cleanup.grace_period_minutes, 10);
        assert_eq!(settings.cleanup.max_walk_depth, 1000);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: Settings = serde_json::from_str(
            r#"{"strategy":"auto-commit","strategy_options":{"push_sessions":false}}"#,
        )
        .unwrap();
        assert_eq!(parsed.strategy, StrategyName::AutoCommit);
        assert!(!parsed.strategy_options.push_sessions);
        assert_eq!(parsed.cleanup.max_walk_depth, 1000);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let settings = Settings::load(&repo).unwrap();
        assert_eq!(settings.strategy, StrategyName::ManualCommit);
    }
}
