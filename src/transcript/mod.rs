//! Agent-transcript readers.
//!
//! Condensation needs four things from a live transcript: how many items
//! it holds (the watermark unit), the user prompts, token usage, and the
//! files the agent reported touching. Two formats are recognized — JSONL
//! (Claude Code and compatibles) and Gemini's single-JSON session file.
//! The watermark (`checkpoint_transcript_start`) counts *items in the
//! format's own unit*: newline-terminated records for JSONL, `messages[]`
//! entries for Gemini JSON. Every caller must therefore dispatch through
//! the same reader for one session.

pub mod claude;
pub mod gemini;

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Accumulated token usage, provider-neutral.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cached_tokens += other.cached_tokens;
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Read-only view over one transcript format.
pub trait TranscriptReader: Send + Sync {
    /// Agent type string this reader serves (`claude-code`, `gemini`).
    fn agent_type(&self) -> &'static str;

    /// Number of items in the transcript, in the format's own unit.
    fn count_items(&self, content: &[u8]) -> usize;

    /// User prompts, IDE-injected tags stripped, empty prompts dropped.
    fn extract_user_prompts(&self, content: &[u8]) -> Vec<String>;

    /// Token usage across items at and after `start_offset`.
    fn extract_token_usage(&self, content: &[u8], start_offset: usize) -> TokenUsage;

    /// Files the agent reported modifying at and after `start_offset`.
    fn extract_modified_files(&self, content: &[u8], start_offset: usize) -> Vec<String>;
}

/// Reader registry: maps an agent type to its transcript format.
/// Unknown agents get the JSONL reader, the common case.
pub fn reader_for(agent_type: &str) -> Box<dyn TranscriptReader> {
    match agent_type {
        "gemini" => Box::new(gemini::GeminiTranscript),
        _ => Box::new(claude::JsonlTranscript),
    }
}

/// Strip IDE-injected `<ide_*>…</ide_*>` tag pairs from a prompt.
pub fn strip_ide_tags(prompt: &str) -> String {
    static IDE_TAG: OnceLock<Regex> = OnceLock::new();
    let re = IDE_TAG.get_or_init(|| {
        Regex::new(r"(?s)<ide_[a-zA-Z0-9_]*>.*?</ide_[a-zA-Z0-9_]*>").unwrap()
    });
    re.replace_all(prompt, "").trim().to_string()
}
