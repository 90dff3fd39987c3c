//! Gemini JSON transcript reader.
//!
//! The whole session lives in one JSON document:
//!
//! ```json
//! {"sessionId":"abc","messages":[
//!   {"type":"user","content":"fix the loop"},
//!   {"type":"gemini","content":"done","tokens":{"input":12,"output":4,"cached":0}}
//! ]}
//! ```
//!
//! The transcript watermark counts `messages[]` entries, not lines.

use serde::Deserialize;

use super::{TokenUsage, TranscriptReader, strip_ide_tags};

#[derive(Debug, Default, Deserialize)]
struct SessionFile {
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    tokens: Option<Tokens>,
}

#[derive(Debug, Deserialize)]
struct Tokens {
    #[serde(default)]
    input: u64,
    #[serde(default)]
    output: u64,
    #[serde(default)]
    cached: u64,
}

pub struct GeminiTranscript;

fn parse(content: &[u8]) -> SessionFile {
    serde_json::from_slice(content).unwrap_or_default()
}

impl TranscriptReader for GeminiTranscript {
    fn agent_type(&self) -> &'static str {
        "gemini"
    }

    fn count_items(&self, content: &[u8]) -> usize {
        parse(content).messages.len()
    }

    fn extract_user_prompts(&self, content: &[u8]) -> Vec<String> {
        parse(content)
            .messages
            .iter()
            .filter(|m| m.message_type == "user")
            .map(|m| strip_ide_tags(&m.content))
            .filter(|prompt| !prompt.is_empty())
            .collect()
    }

    fn extract_token_usage(&self, content: &[u8], start_offset: usize) -> TokenUsage {
        let mut usage = TokenUsage::default();
        for message in parse(content).messages.iter().skip(start_offset) {
            if let Some(tokens) = &message.tokens {
                usage.input_tokens += tokens.input;
                usage.output_tokens += tokens.output;
                usage.cached_tokens += tokens.cached;
            }
        }
        usage
    }

    /// The Gemini session file does not record per-tool file paths, so
    /// modified files come solely from the session's own tracking.
    fn extract_modified_files(&self, _content: &[u8], _start_offset: usize) -> Vec<String> {
        Vec::new()
    }
}
