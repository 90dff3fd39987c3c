//! JSONL transcript reader (Claude Code and compatible agents).
//!
//! One JSON object per newline-terminated line. Relevant shapes:
//!
//! ```json
//! {"type":"user","message":{"content":"fix the tests"}}
//! {"type":"user","message":{"content":[{"type":"text","text":"hi"}]}}
//! {"type":"assistant","message":{"usage":{"input_tokens":10,"output_tokens":5},
//!   "content":[{"type":"tool_use","name":"Edit","input":{"file_path":"src/a.rs"}}]}}
//! ```

use serde_json::Value;

use super::{TokenUsage, TranscriptReader, strip_ide_tags};

/// Tools whose invocation modifies a file, with the input key naming it.
const FILE_TOOLS: &[(&str, &str)] = &[
    ("Write", "file_path"),
    ("Edit", "file_path"),
    ("MultiEdit", "file_path"),
    ("NotebookEdit", "notebook_path"),
];

pub struct JsonlTranscript;

fn lines(content: &[u8]) -> impl Iterator<Item = &[u8]> {
    content
        .split(|&b| b == b'\n')
        .filter(|line| !line.iter().all(|b| b.is_ascii_whitespace()))
}

fn text_of(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let mut text = String::new();
            for part in parts {
                if part.get("type").and_then(Value::as_str) == Some("text")
                    && let Some(t) = part.get("text").and_then(Value::as_str)
                {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(t);
                }
            }
            (!text.is_empty()).then_some(text)
        }
        _ => None,
    }
}

impl TranscriptReader for JsonlTranscript {
    fn agent_type(&self) -> &'static str {
        "claude-code"
    }

    fn count_items(&self, content: &[u8]) -> usize {
        lines(content).count()
    }

    fn extract_user_prompts(&self, content: &[u8]) -> Vec<String> {
        let mut prompts = Vec::new();
        for line in lines(content) {
            let Ok(item) = serde_json::from_slice::<Value>(line) else {
                continue;
            };
            let item_type = item.get("type").and_then(Value::as_str);
            if !matches!(item_type, Some("user") | Some("human")) {
                continue;
            }
            let Some(raw) = item.get("message").and_then(|m| m.get("content")) else {
                continue;
            };
            if let Some(text) = text_of(raw) {
                let stripped = strip_ide_tags(&text);
                if !stripped.is_empty() {
                    prompts.push(stripped);
                }
            }
        }
        prompts
    }

    fn extract_token_usage(&self, content: &[u8], start_offset: usize) -> TokenUsage {
        let mut usage = TokenUsage::default();
        for line in lines(content).skip(start_offset) {
            let Ok(item) = serde_json::from_slice::<Value>(line) else {
                continue;
            };
            if item.get("type").and_then(Value::as_str) != Some("assistant") {
                continue;
            }
            if let Some(u) = item.get("message").and_then(|m| m.get("usage")) {
                usage.input_tokens += u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
                usage.output_tokens += u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
                usage.cached_tokens += u
                    .get("cache_read_input_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
            }
        }
        usage
    }

    fn extract_modified_files(&self, content: &[u8], start_offset: usize) -> Vec<String> {
        let mut files: Vec<String> = Vec::new();
        for line in lines(content).skip(start_offset) {
            let Ok(item) = serde_json::from_slice::<Value>(line) else {
                continue;
            };
            if item.get("type").and_then(Value::as_str) != Some("assistant") {
                continue;
            }
            let Some(parts) = item
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(Value::as_array)
            else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(Value::as_str) != Some("tool_use") {
                    continue;
                }
                let Some(name) = part.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let Some((_, key)) = FILE_TOOLS.iter().find(|(tool, _)| *tool == name) else {
                    continue;
                };
                if let Some(path) = part
                    .get("input")
                    .and_then(|i| i.get(key))
                    .and_then(Value::as_str)
                    && !files.iter().any(|f| f == path)
                {
                    files.push(path.to_string());
                }
            }
        }
        files
    }
}
