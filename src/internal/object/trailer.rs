//! Commit-message trailers.
//!
//! The engine records structured key/value pairs as trailers — one per
//! line in the final paragraph of a commit message. Trailers survive
//! `git commit --amend` and rebases because they live in the message
//! body, not in refs or notes. Parsing follows `git interpret-trailers`
//! closely enough for the keys the engine owns: the trailer block is the
//! trailing run of `Key: value` lines.

/// Links a working-branch commit to its condensed checkpoint.
pub const ENTIRE_CHECKPOINT: &str = "Entire-Checkpoint";
/// On metadata-branch commits, the shadow branch the data came from.
pub const EPHEMERAL_BRANCH: &str = "Ephemeral-branch";
/// Session ID; may appear multiple times for multi-session condensations.
pub const ENTIRE_SESSION: &str = "Entire-Session";
/// Capture strategy (`manual-commit` / `auto-commit`).
pub const ENTIRE_STRATEGY: &str = "Entire-Strategy";
/// Single-line JSON payload with per-step checkpoint metadata.
pub const ENTIRE_METADATA: &str = "Entire-Metadata";
/// Single-line JSON payload describing a task-checkpoint.
pub const ENTIRE_METADATA_TASK: &str = "Entire-Metadata-Task";
/// Base commit a shadow chain grew from.
pub const BASE_COMMIT: &str = "Base-Commit";
/// Agent type that produced the session (`claude-code`, `gemini`).
pub const ENTIRE_AGENT: &str = "Entire-Agent";

/// True when the line has the `Key: value` shape of a trailer.
fn is_trailer_line(line: &str) -> bool {
    match line.split_once(": ") {
        Some((key, _)) => {
            !key.is_empty()
                && key
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        }
        None => false,
    }
}

/// Parse the trailer block of a commit message into ordered pairs.
///
/// Returns the trailing run of trailer-shaped lines. An empty vec means
/// the message carries no trailers.
pub fn parse_trailers(message: &str) -> Vec<(String, String)> {
    let lines: Vec<&str> = message.lines().collect();

    // Walk backwards over the trailer-shaped suffix, stopping at the
    // first blank or non-trailer line.
    let mut start = lines.len();
    for (idx, line) in lines.iter().enumerate().rev() {
        if line.trim().is_empty() {
            break;
        }
        if is_trailer_line(line) {
            start = idx;
        } else {
            break;
        }
    }

    // The subject line alone is never a trailer block.
    if start == 0 && lines.len() == 1 {
        return Vec::new();
    }

    lines[start.min(lines.len())..]
        .iter()
        .filter_map(|line| line.split_once(": "))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// All values recorded for `key`, in message order.
pub fn trailer_values(message: &str, key: &str) -> Vec<String> {
    parse_trailers(message)
        .into_iter()
        .filter(|(k, _)| k == key)
        .map(|(_, v)| v)
        .collect()
}

/// First value recorded for `key`, if any.
pub fn first_trailer(message: &str, key: &str) -> Option<String> {
    trailer_values(message, key).into_iter().next()
}

/// Compose a commit message from a subject, optional body paragraphs and
/// a trailer block. Values must be single-line.
pub fn compose_message(
    subject: &str,
    body: Option<&str>,
    trailers: &[(String, String)],
) -> String {
    let mut message = String::from(subject.trim_end());
    message.push('\n');

    if let Some(body) = body {
        message.push('\n');
        message.push_str(body.trim_end());
        message.push('\n');
    }

    if !trailers.is_empty() {
        message.push('\n');
        for (key, value) in trailers {
            message.push_str(key);
            message.push_str(": ");
            message.push_str(value);
            message.push('\n');
        }
    }

    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_and_parse() {
        let message = compose_message(
            "Condense session into a1b2c3d4e5f6",
            None,
            &[
                (EPHEMERAL_BRANCH.to_string(), "entire/1234567-abcdef".to_string()),
                (ENTIRE_SESSION.to_string(), "2025-08-01-abc".to_string()),
                (ENTIRE_SESSION.to_string(), "2025-08-01-def".to_string()),
                (ENTIRE_STRATEGY.to_string(), "manual-commit".to_string()),
            ],
        );

        assert_eq!(
            first_trailer(&message, EPHEMERAL_BRANCH).as_deref(),
            Some("entire/1234567-abcdef")
        );
        assert_eq!(
            trailer_values(&message, ENTIRE_SESSION),
            vec!["2025-08-01-abc", "2025-08-01-def"]
        );
    }

    #[test]
    fn test_body_lines_are_not_trailers() {
        let message = "Fix parser\n\nThe ratio was 1: 2 in the old code.\n\nEntire-Checkpoint: a1b2c3d4e5f6\n";
        let trailers = parse_trailers(message);
        assert_eq!(trailers.len(), 1);
        assert_eq!(trailers[0].0, ENTIRE_CHECKPOINT);
    }

    #[test]
    fn test_subject_only_message() {
        assert!(parse_trailers("Initial commit\n").is_empty());
        // A subject that merely looks like a trailer is not one.
        assert!(parse_trailers("fixup: handle empty input").is_empty());
    }

    #[test]
    fn test_json_payload_value() {
        let payload = r#"{"tool_use_id":"toolu_01","is_incremental":true}"#;
        let message = compose_message(
            "entire: checkpoint",
            None,
            &[(ENTIRE_METADATA_TASK.to_string(), payload.to_string())],
        );
        assert_eq!(
            first_trailer(&message, ENTIRE_METADATA_TASK).as_deref(),
            Some(payload)
        );
    }
}
