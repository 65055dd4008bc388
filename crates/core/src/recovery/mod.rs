//! Recovery of a JSON object from LLM output.
//!
//! Model output may be clean JSON, wrapped in a code fence, embedded in
//! commentary, or cut off mid-structure by a length limit. [`recover_json`]
//! tries, in order:
//!
//! 1. fence stripping followed by a direct parse;
//! 2. truncation repair (only when the generation hit its length limit);
//! 3. balanced-brace extraction of the first embedded object that parses.
//!
//! Every step only accepts text that `serde_json` parses into an object, so
//! invalid JSON is never returned. When all steps fail the caller receives a
//! [`RecoveryFailure`] carrying the raw text and the stop reason.

mod scanner;

use serde_json::Value;

use scanner::{matching_brace, scan};

/// Stop reasons that mean the generation hit its output length limit.
const LENGTH_LIMIT_STOP_REASONS: &[&str] = &["max_tokens", "length"];

/// No recovery step produced a JSON object.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "No JSON object could be recovered from {len} chars of model output (stop reason: {reason})",
    len = .raw.len(),
    reason = .stop_reason.as_deref().unwrap_or("none")
)]
pub struct RecoveryFailure {
    /// The unmodified model output.
    pub raw: String,
    /// The upstream stop reason, if one was reported.
    pub stop_reason: Option<String>,
}

impl RecoveryFailure {
    /// Whether the failed generation was length-limited.
    pub fn was_truncated(&self) -> bool {
        is_length_limited(self.stop_reason.as_deref())
    }
}

/// Whether `stop_reason` indicates a length-limited generation.
pub fn is_length_limited(stop_reason: Option<&str>) -> bool {
    stop_reason.is_some_and(|reason| LENGTH_LIMIT_STOP_REASONS.contains(&reason))
}

/// Recover a single JSON object from model output.
pub fn recover_json(text: &str, stop_reason: Option<&str>) -> Result<Value, RecoveryFailure> {
    let stripped = strip_code_fences(text);

    if let Some(value) = parse_object(stripped) {
        return Ok(value);
    }

    if is_length_limited(stop_reason) {
        if let Some(value) = repair_truncated(stripped) {
            return Ok(value);
        }
    }

    if let Some(value) = extract_balanced_object(stripped) {
        return Ok(value);
    }

    Err(RecoveryFailure {
        raw: text.to_string(),
        stop_reason: stop_reason.map(str::to_string),
    })
}

// ---------------------------------------------------------------------------
// Step 1: fence stripping
// ---------------------------------------------------------------------------

/// Remove a wrapping Markdown code fence (with optional language tag).
///
/// Text without a fence is returned trimmed. A missing closing fence (as in
/// truncated output) is tolerated.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();

    let body = match trimmed.strip_prefix("```") {
        Some(rest) => match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
        },
        None => trimmed,
    };

    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

// ---------------------------------------------------------------------------
// Step 2: truncation repair
// ---------------------------------------------------------------------------

/// Repair JSON cut off by a length limit.
///
/// Candidate prefixes, from least to most aggressive:
///
/// - (a) the text unchanged;
/// - (b) the text with a trailing unterminated string removed;
/// - (c) the text with its trailing incomplete member removed;
/// - (d) the text cut just after its last structural `}` or `]`.
///
/// Each candidate that does not end inside a string is closed by appending
/// its unclosed closers in reverse-open order, then parsed. The first one
/// that parses into an object wins.
pub fn repair_truncated(text: &str) -> Option<Value> {
    truncation_candidates(text)
        .into_iter()
        .find_map(close_and_parse)
}

fn truncation_candidates(text: &str) -> Vec<&str> {
    let mut candidates = vec![text];
    let full = scan(text);

    // (b) Cut at the opening quote of a trailing unterminated string.
    let without_string = full
        .open_string_at
        .map(|start| text[..start].trim_end());
    if let Some(candidate) = without_string {
        candidates.push(candidate);
    }

    // (c) Drop the trailing member of the innermost open container: cut
    // before its last comma, or just after its opening brace/bracket.
    let base = without_string.unwrap_or(text);
    if let Some((at, boundary)) = scan(base).last_boundary() {
        let candidate = match boundary {
            b',' => &base[..at],
            _ => &base[..=at],
        };
        candidates.push(candidate.trim_end());
    }

    // (d) Cut after the last structural closer.
    if let Some(at) = full.last_close {
        candidates.push(&text[..=at]);
    }

    candidates.dedup();
    candidates
}

fn close_and_parse(candidate: &str) -> Option<Value> {
    let scanned = scan(candidate);
    if scanned.ends_in_string() {
        // No clean cut point.
        return None;
    }
    let mut closed = String::with_capacity(candidate.len() + scanned.closers.len());
    closed.push_str(candidate);
    closed.push_str(&scanned.closing_suffix());
    parse_object(&closed)
}

// ---------------------------------------------------------------------------
// Step 3: balanced-brace extraction
// ---------------------------------------------------------------------------

/// Find the first embedded, balanced `{ ... }` span that parses as an
/// object.
///
/// Every `{` is tried as a start position, so stray braces in surrounding
/// commentary only cost a failed parse rather than a mis-sized capture.
pub fn extract_balanced_object(text: &str) -> Option<Value> {
    text.bytes()
        .enumerate()
        .filter(|&(_, b)| b == b'{')
        .find_map(|(start, _)| {
            let end = matching_brace(text, start)?;
            parse_object(&text[start..=end])
        })
}

fn parse_object(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
