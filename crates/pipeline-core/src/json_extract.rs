//! Tolerant JSON recovery from model output.
//!
//! Three-stage pipeline: strip code fences, walk a balanced brace/bracket
//! span respecting string escaping, parse (retrying once after a cheap
//! textual repair). Never guesses semantics past that — a span that still
//! fails to parse after repair is [`crate::error::Error::MalformedModelOutput`].

use crate::error::{Error, Result};
use serde_json::Value;

const PREVIEW_LEN: usize = 160;

pub fn extract_json(raw: &str) -> Result<Value> {
    let stripped = strip_code_fences(raw);
    let span = balanced_span(&stripped).ok_or_else(|| malformed(&stripped))?;

    match serde_json::from_str(span) {
        Ok(value) => Ok(value),
        Err(_) => {
            let repaired = repair(span);
            serde_json::from_str(&repaired).map_err(|_| malformed(&stripped))
        }
    }
}

/// Convenience wrapper for the common "planner/scorer returns a list, but
/// wrapped one extra level" shape: unwraps exactly one nested list.
pub fn extract_json_array(raw: &str) -> Result<Vec<Value>> {
    let value = extract_json(raw)?;
    match value {
        Value::Array(items) => {
            if items.len() == 1 {
                if let Some(Value::Array(inner)) = items.first() {
                    return Ok(inner.clone());
                }
            }
            Ok(items)
        }
        other => Ok(vec![other]),
    }
}

fn malformed(preview_source: &str) -> Error {
    let preview: String = preview_source.chars().take(PREVIEW_LEN).collect();
    Error::MalformedModelOutput { preview }
}

fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        // Skip an optional language tag up to the first newline.
        let body = match rest.find('\n') {
            Some(idx) => &rest[idx + 1..],
            None => rest,
        };
        body.strip_suffix("```").unwrap_or(body).trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Locates the first top-level `{` or `[` and walks brace/bracket depth,
/// respecting string escaping, to find the matching balanced span.
fn balanced_span(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = bytes.iter().position(|b| *b == b'{' || *b == b'[')?;
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return std::str::from_utf8(&bytes[start..=i]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// One-shot repair: normalize smart quotes to plain quotes and drop
/// trailing commas before a closing brace/bracket.
fn repair(span: &str) -> String {
    let quoted = span.replace(['\u{201c}', '\u{201d}'], "\"").replace(['\u{2018}', '\u{2019}'], "'");
    let mut out = String::with_capacity(quoted.len());
    let chars: Vec<char> = quoted.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_fence_and_parses_object() {
        let raw = "```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json(raw).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn extracts_first_balanced_span_ignoring_prefix_text() {
        let raw = "Here is the plan:\n{\"subtasks\": [1, 2]}\nThanks!";
        assert_eq!(extract_json(raw).unwrap(), json!({"subtasks": [1, 2]}));
    }

    #[test]
    fn respects_braces_inside_strings() {
        let raw = r#"{"note": "use {curly} in prose"}"#;
        assert_eq!(
            extract_json(raw).unwrap(),
            json!({"note": "use {curly} in prose"})
        );
    }

    #[test]
    fn repairs_trailing_comma() {
        let raw = r#"{"a": 1, "b": 2,}"#;
        assert_eq!(extract_json(raw).unwrap(), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn unrecoverable_input_is_malformed_model_output() {
        let err = extract_json("not json at all").unwrap_err();
        assert_eq!(err.kind(), "MalformedModelOutput");
    }

    #[test]
    fn array_unwraps_single_nested_list() {
        let raw = "[[{\"id\": 1}, {\"id\": 2}]]";
        let items = extract_json_array(raw).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn array_leaves_flat_list_alone() {
        let raw = "[{\"id\": 1}, {\"id\": 2}]";
        let items = extract_json_array(raw).unwrap();
        assert_eq!(items.len(), 2);
    }
}
