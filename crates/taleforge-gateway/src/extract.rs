//! Structured-output recovery from raw model text.
//!
//! Models wrap JSON in reasoning blocks, markdown fences, and prose, and
//! frequently leave trailing commas. [`extract_json_object`] tries a fixed
//! sequence of recovery strategies and returns the first JSON object that
//! parses.

use serde_json::Value;

/// Opening tag of a reasoning block.
const THINK_OPEN: &str = "<think>";
/// Closing tag of a reasoning block.
const THINK_CLOSE: &str = "</think>";

/// Remove `<think>...</think>` reasoning blocks.
///
/// An unterminated block swallows the rest of the text, matching how
/// reasoning models emit a truncated thought.
pub fn strip_think_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find(THINK_OPEN) {
        out.push_str(rest.get(..open).unwrap_or_default());
        let after_open = rest.get(open.saturating_add(THINK_OPEN.len())..).unwrap_or_default();
        match after_open.find(THINK_CLOSE) {
            Some(close) => {
                rest = after_open
                    .get(close.saturating_add(THINK_CLOSE.len())..)
                    .unwrap_or_default();
            }
            None => {
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out.trim().to_owned()
}

/// Recover a JSON object from model output.
///
/// Strategies, in order:
/// 1. Strip reasoning blocks and parse directly
/// 2. Extract the body of a markdown code fence
/// 3. Take the span from the first `{` to the last `}`
/// 4. Scan for balanced top-level `{...}` spans, largest first
/// 5. Repeat 1-4 after stripping trailing commas
///
/// Returns `None` when no strategy yields an object.
pub fn extract_json_object(raw: &str) -> Option<serde_json::Map<String, Value>> {
    let cleaned = strip_think_blocks(raw);
    find_object(&cleaned).or_else(|| find_object(&strip_trailing_commas(&cleaned)))
}

/// Run the span strategies against one text.
fn find_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    let trimmed = text.trim();

    if let Some(object) = parse_object(trimmed) {
        return Some(object);
    }

    if let Some(object) = extract_codeblock(trimmed).and_then(parse_object) {
        return Some(object);
    }

    if let Some(object) = outer_braces(trimmed).and_then(parse_object) {
        return Some(object);
    }

    let mut spans = balanced_spans(trimmed);
    spans.sort_by_key(|span| core::cmp::Reverse(span.len()));
    spans.into_iter().find_map(parse_object)
}

/// Parse text as a JSON object, rejecting other JSON values.
fn parse_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Body of the first markdown code fence (```json or bare ```).
fn extract_codeblock(text: &str) -> Option<&str> {
    let fence = text.find("```")?;
    let after_tag = text.get(fence.saturating_add(3)..)?;
    let body_start = after_tag.find('\n').map_or(0, |nl| nl.saturating_add(1));
    let body = after_tag.get(body_start..)?;
    let end = body.find("```")?;
    body.get(..end).map(str::trim)
}

/// Span from the first `{` to the last `}` inclusive.
fn outer_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    text.get(start..=end)
}

/// Every balanced top-level `{...}` span, honouring string literals.
fn balanced_spans(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth: usize = 0;
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = idx;
                }
                depth = depth.saturating_add(1);
            }
            '}' if depth > 0 => {
                depth = depth.saturating_sub(1);
                if depth == 0
                    && let Some(span) = text.get(start..=idx)
                {
                    spans.push(span);
                }
            }
            _ => {}
        }
    }
    spans
}

/// Strip trailing commas before closing braces and brackets.
fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut result = String::with_capacity(text.len());

    for (i, c) in chars.iter().enumerate() {
        if *c == ',' {
            let next = chars
                .iter()
                .skip(i.saturating_add(1))
                .find(|n| !n.is_whitespace());
            if matches!(next, Some('}' | ']')) {
                continue;
            }
        }
        result.push(*c);
    }
    result
}

/// Read an integer score from a JSON field, tolerating strings and floats.
///
/// Values are clamped to `0..=100`.
pub fn read_score(object: &serde_json::Map<String, Value>, key: &str) -> Option<u8> {
    let value = object.get(key)?;
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    }?;
    if !number.is_finite() {
        return None;
    }
    let clamped = number.round().clamp(0.0, 100.0);
    // clamped is an integral value within u8 range
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let score = clamped as u8;
    Some(score)
}

/// Read a string field, treating blanks as absent.
pub fn read_string(object: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn strips_think_blocks() {
        assert_eq!(strip_think_blocks("<think>hmm</think>The gate fell."), "The gate fell.");
        assert_eq!(strip_think_blocks("Before<think>never closed"), "Before");
        assert_eq!(strip_think_blocks("plain"), "plain");
    }

    #[test]
    fn direct_json() {
        let obj = extract_json_object(r#"{"prose_score": 88}"#);
        assert_eq!(obj.and_then(|o| read_score(&o, "prose_score")), Some(88));
    }

    #[test]
    fn fenced_json_with_reasoning() {
        let raw = "<think>scoring...</think>\nHere you go:\n```json\n{\"arc_score\": 71, \"arc_fix\": \"raise stakes\"}\n```";
        let obj = extract_json_object(raw).unwrap();
        assert_eq!(read_score(&obj, "arc_score"), Some(71));
        assert_eq!(read_string(&obj, "arc_fix").as_deref(), Some("raise stakes"));
    }

    #[test]
    fn json_embedded_in_prose() {
        let raw = r#"Verdict follows. {"redundancy_score": "64", "note": "a {brace} in text"} Thanks!"#;
        let obj = extract_json_object(raw).unwrap();
        assert_eq!(read_score(&obj, "redundancy_score"), Some(64));
    }

    #[test]
    fn balanced_scan_picks_largest_object() {
        let raw = r#"{"a": 1} then {"b": {"c": 2}, "d": 3} and junk }"#;
        let obj = extract_json_object(raw).unwrap();
        assert!(obj.contains_key("b"));
    }

    #[test]
    fn trailing_commas_repaired() {
        let raw = "{\"inventory_add\": [\"rope\",], \"current_time\": \"noon\",}";
        let obj = extract_json_object(raw).unwrap();
        assert_eq!(read_string(&obj, "current_time").as_deref(), Some("noon"));
    }

    #[test]
    fn garbage_yields_none() {
        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_object("[1, 2, 3]").is_none());
    }

    #[test]
    fn scores_are_clamped() {
        let obj = extract_json_object(r#"{"a": 130, "b": -4, "c": 77.6, "d": "n/a"}"#).unwrap();
        assert_eq!(read_score(&obj, "a"), Some(100));
        assert_eq!(read_score(&obj, "b"), Some(0));
        assert_eq!(read_score(&obj, "c"), Some(78));
        assert_eq!(read_score(&obj, "d"), None);
    }
}
