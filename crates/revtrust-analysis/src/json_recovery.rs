//! Defensive JSON extraction from model output.
//!
//! Three tiers, tried in order:
//!
//! 1. the whole (trimmed) text parses as JSON;
//! 2. the first fenced code block parses, including an unterminated fence
//!    left behind by a truncated response;
//! 3. a bracket scanner finds the first balanced `{…}`/`[…]` that parses, or,
//!    when the outer value was cut off, collects every complete `{…}` object
//!    into an array.
//!
//! [`recover_json_with`] runs the same tiers but only stops at a value the
//! caller can interpret, so a bracketed aside such as `[4]` in the prose
//! does not shadow the real answer after it.

use regex::Regex;
use serde_json::Value;

/// Which tier produced the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryTier {
    Direct,
    Fenced,
    Balanced,
    Fragments,
}

/// Best-effort parse of `text`. `None` when no tier yields JSON.
#[must_use]
pub fn recover_json(text: &str) -> Option<Value> {
    recover_json_with_tier(text).map(|(value, _)| value)
}

#[must_use]
pub fn recover_json_with_tier(text: &str) -> Option<(Value, RecoveryTier)> {
    recover_json_with(text, |value| Some(value.clone()))
}

/// First candidate, in tier order, for which `interpret` returns `Some`.
pub fn recover_json_with<T>(
    text: &str,
    mut interpret: impl FnMut(&Value) -> Option<T>,
) -> Option<(T, RecoveryTier)> {
    if let Some(found) = parse_direct(text).as_ref().and_then(&mut interpret) {
        return Some((found, RecoveryTier::Direct));
    }
    if let Some(found) = parse_fenced(text).as_ref().and_then(&mut interpret) {
        return Some((found, RecoveryTier::Fenced));
    }
    if let Some(found) = parse_balanced_with(text, &mut interpret) {
        return Some((found, RecoveryTier::Balanced));
    }
    let fragments = collect_fragments(text);
    if fragments.is_empty() {
        return None;
    }
    let found = interpret(&Value::Array(fragments))?;
    tracing::debug!("recovered JSON fragments from truncated output");
    Some((found, RecoveryTier::Fragments))
}

/// Tier 1.
#[must_use]
pub fn parse_direct(text: &str) -> Option<Value> {
    serde_json::from_str(text.trim()).ok()
}

/// Tier 2.
#[must_use]
pub fn parse_fenced(text: &str) -> Option<Value> {
    let fence_re = Regex::new(r"(?s)```[A-Za-z]*\s*\n?(.*?)```").expect("valid fence regex");
    if let Some(value) = fence_re
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .find_map(|m| parse_direct(m.as_str()))
    {
        return Some(value);
    }

    // An opening fence with no closing one.
    let open = text.find("```")?;
    let after = &text[open + 3..];
    let body = after.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    parse_direct(body.trim_end_matches('`'))
}

/// Tier 3: first balanced bracket span that parses.
#[must_use]
pub fn parse_balanced(text: &str) -> Option<Value> {
    parse_balanced_with(text, |value| Some(value.clone()))
}

/// Tier 3 with a filter: spans that parse but that `interpret` rejects are
/// skipped and the scan continues after their opening bracket.
///
/// Gives up as soon as a bracket runs to the end of the input: everything
/// after it is part of a truncated value and belongs to fragment recovery.
fn parse_balanced_with<T>(text: &str, mut interpret: impl FnMut(&Value) -> Option<T>) -> Option<T> {
    let bytes = text.as_bytes();
    let mut from = 0;
    while let Some(start) = bytes[from..]
        .iter()
        .position(|b| *b == b'{' || *b == b'[')
        .map(|pos| from + pos)
    {
        match scan_brackets(bytes, start) {
            Scan::Closed(end) => {
                if let Some(found) = serde_json::from_str::<Value>(&text[start..end])
                    .ok()
                    .as_ref()
                    .and_then(&mut interpret)
                {
                    return Some(found);
                }
            }
            Scan::Mismatch => {}
            Scan::Truncated => return None,
        }
        from = start + 1;
    }
    None
}

/// Every complete top-level `{…}` object in `text`, left to right.
fn collect_fragments(text: &str) -> Vec<Value> {
    let bytes = text.as_bytes();
    let mut fragments = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Scan::Closed(end) = scan_brackets(bytes, i) {
                if let Ok(value) = serde_json::from_str::<Value>(&text[i..end]) {
                    fragments.push(value);
                    i = end;
                    continue;
                }
            }
        }
        i += 1;
    }
    fragments
}

enum Scan {
    /// Index one past the matching close bracket.
    Closed(usize),
    Mismatch,
    Truncated,
}

/// Scans from the bracket at `start` to its partner, honouring string
/// literals and escapes.
fn scan_brackets(bytes: &[u8], start: usize) -> Scan {
    let mut expected: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => expected.push(b'}'),
            b'[' => expected.push(b']'),
            b'}' | b']' => {
                if expected.pop() != Some(byte) {
                    return Scan::Mismatch;
                }
                if expected.is_empty() {
                    return Scan::Closed(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    Scan::Truncated
}
