//! Defensive JSON recovery for oracle output.
//!
//! Models wrap JSON in markdown fences, prepend prose, or trail commentary.
//! Recovery strips fences, locates the first balanced object with a scanner
//! that respects string literals, and only then hands the slice to serde.
//! Escape-aware field pullers cover the last resort where the object itself
//! is malformed but the wanted values are still quoted in the text.

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseFailure {
    #[error("response was empty")]
    Empty,
    #[error("no JSON object found in response")]
    NoJsonObject,
    #[error("JSON did not match the expected shape: {0}")]
    WrongShape(#[from] serde_json::Error),
}

/// Parse a typed value out of raw oracle text.
pub fn recover_json<T: DeserializeOwned>(raw: &str) -> Result<T, ParseFailure> {
    if raw.trim().is_empty() {
        return Err(ParseFailure::Empty);
    }
    let cleaned = strip_code_fences(raw);
    let object = extract_json_object(cleaned).ok_or(ParseFailure::NoJsonObject)?;
    Ok(serde_json::from_str(object)?)
}

/// Remove a surrounding ```json fence when present.
pub fn strip_code_fences(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// First balanced `{...}` in `text`. Braces inside string literals do not
/// count, escaped quotes do not end a literal.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Pull the string value of `"key"` out of loosely structured text,
/// honoring backslash escapes.
pub fn extract_json_string(text: &str, key: &str) -> Option<String> {
    let pattern = format!("\"{}\"", key);
    let start = text.find(&pattern)?;
    let after = &text[start + pattern.len()..];
    let colon = after.find(':')?;
    let after = &after[colon + 1..];
    let quote = after.find('"')?;

    let mut value = String::new();
    let mut escape_next = false;
    for c in after[quote + 1..].chars() {
        if escape_next {
            value.push(c);
            escape_next = false;
            continue;
        }
        match c {
            '\\' => escape_next = true,
            '"' => return Some(value),
            _ => value.push(c),
        }
    }
    None
}

/// Pull a flat string array value of `"key"` out of loosely structured text.
pub fn extract_json_array(text: &str, key: &str) -> Option<Vec<String>> {
    let pattern = format!("\"{}\"", key);
    let start = text.find(&pattern)?;
    let after = &text[start + pattern.len()..];
    let open = after.find('[')?;
    let close = after[open..].find(']')? + open;

    let items = after[open + 1..close]
        .split(',')
        .map(|item| item.trim().trim_matches('"').trim().to_string())
        .filter(|item| !item.is_empty())
        .collect();
    Some(items)
}
