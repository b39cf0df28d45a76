//! Decoding of JavaScript object literals that are "almost JSON".
//!
//! Bootstrap scripts emit literals with bare keys, single-quoted strings, trailing
//! commas and the odd comment. [`normalize_relaxed_json`] rewrites those into strict
//! JSON text and [`parse_relaxed_object`] decodes the result with `serde_json`.

use harvest_core::ListingRecord;
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelaxedJsonError {
    #[error("invalid object literal: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("expected an object literal, found {0}")]
    NotAnObject(&'static str),
}

pub fn parse_relaxed_object(text: &str) -> Result<ListingRecord, RelaxedJsonError> {
    let normalized = normalize_relaxed_json(text);
    match serde_json::from_str::<JsonValue>(&normalized)? {
        JsonValue::Object(map) => Ok(map),
        JsonValue::Array(_) => Err(RelaxedJsonError::NotAnObject("an array")),
        JsonValue::String(_) => Err(RelaxedJsonError::NotAnObject("a string")),
        JsonValue::Number(_) => Err(RelaxedJsonError::NotAnObject("a number")),
        JsonValue::Bool(_) => Err(RelaxedJsonError::NotAnObject("a boolean")),
        JsonValue::Null => Err(RelaxedJsonError::NotAnObject("null")),
    }
}

/// Rewrite a relaxed object literal into strict JSON text.
///
/// Text inside double-quoted strings is copied untouched. Anything the rewrite does not
/// understand is passed through so `serde_json` can report it.
pub fn normalize_relaxed_json(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            '"' => i = copy_double_quoted(&chars, i, &mut out),
            '\'' => i = convert_single_quoted(&chars, i, &mut out),
            '/' if matches!(chars.get(i + 1), Some('/') | Some('*')) => {
                i = skip_comment(&chars, i);
            }
            ',' => {
                if !matches!(next_significant(&chars, i + 1), Some('}') | Some(']')) {
                    out.push(',');
                }
                i += 1;
            }
            c if is_ident_start(c) => {
                let start = i;
                while i < chars.len() && is_ident_continue(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let preceded_by_digit = out.chars().last().is_some_and(|c| c.is_ascii_digit());
                if preceded_by_digit {
                    // exponent or other numeric tail, e.g. the `e5` of `1e5`
                    out.push_str(&word);
                } else if next_significant(&chars, i) == Some(':') {
                    out.push('"');
                    out.push_str(&word);
                    out.push('"');
                } else {
                    match word.as_str() {
                        "undefined" | "NaN" | "Infinity" => {
                            // a signed `-Infinity` collapses to a single null
                            if out.ends_with(['-', '+']) {
                                out.pop();
                            }
                            out.push_str("null");
                        }
                        _ => out.push_str(&word),
                    }
                }
            }
            _ => {
                out.push(ch);
                i += 1;
            }
        }
    }
    out
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Copies a `"..."` string verbatim; returns the index just past the closing quote.
fn copy_double_quoted(chars: &[char], start: usize, out: &mut String) -> usize {
    out.push('"');
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        out.push(c);
        i += 1;
        match c {
            '\\' => {
                if let Some(&escaped) = chars.get(i) {
                    out.push(escaped);
                    i += 1;
                }
            }
            '"' => return i,
            _ => {}
        }
    }
    i
}

/// Re-quotes a `'...'` string with double quotes.
fn convert_single_quoted(chars: &[char], start: usize, out: &mut String) -> usize {
    out.push('"');
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        i += 1;
        match c {
            '\\' => match chars.get(i) {
                Some('\'') => {
                    out.push('\'');
                    i += 1;
                }
                Some(&escaped) => {
                    out.push('\\');
                    out.push(escaped);
                    i += 1;
                }
                None => out.push('\\'),
            },
            '"' => out.push_str("\\\""),
            '\'' => {
                out.push('"');
                return i;
            }
            _ => out.push(c),
        }
    }
    out.push('"');
    i
}

fn skip_comment(chars: &[char], start: usize) -> usize {
    let mut i = start + 2;
    if chars[start + 1] == '/' {
        while i < chars.len() && chars[i] != '\n' {
            i += 1;
        }
        return i;
    }
    while i + 1 < chars.len() {
        if chars[i] == '*' && chars[i + 1] == '/' {
            return i + 2;
        }
        i += 1;
    }
    chars.len()
}

/// First character at or after `from` that is neither whitespace nor inside a comment.
fn next_significant(chars: &[char], from: usize) -> Option<char> {
    let mut i = from;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '/' && matches!(chars.get(i + 1), Some('/') | Some('*')) {
            i = skip_comment(chars, i);
        } else {
            return Some(c);
        }
    }
    None
}
