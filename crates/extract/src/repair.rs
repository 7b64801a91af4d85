//! Best-effort normalization of loosely structured model output into JSON.
//!
//! `repair` never fails. When no step produces parseable JSON the input is
//! returned untouched and the caller's parse reports the problem.

use regex::Regex;
use std::sync::LazyLock;

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\n?(.*?)```").expect("code fence pattern")
});

/// Normalize `raw` into a JSON string if a known repair applies.
///
/// Text that already parses (after trimming) is returned as-is, so
/// `repair(repair(t)) == repair(t)`.
pub fn repair(raw: &str) -> String {
    let trimmed = raw.trim();
    if is_json(trimmed) {
        return trimmed.to_string();
    }

    let candidate = strip_code_fence(trimmed).trim().to_string();
    if is_json(&candidate) {
        return candidate;
    }

    if let Some(span) = best_json_span(&candidate) {
        return span;
    }

    let normalized = normalize_syntax(&candidate);
    if is_json(&normalized) {
        normalized
    } else {
        raw.to_string()
    }
}

fn is_json(text: &str) -> bool {
    !text.is_empty() && serde_json::from_str::<serde_json::Value>(text).is_ok()
}

fn strip_code_fence(text: &str) -> &str {
    CODE_FENCE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text)
}

/// The longest top-level balanced span that parses, directly or after
/// syntax normalization. Prose before the payload often carries bracketed
/// asides such as `[1]`, so the first span is not necessarily the answer.
fn best_json_span(text: &str) -> Option<String> {
    let mut best: Option<String> = None;
    for span in balanced_spans(text) {
        let parsed = if is_json(span) {
            span.to_string()
        } else {
            let normalized = normalize_syntax(span);
            if !is_json(&normalized) {
                continue;
            }
            normalized
        };
        if best.as_ref().is_none_or(|b| parsed.len() > b.len()) {
            best = Some(parsed);
        }
    }
    best
}

/// Every top-level balanced `{...}` or `[...]` span, in order.
fn balanced_spans(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut from = 0;
    while let Some(offset) = text[from..].find(['{', '[']) {
        let start = from + offset;
        match balanced_len(&text[start..]) {
            Some(len) => {
                spans.push(&text[start..start + len]);
                from = start + len;
            }
            // Unclosed bracket: retry from the next opening one
            None => from = start + 1,
        }
    }
    spans
}

/// Byte length of the balanced span opening at the start of `text`,
/// skipping brackets inside single- or double-quoted strings.
fn balanced_len(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string: Option<char> = None;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if let Some(quote) = in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                in_string = None;
            }
            continue;
        }

        match c {
            '"' | '\'' => in_string = Some(c),
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }

    None
}

/// Single pass outside of string literals: single-quoted strings become
/// double-quoted, Python literals map to JSON ones, trailing commas go.
fn normalize_syntax(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' => i = copy_double_quoted(&chars, i, &mut out),
            '\'' => i = convert_single_quoted(&chars, i, &mut out),
            ',' if matches!(next_significant(&chars, i + 1), Some('}' | ']')) => i += 1,
            c if c.is_ascii_alphabetic() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                out.push_str(match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    other => other,
                });
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

fn next_significant(chars: &[char], from: usize) -> Option<char> {
    chars[from.min(chars.len())..]
        .iter()
        .copied()
        .find(|c| !c.is_whitespace())
}

fn copy_double_quoted(chars: &[char], start: usize, out: &mut String) -> usize {
    out.push('"');
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        out.push(c);
        match c {
            '\\' if i + 1 < chars.len() => {
                out.push(chars[i + 1]);
                i += 2;
            }
            '"' => return i + 1,
            _ => i += 1,
        }
    }
    i
}

fn convert_single_quoted(chars: &[char], start: usize, out: &mut String) -> usize {
    out.push('"');
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' if i + 1 < chars.len() && chars[i + 1] == '\'' => {
                out.push('\'');
                i += 2;
            }
            '\\' if i + 1 < chars.len() => {
                out.push(c);
                out.push(chars[i + 1]);
                i += 2;
            }
            '"' => {
                out.push_str("\\\"");
                i += 1;
            }
            '\'' => {
                out.push('"');
                return i + 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    i
}
