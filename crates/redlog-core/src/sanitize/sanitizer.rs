//! Cleaning rules
//!
//! Sanitizing never fails. If the markup patterns cannot be compiled the
//! preserve-syntax rule degrades to stripping every character that could
//! form markup or break out of an attribute.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::error;

use super::{FieldRule, field_rule};

struct MarkupPatterns {
    /// `<script>`/`<style>` elements including their bodies
    script_blocks: Regex,
    /// Unbalanced `<script>`/`<style>` tags
    script_tags: Regex,
    schemes: Regex,
    handlers: Regex,
}

impl MarkupPatterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            script_blocks: Regex::new(
                r"(?is)<\s*(script|style)\b[^>]*>.*?<\s*/\s*(script|style)\s*>",
            )?,
            script_tags: Regex::new(r"(?i)<\s*/?\s*(script|style)\b[^>]*>")?,
            schemes: Regex::new(r"(?i)\b(javascript|vbscript|data)\s*:")?,
            handlers: Regex::new(r"(?i)\bon\w+\s*=")?,
        })
    }
}

static MARKUP: LazyLock<Result<MarkupPatterns, regex::Error>> =
    LazyLock::new(MarkupPatterns::compile);

fn is_stripped_control(c: char) -> bool {
    c.is_control() && !matches!(c, '\t' | '\n' | '\r')
}

fn strip_control(input: &str) -> Cow<'_, str> {
    if input.chars().any(is_stripped_control) {
        Cow::Owned(input.chars().filter(|c| !is_stripped_control(*c)).collect())
    } else {
        Cow::Borrowed(input)
    }
}

/// Remove every match of `patterns` until none is left, since removing one
/// token can leave another behind at a fresh word boundary.
fn remove_until_stable(mut text: String, patterns: &[&Regex]) -> String {
    loop {
        let mut changed = false;
        for re in patterns {
            if re.is_match(&text) {
                text = re.replace_all(&text, "").into_owned();
                changed = true;
            }
        }
        if !changed {
            return text;
        }
    }
}

fn escape_angle_brackets(text: &str) -> String {
    text.replace('<', "&lt;").replace('>', "&gt;")
}

fn clean_markup(patterns: &MarkupPatterns, input: &str) -> String {
    let text = patterns.script_blocks.replace_all(input, "");
    let text = patterns.script_tags.replace_all(&text, "");
    let text = strip_control(&text).into_owned();
    let text = remove_until_stable(text, &[&patterns.schemes, &patterns.handlers]);
    escape_angle_brackets(&text)
}

/// Last-resort cleaning: drop `<>'"&` and control characters
pub fn strip_markup_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '\'' | '"' | '&') && !is_stripped_control(*c))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Clean a preserve-syntax value.
///
/// Shell and path metacharacters survive; `<` and `>` never do. The result
/// is trimmed and the function is idempotent.
pub fn sanitize_preserve_syntax(input: &str) -> String {
    match &*MARKUP {
        Ok(patterns) => clean_markup(patterns, input).trim().to_string(),
        Err(e) => {
            error!(error = %e, "Markup patterns unavailable, falling back to character stripping");
            strip_markup_chars(input)
        }
    }
}

/// Clean a strict value: trim and drop control characters. The grammar
/// check decides whether what is left is acceptable.
pub fn sanitize_strict(input: &str) -> String {
    strip_control(input.trim()).trim().to_string()
}

/// Keep only `[A-Za-z0-9_-]`
pub fn strip_to_identifier(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

fn mac_digits(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    match bytes.len() {
        12 if bytes.iter().all(u8::is_ascii_hexdigit) => Some(input.to_ascii_uppercase()),
        17 => {
            let mut digits = String::with_capacity(12);
            for (i, b) in bytes.iter().enumerate() {
                if i % 3 == 2 {
                    if *b != b':' && *b != b'-' {
                        return None;
                    }
                } else if b.is_ascii_hexdigit() {
                    digits.push(b.to_ascii_uppercase() as char);
                } else {
                    return None;
                }
            }
            Some(digits)
        }
        _ => None,
    }
}

/// Normalize a MAC address to `AA-BB-CC-DD-EE-FF`.
///
/// Colon, dash and unseparated forms are accepted in any case. Anything else
/// is returned unchanged so the validator can flag it.
pub fn normalize_mac_address(input: &str) -> String {
    let Some(digits) = mac_digits(input.trim()) else {
        return input.to_string();
    };

    let mut canonical = String::with_capacity(17);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && i % 2 == 0 {
            canonical.push('-');
        }
        canonical.push(c);
    }
    canonical
}

/// Apply the rule of `field` to `value`. Unknown fields get the
/// preserve-syntax rule.
pub fn sanitize_field(field: &str, value: &str) -> String {
    match field_rule(field) {
        Some(FieldRule::MacAddress) => normalize_mac_address(&sanitize_strict(value)),
        Some(rule) if rule.is_strict() => sanitize_strict(value),
        _ => sanitize_preserve_syntax(value),
    }
}

/// Recursively sanitize a JSON payload.
///
/// Known field keys get their own rule, `username` is further reduced to
/// identifier characters and every other string is treated as
/// preserve-syntax text. Keys are cleaned as well.
pub fn sanitize_object(value: &Value) -> Value {
    sanitize_value(None, value)
}

fn sanitize_value(key: Option<&str>, value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sanitized = Map::new();
            for (k, v) in map {
                sanitized.insert(sanitize_preserve_syntax(k), sanitize_value(Some(k), v));
            }
            Value::Object(sanitized)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| sanitize_value(key, item))
                .collect(),
        ),
        Value::String(s) => Value::String(match key {
            Some("username") => strip_to_identifier(&sanitize_strict(s)),
            Some(k) => sanitize_field(k, s),
            None => sanitize_preserve_syntax(s),
        }),
        _ => value.clone(),
    }
}
