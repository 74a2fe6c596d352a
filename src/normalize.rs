use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::model::ModelOutcome;
use crate::models::MetadataResult;

// ── Constants ────────────────────────────────────────────────────────────────

const DIAGNOSTIC_CHARS: usize = 500;
const FILENAME: &str = "filename";
const FOCUS_KEYWORD: &str = "focus-keyword";
/// Alternate names models use for the focus keyword, highest priority first.
const FOCUS_KEYWORD_ALIASES: &[&str] = &["focus_keyword", "keyword"];

/// Content-type needle → extension. First match wins.
const EXTENSIONS: &[(&str, &str)] = &[
    ("png", "png"),
    ("webp", "webp"),
    ("gif", "gif"),
    ("avif", "avif"),
];
const DEFAULT_EXTENSION: &str = "jpg";

// ── Lazy static regexes ──────────────────────────────────────────────────────

static DISALLOWED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\s-]").unwrap());

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static HYPHENS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-+").unwrap());

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Model returned malformed JSON: {0}")]
    MalformedModelOutput(String),
}

// ── Extension ────────────────────────────────────────────────────────────────

pub fn extension_for(content_type: &str) -> &'static str {
    let content_type = content_type.to_ascii_lowercase();
    EXTENSIONS
        .iter()
        .find(|(needle, _)| content_type.contains(needle))
        .map(|(_, ext)| *ext)
        .unwrap_or(DEFAULT_EXTENSION)
}

// ── Full metadata ────────────────────────────────────────────────────────────

pub fn normalize_metadata(
    outcome: ModelOutcome,
    content_type: &str,
) -> Result<MetadataResult, NormalizeError> {
    let mut fields = match outcome {
        ModelOutcome::Structured(obj) => obj,
        ModelOutcome::Text(text) => parse_embedded_object(&text)?,
    };

    reconcile_filename(&mut fields, extension_for(content_type));
    reconcile_focus_keyword(&mut fields);
    Ok(MetadataResult(fields))
}

/// Slice from the first `{` to the last `}` and parse that as an object.
fn parse_embedded_object(text: &str) -> Result<Map<String, Value>, NormalizeError> {
    let malformed = || {
        NormalizeError::MalformedModelOutput(text.chars().take(DIAGNOSTIC_CHARS).collect())
    };

    let start = text.find('{').ok_or_else(malformed)?;
    let end = text.rfind('}').ok_or_else(malformed)?;
    if end < start {
        return Err(malformed());
    }

    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Object(obj)) => Ok(obj),
        _ => Err(malformed()),
    }
}

/// Strings get the extension, numbers and booleans are stringified first,
/// and anything else (null, arrays, objects) is dropped.
fn reconcile_filename(fields: &mut Map<String, Value>, ext: &str) {
    let suffix = format!(".{ext}");
    let unusable = match fields.get_mut(FILENAME) {
        Some(Value::String(name)) => {
            if !name.ends_with(&suffix) {
                name.push_str(&suffix);
            }
            false
        }
        Some(value) if value.is_number() || value.is_boolean() => {
            *value = Value::String(format!("{value}{suffix}"));
            false
        }
        Some(_) => true,
        None => false,
    };
    if unusable {
        fields.retain(|key, _| key != FILENAME);
    }
}

fn reconcile_focus_keyword(fields: &mut Map<String, Value>) {
    if !fields.contains_key(FOCUS_KEYWORD) {
        let found = FOCUS_KEYWORD_ALIASES
            .iter()
            .find_map(|alias| fields.get(*alias).cloned());
        if let Some(value) = found {
            fields.insert(FOCUS_KEYWORD.to_string(), value);
        }
    }
    fields.retain(|key, _| !FOCUS_KEYWORD_ALIASES.contains(&key.as_str()));
}

// ── Filename ─────────────────────────────────────────────────────────────────

pub fn slugify(text: &str, content_type: &str) -> String {
    format!("{}.{}", slug(text), extension_for(content_type))
}

fn slug(text: &str) -> String {
    let lowered = text.trim().to_lowercase();
    let cleaned = DISALLOWED_RE.replace_all(&lowered, "");
    let hyphenated = WHITESPACE_RE.replace_all(&cleaned, "-");
    HYPHENS_RE.replace_all(&hyphenated, "-").into_owned()
}
