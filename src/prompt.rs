use once_cell::sync::Lazy;
use std::collections::BTreeMap;

use crate::models::PromptOptions;

// ── Language table ───────────────────────────────────────────────────────────

const DEFAULT_LANGUAGE: &str = "English";

pub static LANGUAGES: Lazy<BTreeMap<&'static str, &'static str>> = Lazy::new(|| {
    BTreeMap::from([
        ("en", "English"),
        ("de", "German"),
        ("fr", "French"),
        ("it", "Italian"),
        ("pt", "Portuguese"),
        ("hi", "Hindi"),
        ("es", "Spanish"),
        ("th", "Thai"),
        ("ja", "Japanese"),
        ("ko", "Korean"),
        ("zh", "Chinese"),
    ])
});

/// Display name for a two-letter code. Unknown or missing codes mean English.
pub fn language_name(code: Option<&str>) -> &'static str {
    code.and_then(|c| LANGUAGES.get(c.trim()).copied())
        .unwrap_or(DEFAULT_LANGUAGE)
}

// ── Kinds ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Metadata,
    AltText,
    Caption,
    Description,
    FocusKeyword,
    Filename,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Metadata => "metadata",
            Kind::AltText => "alt-text",
            Kind::Caption => "caption",
            Kind::Description => "description",
            Kind::FocusKeyword => "focus-keyword",
            Kind::Filename => "filename",
        }
    }
}

// ── Prompt pair ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

const METADATA_SYSTEM: &str = "You are an SEO expert who writes image metadata. You respond with a single valid JSON object and nothing else.";

const ASSISTANT_SYSTEM: &str = "You are a helpful assistant that describes images accurately.";

pub fn build(kind: Kind, language: &str, options: &PromptOptions) -> Prompt {
    let directive = match kind {
        Kind::Metadata => {
            return Prompt {
                system: METADATA_SYSTEM.to_string(),
                user: metadata_instruction(language, options),
            }
        }
        Kind::AltText => "Write concise alt text for this image, under 125 characters. Describe what is visible for someone who cannot see it. Output only the alt text, no quotes or commentary.",
        Kind::Caption => "Write a short, engaging caption for this image in one sentence. Output only the caption text, no quotes or commentary.",
        Kind::Description => "Write an SEO-friendly description of this image in 2-3 sentences. Output only the description text, no quotes or commentary.",
        Kind::FocusKeyword => "Give the single best SEO focus keyword or keyphrase for this image, 1-4 words. Output only the keyword, nothing else.",
        Kind::Filename => "Suggest a descriptive SEO filename for this image using 3-5 words separated by spaces. Do not include a file extension, underscores or dashes. Output only the words.",
    };
    Prompt {
        system: ASSISTANT_SYSTEM.to_string(),
        user: format!("{directive} Respond in {language}."),
    }
}

fn metadata_instruction(language: &str, options: &PromptOptions) -> String {
    let mut fields = vec![
        "\"language\"",
        "\"alt-text\"",
        "\"caption\"",
        "\"description\"",
        "\"filename\"",
        "\"focus-keyword\"",
    ];
    if options.tags {
        fields.push("\"tags\"");
    }

    let mut out = format!(
        "Analyze this image and produce SEO metadata as a JSON object with exactly these keys: {}.\n",
        fields.join(", ")
    );
    out.push_str(&format!(
        "- \"language\": the language name, \"{language}\".\n\
         - \"alt-text\": concise alt text under 125 characters.\n\
         - \"caption\": a one-sentence caption.\n\
         - \"description\": an SEO-friendly description of 2-3 sentences.\n\
         - \"filename\": 3-5 lowercase words joined by hyphens, without a file extension.\n\
         - \"focus-keyword\": the single best focus keyword or keyphrase.\n"
    ));
    if options.tags {
        out.push_str("- \"tags\": an array of 5-10 short relevant tags.\n");
    }

    if let Some(keyword) = &options.keyword {
        out.push_str(&format!(
            "Use \"{keyword}\" as the focus keyword and work it naturally into the alt text, caption and description.\n"
        ));
    }
    if let Some(context) = &options.context {
        out.push_str(&format!("Context about the image: {context}\n"));
    }
    if let Some(tone) = &options.tone {
        out.push_str(&format!("Write in a {tone} tone.\n"));
    }
    if let Some(prefix) = &options.prefix {
        out.push_str(&format!("Start the filename with \"{prefix}\".\n"));
    }
    if let Some(suffix) = &options.suffix {
        out.push_str(&format!("End the filename with \"{suffix}\".\n"));
    }

    out.push_str(&format!(
        "Write every text value in {language}. Output only the raw JSON object: no markdown, no code fences, no commentary."
    ));
    out
}
