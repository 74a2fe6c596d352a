use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Optional steering for the full-metadata prompt.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PromptOptions {
    pub keyword: Option<String>,
    pub context: Option<String>,
    pub tone: Option<String>,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    pub tags: bool,
}

impl PromptOptions {
    /// Fill every unset field from `fallback`. Values already present win.
    pub fn or(self, fallback: PromptOptions) -> PromptOptions {
        PromptOptions {
            keyword: self.keyword.or(fallback.keyword),
            context: self.context.or(fallback.context),
            tone: self.tone.or(fallback.tone),
            prefix: self.prefix.or(fallback.prefix),
            suffix: self.suffix.or(fallback.suffix),
            tags: self.tags || fallback.tags,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct QueryParams {
    pub lang: Option<String>,
    pub tags: Option<String>,
    pub keyword: Option<String>,
    pub context: Option<String>,
    pub tone: Option<String>,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
}

impl QueryParams {
    pub fn options(&self) -> PromptOptions {
        PromptOptions {
            keyword: non_blank(self.keyword.as_deref()),
            context: non_blank(self.context.as_deref()),
            tone: non_blank(self.tone.as_deref()),
            prefix: non_blank(self.prefix.as_deref()),
            suffix: non_blank(self.suffix.as_deref()),
            tags: matches!(
                self.tags.as_deref().map(|s| s.trim().to_ascii_lowercase()).as_deref(),
                Some("1") | Some("true") | Some("yes")
            ),
        }
    }
}

/// Blank values count as absent; anything else is kept verbatim.
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// Full-metadata output. Field order follows what the model emitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MetadataResult(pub Map<String, Value>);

#[derive(Debug, Serialize)]
pub struct ResultResponse {
    pub result: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
