use axum::body::Bytes;
use serde_json::{Map, Value};
use url::Url;

use crate::models::{non_blank, PromptOptions};

// ── Constants ────────────────────────────────────────────────────────────────

const USER_AGENT: &str = "image-seo-api/1.0";
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
const OCTET_STREAM: &str = "application/octet-stream";

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Unsupported protocol: {0} (only http and https are allowed)")]
    UnsupportedProtocol(String),
    #[error("Failed to fetch image: {0}")]
    UpstreamFetchFailed(String),
    #[error("URL did not return an image (content-type: {0})")]
    NotAnImage(String),
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),
    #[error("Image too large: {0:.2} MiB (max 10 MiB)")]
    PayloadTooLarge(f64),
}

// ── Public types ─────────────────────────────────────────────────────────────

/// Raw image bytes plus the media type they were declared with.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    bytes: Bytes,
    content_type: String,
}

impl ImagePayload {
    pub fn new(bytes: Bytes, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

pub struct Acquired {
    pub payload: ImagePayload,
    /// Prompt steering carried in a JSON body. Always default in binary mode.
    pub options: PromptOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Url,
    Binary,
}

// ── Public API ───────────────────────────────────────────────────────────────

pub fn build_http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::limited(10))
        .user_agent(USER_AGENT)
        .build()
}

pub async fn acquire(
    client: &reqwest::Client,
    content_type: Option<&str>,
    body: Bytes,
) -> Result<Acquired, AcquisitionError> {
    let declared = content_type.unwrap_or("");
    let acquired = match select_mode(declared)? {
        Mode::Url => {
            let (url, options) = parse_url_body(&body)?;
            let payload = fetch_image(client, &url).await?;
            Acquired { payload, options }
        }
        Mode::Binary => Acquired {
            payload: ImagePayload::new(body, declared),
            options: PromptOptions::default(),
        },
    };

    check_size(acquired.payload.len())?;
    tracing::debug!(
        bytes = acquired.payload.len(),
        content_type = acquired.payload.content_type(),
        "image acquired"
    );
    Ok(acquired)
}

pub fn check_size(len: usize) -> Result<(), AcquisitionError> {
    if len > MAX_IMAGE_BYTES {
        return Err(AcquisitionError::PayloadTooLarge(
            len as f64 / (1024.0 * 1024.0),
        ));
    }
    Ok(())
}

// ── Mode selection ───────────────────────────────────────────────────────────

fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

fn select_mode(content_type: &str) -> Result<Mode, AcquisitionError> {
    let essence = essence(content_type);
    if essence == "application/json" || essence.ends_with("+json") {
        Ok(Mode::Url)
    } else if essence.starts_with("image/") || essence == OCTET_STREAM {
        Ok(Mode::Binary)
    } else if essence.is_empty() {
        Err(AcquisitionError::UnsupportedContentType(
            "(none)".to_string(),
        ))
    } else {
        Err(AcquisitionError::UnsupportedContentType(
            content_type.to_string(),
        ))
    }
}

// ── URL validation ───────────────────────────────────────────────────────────

fn parse_url_body(body: &[u8]) -> Result<(Url, PromptOptions), AcquisitionError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|_| AcquisitionError::MissingField("url"))?;
    let obj = value
        .as_object()
        .ok_or(AcquisitionError::MissingField("url"))?;

    let raw = match obj.get("url") {
        None | Some(Value::Null) => return Err(AcquisitionError::MissingField("url")),
        Some(Value::String(s)) => s.trim(),
        Some(other) => return Err(AcquisitionError::InvalidUrl(other.to_string())),
    };

    let url = validate_url(raw)?;
    Ok((url, options_from_body(obj)))
}

fn validate_url(raw: &str) -> Result<Url, AcquisitionError> {
    let parsed = Url::parse(raw).map_err(|e| AcquisitionError::InvalidUrl(format!("{raw} ({e})")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(AcquisitionError::UnsupportedProtocol(format!("{other}:"))),
    }
}

fn options_from_body(obj: &Map<String, Value>) -> PromptOptions {
    let text = |key: &str| non_blank(obj.get(key).and_then(Value::as_str));
    PromptOptions {
        keyword: text("keyword"),
        context: text("context"),
        tone: text("tone"),
        prefix: text("prefix"),
        suffix: text("suffix"),
        tags: obj.get("tags").and_then(Value::as_bool).unwrap_or(false),
    }
}

// ── HTTP fetch ───────────────────────────────────────────────────────────────

async fn fetch_image(client: &reqwest::Client, url: &Url) -> Result<ImagePayload, AcquisitionError> {
    let response = client.get(url.clone()).send().await.map_err(|e| {
        if e.is_timeout() {
            AcquisitionError::UpstreamFetchFailed(format!("TimeoutError: {}", e))
        } else if e.is_connect() {
            AcquisitionError::UpstreamFetchFailed(format!("ConnectError: {}", e))
        } else {
            AcquisitionError::UpstreamFetchFailed(format!("RequestError: {}", e))
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(AcquisitionError::UpstreamFetchFailed(
            status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| status.to_string()),
        ));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let essence = essence(&content_type);
    if !essence.starts_with("image/") && essence != OCTET_STREAM {
        return Err(AcquisitionError::NotAnImage(content_type));
    }

    read_capped(response)
        .await
        .map(|bytes| ImagePayload::new(bytes, content_type))
}

/// Read the body, giving up as soon as it passes the size ceiling.
async fn read_capped(mut response: reqwest::Response) -> Result<Bytes, AcquisitionError> {
    let declared = response.content_length();
    if let Some(len) = declared {
        check_size(usize::try_from(len).unwrap_or(usize::MAX))?;
    }

    let mut buf = Vec::with_capacity(declared.unwrap_or(0) as usize);
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| AcquisitionError::UpstreamFetchFailed(e.to_string()))?
    {
        check_size(buf.len() + chunk.len())?;
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}
