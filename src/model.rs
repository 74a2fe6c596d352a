//! Vision-language model invocation.
//!
//! The hosted model is an opaque capability behind [`VisionModel`]. It sometimes
//! honours "output JSON" with a real object and sometimes with text, so every
//! reply is folded into a [`ModelOutcome`] here and nowhere else.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::acquire::ImagePayload;
use crate::config::Config;
use crate::prompt::Prompt;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model is not configured: {0}")]
    NotConfigured(&'static str),
    #[error("Model invocation failed: {0}")]
    Invocation(String),
}

// ── Capability seam ──────────────────────────────────────────────────────────

pub struct VisionRequest<'a> {
    pub system: &'a str,
    pub user: &'a str,
    pub image: &'a [u8],
}

#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Run the model once and return its raw reply.
    async fn run(&self, request: &VisionRequest<'_>) -> Result<Value, ModelError>;
}

// ── Outcome ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutcome {
    Structured(Map<String, Value>),
    Text(String),
}

/// Field a transport wrapper nests the generated output under.
const WRAPPED_FIELD: &str = "response";

pub async fn invoke(
    model: &dyn VisionModel,
    prompt: &Prompt,
    payload: &ImagePayload,
) -> Result<ModelOutcome, ModelError> {
    let request = VisionRequest {
        system: &prompt.system,
        user: &prompt.user,
        image: payload.bytes(),
    };
    let raw = model.run(&request).await?;
    let outcome = into_outcome(raw);
    tracing::debug!(
        structured = matches!(outcome, ModelOutcome::Structured(_)),
        "model replied"
    );
    Ok(outcome)
}

pub fn into_outcome(raw: Value) -> ModelOutcome {
    match raw {
        Value::Object(mut obj) => match obj.remove(WRAPPED_FIELD) {
            None => ModelOutcome::Structured(obj),
            Some(Value::Object(inner)) => ModelOutcome::Structured(inner),
            Some(Value::Null) => ModelOutcome::Text(String::new()),
            Some(other) => ModelOutcome::Text(value_to_text(other)),
        },
        Value::Null => ModelOutcome::Text(String::new()),
        other => ModelOutcome::Text(value_to_text(other)),
    }
}

fn value_to_text(value: Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string().trim().to_string(),
    }
}

// ── Workers AI ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct RunRequest<'a> {
    messages: Vec<Message<'a>>,
    image: &'a [u8],
    max_tokens: u32,
}

/// Cloudflare Workers AI over its REST API.
#[derive(Debug, Clone)]
pub struct WorkersAi {
    client: reqwest::Client,
    base_url: String,
    account_id: Option<String>,
    api_token: Option<String>,
    model: String,
    max_tokens: u32,
}

impl WorkersAi {
    pub fn from_config(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
            account_id: config.account_id.clone(),
            api_token: config.api_token.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.account_id.is_some() && self.api_token.is_some()
    }

    fn endpoint(&self, account_id: &str) -> String {
        format!(
            "{}/accounts/{}/ai/run/{}",
            self.base_url.trim_end_matches('/'),
            account_id,
            self.model
        )
    }
}

#[async_trait]
impl VisionModel for WorkersAi {
    async fn run(&self, request: &VisionRequest<'_>) -> Result<Value, ModelError> {
        let account_id = self
            .account_id
            .as_deref()
            .ok_or(ModelError::NotConfigured("missing CF_ACCOUNT_ID"))?;
        let token = self
            .api_token
            .as_deref()
            .ok_or(ModelError::NotConfigured("missing CF_API_TOKEN"))?;

        let body = RunRequest {
            messages: vec![
                Message {
                    role: "system",
                    content: request.system,
                },
                Message {
                    role: "user",
                    content: request.user,
                },
            ],
            image: request.image,
            max_tokens: self.max_tokens,
        };

        let resp = self
            .client
            .post(self.endpoint(account_id))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Invocation(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(200).collect();
            return Err(ModelError::Invocation(format!("HTTP {status}: {snippet}")));
        }

        let mut envelope: Value = resp
            .json()
            .await
            .map_err(|e| ModelError::Invocation(format!("unreadable reply: {e}")))?;
        unwrap_envelope(&mut envelope)
    }
}

/// `{"success": bool, "result": ..., "errors": [...]}` → `result`.
fn unwrap_envelope(envelope: &mut Value) -> Result<Value, ModelError> {
    if envelope.get("success").and_then(Value::as_bool) == Some(false) {
        let errors = envelope
            .get("errors")
            .and_then(Value::as_array)
            .map(|errs| {
                errs.iter()
                    .filter_map(|e| e.get("message").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("; ")
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(ModelError::Invocation(errors));
    }
    match envelope.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(ModelError::Invocation("reply has no result".to_string())),
    }
}
