// ── Constants ────────────────────────────────────────────────────────────────

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_MODEL: &str = "@cf/meta/llama-3.2-11b-vision-instruct";
const DEFAULT_BASE_URL: &str = "https://api.cloudflare.com/client/v4";
const DEFAULT_MAX_TOKENS: u32 = 512;

// ── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub account_id: Option<String>,
    pub api_token: Option<String>,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env("PORT")
                .and_then(|s| s.parse::<u16>().ok())
                .unwrap_or(DEFAULT_PORT),
            account_id: env("CF_ACCOUNT_ID"),
            api_token: env("CF_API_TOKEN"),
            model: env("CF_AI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: env("CF_AI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            max_tokens: env("CF_AI_MAX_TOKENS")
                .and_then(|s| s.parse::<u32>().ok())
                .unwrap_or(DEFAULT_MAX_TOKENS)
                .clamp(16, 4096),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
