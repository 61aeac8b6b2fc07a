//! Text-generation backend.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("API key not configured (set GOOGLE_API_KEY)")]
    MissingApiKey,

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("network error: {0}")]
    Network(String),

    #[error("quota exceeded: {0}")]
    Quota(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Generate a completion for `prompt`. Called at most once per question.
    async fn generate(&self, prompt: &str) -> Result<String, BackendError>;
}

/// Google Generative Language REST client.
pub struct GeminiClient {
    api_key: Option<String>,
    model: String,
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl GenerationBackend for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        let api_key = self.api_key.as_deref().ok_or(BackendError::MissingApiKey)?;

        let body = serde_json::json!({
            "contents": [
                {"role": "user", "parts": [{"text": prompt}]}
            ],
            "generationConfig": {
                "temperature": 0.2
            }
        });

        debug!("Calling {} ({} prompt chars)", self.endpoint(), prompt.chars().count());
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout(self.timeout.as_secs())
                } else {
                    BackendError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Network(format!("Failed to read response body: {}", e)))?;

        if status.as_u16() == 429 {
            return Err(BackendError::Quota(truncate(&text, 300)));
        }
        if !status.is_success() {
            return Err(BackendError::Http { status: status.as_u16(), body: truncate(&text, 300) });
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|e| BackendError::Malformed(format!("Invalid JSON: {}", e)))?;
        extract_text(&json)
    }
}

/// Concatenated text parts of the first candidate.
pub fn extract_text(response: &Value) -> Result<String, BackendError> {
    let candidate = response["candidates"]
        .get(0)
        .ok_or_else(|| match response["promptFeedback"]["blockReason"].as_str() {
            Some(reason) => BackendError::Malformed(format!("Prompt blocked: {}", reason)),
            None => BackendError::Malformed("No candidates in response".to_string()),
        })?;

    let parts = candidate["content"]["parts"]
        .as_array()
        .ok_or_else(|| BackendError::Malformed("No content parts in candidate".to_string()))?;

    let text: String = parts.iter().filter_map(|p| p["text"].as_str()).collect();
    if text.trim().is_empty() {
        return Err(BackendError::Malformed("Empty completion".to_string()));
    }
    Ok(text.trim().to_string())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    }
}
