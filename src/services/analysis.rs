use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

/// Request fields that identify the caller or the upload and must not reach the model.
const INTERNAL_FIELDS: [&str; 5] = ["email", "device_id", "ip_address", "image_name", "version"];

/// External service that turns an image analysis request into a nutrition document.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn analyze(&self, request: &serde_json::Value) -> Result<serde_json::Value, AnalysisError>;
}

/// Remove internal-only fields from a request body and pin the model name.
///
/// Non-object bodies are forwarded untouched.
pub fn strip_internal_fields(body: &serde_json::Value, model: &str) -> serde_json::Value {
    let mut stripped = body.clone();
    if let Some(fields) = stripped.as_object_mut() {
        for field in INTERNAL_FIELDS {
            fields.remove(field);
        }
        fields.insert("model".to_string(), serde_json::Value::String(model.to_string()));
    }
    stripped
}

/// Client for an OpenRouter-compatible chat completions API.
pub struct OpenRouterClient {
    http: Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl OpenRouterClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, AnalysisError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AnalysisError::Http)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl AnalysisClient for OpenRouterClient {
    async fn analyze(&self, request: &serde_json::Value) -> Result<serde_json::Value, AnalysisError> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(AnalysisError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response.json().await.map_err(AnalysisError::from_reqwest)?;
        parse_content(chat)
    }
}

/// The model's text content must itself be a JSON document.
fn parse_content(chat: ChatResponse) -> Result<serde_json::Value, AnalysisError> {
    let content = chat
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| AnalysisError::MalformedResponse("response has no message content".to_string()))?;

    serde_json::from_str(content.trim())
        .map_err(|e| AnalysisError::MalformedResponse(format!("content is not JSON: {e}")))
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest::Error),

    #[error("Analysis request timed out")]
    Timeout,

    #[error("Analysis API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed analysis response: {0}")]
    MalformedResponse(String),
}

impl AnalysisError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AnalysisError::Timeout
        } else if err.is_decode() {
            AnalysisError::MalformedResponse(err.to_string())
        } else {
            AnalysisError::Http(err)
        }
    }

    /// Transport problems, timeouts, throttling, server errors and garbled
    /// output are worth another attempt; other client errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            AnalysisError::Http(_) | AnalysisError::Timeout | AnalysisError::MalformedResponse(_) => {
                true
            }
            AnalysisError::Status { status, .. } => StatusCode::from_u16(*status)
                .map(|code| {
                    code.is_server_error()
                        || code == StatusCode::TOO_MANY_REQUESTS
                        || code == StatusCode::REQUEST_TIMEOUT
                })
                .unwrap_or(false),
        }
    }
}
