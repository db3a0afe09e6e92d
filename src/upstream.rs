// src/upstream.rs

use crate::config::UpstreamConfig;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Status markers that identify a quota or rate-limit failure in any error text.
const QUOTA_MARKERS: &[&str] = &["429", "quota", "rate limit", "resource_exhausted"];

/// Failure of one upstream call. Never crosses the orchestrator boundary.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum UpstreamError {
    #[error("quota or rate limit exceeded: {message}")]
    Quota { message: String },

    #[error("credential rejected: {message}")]
    Auth { message: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {message}")]
    Network { message: String },

    #[error("upstream returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("invalid upstream response: {message}")]
    Invalid { message: String },
}

impl UpstreamError {
    /// Map an HTTP status and error body to a failure class.
    pub fn classify(status: u16, body: &str) -> Self {
        let message = extract_error_message(body);
        if status == StatusCode::TOO_MANY_REQUESTS.as_u16() || contains_quota_marker(&message) {
            Self::Quota { message }
        } else if status == StatusCode::UNAUTHORIZED.as_u16()
            || status == StatusCode::FORBIDDEN.as_u16()
        {
            Self::Auth { message }
        } else {
            Self::Server { status, message }
        }
    }

    /// Quota errors are matched on the variant and on status markers in the text,
    /// since some providers report them as generic 4xx/5xx.
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::Quota { .. }) || contains_quota_marker(&self.to_string())
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Eligible for the single in-place retry.
    pub fn is_retryable(&self) -> bool {
        !self.is_quota() && !self.is_auth()
    }

    pub fn category(&self) -> FailureCategory {
        if self.is_quota() {
            FailureCategory::Quota
        } else if self.is_auth() {
            FailureCategory::Auth
        } else if matches!(self, Self::Timeout(_)) {
            FailureCategory::Timeout
        } else {
            FailureCategory::Other
        }
    }
}

/// Coarse failure class used to pick the apology shown after exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Timeout,
    Quota,
    Auth,
    Other,
}

fn contains_quota_marker(text: &str) -> bool {
    let lower = text.to_lowercase();
    QUOTA_MARKERS.iter().any(|m| lower.contains(m))
}

/// Pulls `error.message` out of a Google-style error body, falling back to the raw body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            let err = v.get("error")?;
            let message = err.get("message").and_then(Value::as_str).unwrap_or_default();
            let status = err.get("status").and_then(Value::as_str).unwrap_or_default();
            Some(format!("{status} {message}").trim().to_string())
        })
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.chars().take(300).collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    fn as_gemini(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

/// Everything a chat-completion call needs apart from key and model.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub history: Vec<ChatTurn>,
    pub message: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl GenerationRequest {
    /// Gemini `generateContent` body. Gemma models reject `systemInstruction`,
    /// so the preamble is folded into the first user turn.
    pub fn to_gemini_body(&self) -> Value {
        let mut contents = Vec::with_capacity(self.history.len() + 1);
        let mut preamble = (!self.system_prompt.is_empty()).then_some(self.system_prompt.as_str());

        let turns = self
            .history
            .iter()
            .map(|t| (t.role, t.content.as_str()))
            .chain(std::iter::once((Role::User, self.message.as_str())));

        for (role, text) in turns {
            let text = match (role, preamble) {
                (Role::User, Some(p)) => {
                    preamble = None;
                    format!("{p}\n\n{text}")
                }
                _ => text.to_string(),
            };
            contents.push(json!({
                "role": role.as_gemini(),
                "parts": [{ "text": text }],
            }));
        }

        json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": self.max_output_tokens,
                "temperature": self.temperature,
            },
        })
    }
}

/// Outbound LLM provider. Injected so tests can script failures.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Raw model identifiers offered to this credential.
    async fn list_models(&self, api_key: &SecretString) -> std::result::Result<Vec<String>, UpstreamError>;

    async fn generate(
        &self,
        api_key: &SecretString,
        model: &str,
        request: &GenerationRequest,
    ) -> std::result::Result<String, UpstreamError>;
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelInfo {
    name: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

/// Google Generative Language API client.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: String,
    connect_timeout: Duration,
}

impl GeminiClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
        let http = Client::builder()
            .connect_timeout(connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .build()
            .map_err(|e| AppError::HttpClient {
                message: format!("Failed to build upstream HTTP client: {e}"),
            })?;

        info!(base_url = %config.base_url, "Upstream HTTP client created");
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            connect_timeout,
        })
    }

    /// Only connect timeouts surface here; the orchestrator bounds whole calls.
    fn map_transport_error(&self, e: reqwest::Error) -> UpstreamError {
        self.transport_failure(e.is_timeout(), e.to_string())
    }

    fn transport_failure(&self, timed_out: bool, message: String) -> UpstreamError {
        if timed_out {
            UpstreamError::Timeout(self.connect_timeout)
        } else {
            UpstreamError::Network { message }
        }
    }

    async fn error_from_response(response: reqwest::Response) -> UpstreamError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        UpstreamError::classify(status, &body)
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn list_models(&self, api_key: &SecretString) -> std::result::Result<Vec<String>, UpstreamError> {
        let url = format!("{}/v1beta/models", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("pageSize", "1000")])
            .header(API_KEY_HEADER, api_key.expose_secret())
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let list: ModelList = response.json().await.map_err(|e| UpstreamError::Invalid {
            message: format!("model listing: {e}"),
        })?;

        let names = list
            .models
            .into_iter()
            .filter(|m| {
                m.supported_generation_methods.is_empty()
                    || m.supported_generation_methods.iter().any(|g| g == "generateContent")
            })
            .map(|m| m.name)
            .collect::<Vec<_>>();
        debug!(count = names.len(), "Fetched upstream model listing");
        Ok(names)
    }

    async fn generate(
        &self,
        api_key: &SecretString,
        model: &str,
        request: &GenerationRequest,
    ) -> std::result::Result<String, UpstreamError> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);
        let response = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, api_key.expose_secret())
            .json(&request.to_gemini_body())
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !response.status().is_success() {
            let err = Self::error_from_response(response).await;
            warn!(model = model, error = %err, "Upstream call failed");
            return Err(err);
        }

        let body: Value = response.json().await.map_err(|e| UpstreamError::Invalid {
            message: e.to_string(),
        })?;
        extract_reply_text(&body)
    }
}

/// Concatenates the text parts of the first candidate.
fn extract_reply_text(body: &Value) -> std::result::Result<String, UpstreamError> {
    let text = body
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default();

    if !text.trim().is_empty() {
        return Ok(text.trim().to_string());
    }

    let reason = body
        .pointer("/promptFeedback/blockReason")
        .or_else(|| body.pointer("/candidates/0/finishReason"))
        .and_then(Value::as_str)
        .unwrap_or("empty response");
    Err(UpstreamError::Invalid {
        message: format!("no text in response ({reason})"),
    })
}
