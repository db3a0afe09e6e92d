//! Common test utilities and fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use support_chat_router::{
    auth::StaticTokenAuthenticator,
    config::AppConfig,
    create_router,
    store::InMemoryStore,
    upstream::{GenerationRequest, LlmClient, UpstreamError},
    AppState,
};
use tower::ServiceExt;

pub const STUDENT_TOKEN: &str = "student-token-1";
pub const STUDENT_ID: &str = "student-1";
pub const ADMIN_TOKEN: &str = "admin-secret-token";

/// Test configuration builder
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.server.test_mode = true;
        config.server.admin_token = Some(ADMIN_TOKEN.to_string());
        config
            .auth
            .tokens
            .insert(STUDENT_TOKEN.to_string(), STUDENT_ID.to_string());
        Self { config }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.upstream.api_keys.push(key.into());
        self
    }

    pub fn with_api_keys(mut self, count: usize) -> Self {
        for i in 0..count {
            self.config.upstream.api_keys.push(format!("test-key-{i:04}-abcdef"));
        }
        self
    }

    pub fn with_user(mut self, token: &str, user_id: &str) -> Self {
        self.config
            .auth
            .tokens
            .insert(token.to_string(), user_id.to_string());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.upstream.base_url = url.into();
        self
    }

    pub fn with_rate_limit(mut self, max_requests: u32) -> Self {
        self.config.rate_limit.max_requests = max_requests;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

type Outcome = Result<String, UpstreamError>;

/// Upstream double: replays a script of outcomes, then repeats a fixed one.
pub struct FakeLlm {
    models: Vec<String>,
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeLlm {
    pub fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self::new(Ok(text.to_string())))
    }

    pub fn failing(error: UpstreamError) -> Arc<Self> {
        Arc::new(Self::new(Err(error)))
    }

    pub fn new(fallback: Outcome) -> Self {
        Self {
            models: vec!["models/gemma-3-27b-it".to_string(), "models/gemma-3-12b-it".to_string()],
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_script(self, outcomes: Vec<Outcome>) -> Arc<Self> {
        *self.script.lock() = outcomes.into();
        Arc::new(self)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl LlmClient for FakeLlm {
    async fn list_models(&self, _: &SecretString) -> Result<Vec<String>, UpstreamError> {
        Ok(self.models.clone())
    }

    async fn generate(&self, key: &SecretString, model: &str, _: &GenerationRequest) -> Outcome {
        self.calls
            .lock()
            .push((key.expose_secret().clone(), model.to_string()));
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Router wired to the given upstream double and a fresh in-memory store.
pub async fn build_app(config: &AppConfig, client: Arc<FakeLlm>) -> (Router, Arc<AppState>) {
    let store = Arc::new(InMemoryStore::new());
    let authenticator = Arc::new(StaticTokenAuthenticator::new(&config.auth.tokens));
    let state = Arc::new(AppState::with_collaborators(config, client, store, authenticator).await);
    (create_router(state.clone()), state)
}

pub fn chat_request(token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/chat")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn admin_request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("x-admin-token", token);
    }
    builder.body(Body::empty()).unwrap()
}

/// Sends one request and decodes the JSON body (`Value::Null` when empty).
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}
