// tests/upstream_tests.rs

mod common;

use common::{chat_request, send, TestConfigBuilder, STUDENT_TOKEN};
use secrecy::SecretString;
use serde_json::json;
use std::sync::Arc;
use support_chat_router::{
    auth::StaticTokenAuthenticator,
    config::UpstreamConfig,
    create_router,
    store::InMemoryStore,
    upstream::{ChatTurn, FailureCategory, GeminiClient, GenerationRequest, LlmClient, Role},
    AppState,
};
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn client_for(server: &MockServer) -> GeminiClient {
    let config = UpstreamConfig {
        base_url: server.uri(),
        ..UpstreamConfig::default()
    };
    GeminiClient::new(&config).expect("client builds")
}

fn request(message: &str) -> GenerationRequest {
    GenerationRequest {
        system_prompt: "Be supportive.".to_string(),
        history: vec![ChatTurn { role: Role::User, content: "hi".into() }],
        message: message.to_string(),
        max_output_tokens: 500,
        temperature: 0.7,
    }
}

fn reply_body(text: &str) -> serde_json::Value {
    json!({ "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }] })
}

#[tokio::test]
async fn test_generate_sends_key_header_and_generation_config() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemma-3-27b-it:generateContent"))
        .and(header("x-goog-api-key", "test-key-123"))
        .and(body_partial_json(json!({
            "generationConfig": { "maxOutputTokens": 500 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply_body("You are not alone.")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let key = SecretString::new("test-key-123".to_string());
    let text = client
        .generate(&key, "gemma-3-27b-it", &request("I feel low"))
        .await
        .unwrap();

    assert_eq!(text, "You are not alone.");
}

#[tokio::test]
async fn test_generate_classifies_error_statuses() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/quota-model:generateContent"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": { "code": 429, "status": "RESOURCE_EXHAUSTED", "message": "Quota exceeded" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/auth-model:generateContent"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": { "code": 403, "status": "PERMISSION_DENIED", "message": "API key not valid" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/broken-model:generateContent"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let key = SecretString::new("k".to_string());
    let req = request("hello");

    let quota = client.generate(&key, "quota-model", &req).await.unwrap_err();
    assert_eq!(quota.category(), FailureCategory::Quota);
    assert!(quota.to_string().contains("RESOURCE_EXHAUSTED"));

    let auth = client.generate(&key, "auth-model", &req).await.unwrap_err();
    assert_eq!(auth.category(), FailureCategory::Auth);

    let other = client.generate(&key, "broken-model", &req).await.unwrap_err();
    assert_eq!(other.category(), FailureCategory::Other);
    assert!(other.is_retryable());
}

#[tokio::test]
async fn test_list_models_keeps_generation_capable_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1beta/models"))
        .and(header("x-goog-api-key", "k"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [
                { "name": "models/gemma-3-27b-it", "supportedGenerationMethods": ["generateContent"] },
                { "name": "models/text-embedding-004", "supportedGenerationMethods": ["embedContent"] }
            ]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let models = client
        .list_models(&SecretString::new("k".to_string()))
        .await
        .unwrap();

    assert_eq!(models, vec!["models/gemma-3-27b-it"]);
}

#[tokio::test]
async fn test_router_fails_over_to_second_key_through_real_client() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1beta/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{ "name": "models/gemma-3-27b-it", "supportedGenerationMethods": ["generateContent"] }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemma-3-27b-it:generateContent"))
        .and(header("x-goog-api-key", "first-key-0000000"))
        .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemma-3-27b-it:generateContent"))
        .and(header("x-goog-api-key", "second-key-000000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply_body("Let's take it one step at a time.")))
        .expect(1)
        .mount(&server)
        .await;

    let config = TestConfigBuilder::new()
        .with_base_url(server.uri())
        .with_api_key("first-key-0000000")
        .with_api_key("second-key-000000")
        .build();
    let client = Arc::new(GeminiClient::new(&config.upstream).unwrap());
    let state = Arc::new(
        AppState::with_collaborators(
            &config,
            client,
            Arc::new(InMemoryStore::new()),
            Arc::new(StaticTokenAuthenticator::new(&config.auth.tokens)),
        )
        .await,
    );
    let app = create_router(state.clone());

    let (_, body) = send(&app, chat_request(Some(STUDENT_TOKEN), json!({ "message": "I'm overwhelmed" }))).await;

    assert_eq!(body["message"], "Let's take it one step at a time.");
    let statuses = state.router.pool().statuses();
    assert!(!statuses[0].is_active);
    assert!(statuses[1].is_active);
}
