// src/orchestrator.rs

//! Request orchestration for the support chat.
//!
//! Every chat message passes through the same fixed sequence: validation,
//! the risk filter, the per-user rate limit, the response cache, admission and
//! finally the key/model candidate loop. Upstream failures never leave this
//! module as errors; they end as a categorized apology in a normal reply.

use crate::admission::{AdmissionError, AdmissionQueue};
use crate::cache::{normalize_key, ResponseCache};
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::key_pool::{KeyPool, KeyPoolConfig, SelectedKey};
use crate::metrics::{self, ChatOutcome};
use crate::models::{discover_models, ModelTable};
use crate::rate_limit::{RateLimited, UserRateLimiter};
use crate::risk::{safety_message, EmergencyContacts, RiskFilter};
use crate::store::{CareStore, RiskFlag, RiskFlagType, RiskSeverity, ScreeningSeverity};
use crate::upstream::{ChatTurn, FailureCategory, GenerationRequest, LlmClient, UpstreamError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Preamble sent ahead of every conversation.
pub const SYSTEM_PROMPT: &str = "You are a warm, supportive wellbeing assistant for university students. \
Listen carefully, validate feelings, and offer practical coping ideas such as breathing exercises, \
grounding techniques, sleep and study routines. You are not a therapist and must not diagnose. \
Encourage the student to reach out to campus counseling for ongoing support. Keep replies short, \
kind and conversational.";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_history: Vec<ChatTurn>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            conversation_history: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub message: String,
    pub is_emergency: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emergency_contacts: Option<EmergencyContacts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screening_context: Option<ScreeningSeverity>,
}

impl ChatReply {
    fn plain(message: String) -> Self {
        Self {
            message,
            is_emergency: false,
            emergency_contacts: None,
            screening_context: None,
        }
    }
}

/// Reply used when no upstream credentials are configured.
pub fn offline_message(contacts: &EmergencyContacts) -> String {
    format!(
        "Thank you for reaching out. The chat assistant isn't available right now, but support is. \
         You can contact the campus counseling team at {phone} or {email}. If things feel overwhelming \
         or unsafe, the crisis helpline is available any time at {hotline}.",
        phone = contacts.institution_phone,
        email = contacts.institution_email,
        hotline = contacts.hotline,
    )
}

/// Apology returned after every candidate failed, worded by the last failure's class.
pub fn exhaustion_message(
    category: FailureCategory,
    contacts: &EmergencyContacts,
    quota_wait: Duration,
) -> String {
    match category {
        FailureCategory::Timeout => "I'm sorry, I'm taking longer than usual to respond right now. \
            Please try sending your message again in a moment."
            .to_string(),
        FailureCategory::Quota => {
            let minutes = quota_wait.as_secs().div_ceil(60).max(1);
            format!(
                "I'm sorry, a lot of students are chatting right now and I've reached my limit for the moment. \
                 Please try again in about {minutes} minute{s}. If you'd like to talk to someone sooner, \
                 the counseling team is available at {phone}.",
                s = if minutes == 1 { "" } else { "s" },
                phone = contacts.institution_phone,
            )
        }
        FailureCategory::Auth => format!(
            "I'm sorry, the chat assistant is temporarily unavailable because of a service configuration \
             problem. The team has been notified. In the meantime you can reach the counseling team at {email}.",
            email = contacts.institution_email,
        ),
        FailureCategory::Other => "I'm sorry, I'm having trouble responding right now. \
            Please try again shortly."
            .to_string(),
    }
}

/// One upstream attempt target.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub key: SelectedKey,
    pub model: String,
}

/// Produces the `(key, model)` pairs a single request may try: at most
/// `max_keys` distinct keys, each paired with every model not cooling down for it.
pub struct CandidatePlan<'a> {
    pool: &'a KeyPool,
    models: &'a ModelTable,
    max_keys: usize,
    tried_keys: Vec<usize>,
    current: Option<SelectedKey>,
    tried_models: Vec<String>,
}

impl<'a> CandidatePlan<'a> {
    pub fn new(pool: &'a KeyPool, models: &'a ModelTable, max_keys: usize) -> Self {
        Self {
            pool,
            models,
            max_keys: max_keys.min(pool.len()),
            tried_keys: Vec::new(),
            current: None,
            tried_models: Vec::new(),
        }
    }

    pub fn next_candidate(&mut self) -> Option<Candidate> {
        loop {
            if let Some(key) = &self.current {
                if self.tried_models.len() < self.models.len() {
                    let model = self.models.next_model(key.index);
                    if !self.tried_models.contains(&model) {
                        self.tried_models.push(model.clone());
                        return Some(Candidate {
                            key: key.clone(),
                            model,
                        });
                    }
                }
                self.current = None;
            }

            if self.tried_keys.len() >= self.max_keys {
                return None;
            }
            let key = self.next_untried_key()?;
            self.tried_keys.push(key.index);
            self.tried_models.clear();
            self.current = Some(key);
        }
    }

    /// Abandons the remaining models of the current key.
    pub fn skip_key(&mut self) {
        self.current = None;
    }

    pub fn keys_tried(&self) -> usize {
        self.tried_keys.len()
    }

    fn next_untried_key(&self) -> Option<SelectedKey> {
        self.pool.select_key_excluding(&self.tried_keys)
    }
}

enum RouteOutcome {
    Reply { text: String },
    Exhausted(FailureCategory),
}

/// Owns the routing state and answers chat messages.
pub struct ChatRouter {
    pool: KeyPool,
    models: ModelTable,
    cache: ResponseCache,
    risk: RiskFilter,
    admission: AdmissionQueue,
    rate_limiter: UserRateLimiter,
    client: Arc<dyn LlmClient>,
    store: Arc<dyn CareStore>,
    contacts: EmergencyContacts,
    max_message_chars: usize,
    max_keys_per_request: usize,
    request_timeout: Duration,
    retry_backoff: Duration,
    quota_cooldown: Duration,
    history_turns: usize,
    max_output_tokens: u32,
    temperature: f32,
}

impl ChatRouter {
    /// Builds the key pool from configuration and discovers candidate models
    /// with the first key. Without keys only the fallback model is registered.
    pub async fn initialize(
        config: &AppConfig,
        client: Arc<dyn LlmClient>,
        store: Arc<dyn CareStore>,
    ) -> Self {
        let pool = KeyPool::new(
            config.upstream.api_keys.clone(),
            KeyPoolConfig::from(&config.routing),
        );
        let filter = &config.upstream.model_filter;

        let discovered = match pool.select_key() {
            Some(first) => discover_models(client.as_ref(), &first.secret, filter).await,
            None => {
                warn!("No upstream API keys configured. Chat will answer with the offline message.");
                Vec::new()
            }
        };
        // Discovery advanced the round-robin cursor.
        pool.reset();

        let models = ModelTable::new(
            discovered,
            &filter.fallback_model,
            config.routing.model_cooldown(),
        );
        info!(
            keys = pool.len(),
            models = ?models.models(),
            max_concurrent = config.routing.max_concurrent,
            "Chat router initialized"
        );

        Self {
            pool,
            models,
            cache: ResponseCache::from_config(&config.cache),
            risk: RiskFilter::default(),
            admission: AdmissionQueue::new(
                config.routing.max_concurrent,
                config.routing.max_queue_depth,
            ),
            rate_limiter: UserRateLimiter::from_config(&config.rate_limit),
            client,
            store,
            contacts: config.emergency.clone(),
            max_message_chars: config.server.max_message_chars,
            max_keys_per_request: config.routing.max_keys_per_request,
            request_timeout: Duration::from_secs(config.upstream.request_timeout_secs),
            retry_backoff: config.routing.retry_backoff(),
            quota_cooldown: config.routing.quota_cooldown(),
            history_turns: config.upstream.history_turns,
            max_output_tokens: config.upstream.generation.max_output_tokens,
            temperature: config.upstream.generation.temperature,
        }
    }

    /// Stops admitting upstream work and drops cached replies.
    pub fn shutdown(&self) {
        self.admission.close();
        self.cache.clear();
        info!("Chat router shut down");
    }

    pub fn pool(&self) -> &KeyPool {
        &self.pool
    }

    pub fn models(&self) -> &ModelTable {
        &self.models
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn admission(&self) -> &AdmissionQueue {
        &self.admission
    }

    pub fn rate_limiter(&self) -> &UserRateLimiter {
        &self.rate_limiter
    }

    pub fn store(&self) -> &Arc<dyn CareStore> {
        &self.store
    }

    /// Answers one chat message for an authenticated user.
    ///
    /// Only empty messages are rejected ahead of the risk check. Limits and the
    /// cache apply to non-crisis messages.
    #[instrument(skip(self, request))]
    pub async fn handle(&self, user_id: &str, request: ChatRequest) -> Result<ChatReply> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(AppError::validation("message", "Message must not be empty"));
        }

        // Crisis detection sees the whole message, whatever its length.
        if let Some(phrase) = self.risk.matched_phrase(message) {
            let phrase = phrase.to_string();
            return Ok(self.emergency_reply(user_id, &phrase).await);
        }

        self.check_length(&request.message)?;

        self.rate_limiter.check(user_id).map_err(|limited| {
            metrics::record_chat_outcome(ChatOutcome::Rejected);
            rate_limit_error(limited)
        })?;

        if self.pool.is_empty() {
            metrics::record_chat_outcome(ChatOutcome::Offline);
            return Ok(ChatReply::plain(offline_message(&self.contacts)));
        }

        let cache_key = normalize_key(message);
        if let Some(cached) = self.cache.get(&cache_key) {
            metrics::record_chat_outcome(ChatOutcome::CacheHit);
            return Ok(ChatReply::plain(cached));
        }

        let generation = self.generation_request(message, &request.conversation_history);
        let (outcome, screening) = tokio::join!(
            self.route(&generation),
            self.store.latest_severity(user_id)
        );

        match outcome.map_err(admission_error)? {
            RouteOutcome::Reply { text } => {
                self.cache.put(cache_key, text.clone());
                metrics::record_chat_outcome(ChatOutcome::Generated);
                let screening_context = screening.unwrap_or_else(|e| {
                    warn!(error = %e, "Screening lookup failed. Replying without it.");
                    None
                });
                Ok(ChatReply {
                    screening_context,
                    ..ChatReply::plain(text)
                })
            }
            RouteOutcome::Exhausted(category) => {
                warn!(?category, "All upstream candidates failed");
                metrics::record_chat_outcome(ChatOutcome::Exhausted);
                Ok(ChatReply::plain(exhaustion_message(
                    category,
                    &self.contacts,
                    self.quota_cooldown,
                )))
            }
        }
    }

    fn check_length(&self, message: &str) -> Result<()> {
        if message.chars().count() > self.max_message_chars {
            return Err(AppError::validation(
                "message",
                format!("Message must be at most {} characters", self.max_message_chars),
            ));
        }
        Ok(())
    }

    async fn emergency_reply(&self, user_id: &str, phrase: &str) -> ChatReply {
        warn!(matched = phrase, "Risk phrase detected. Returning safety response.");
        let flag = RiskFlag::new(user_id, RiskFlagType::AiKeyword, RiskSeverity::Critical, phrase);
        if let Err(e) = self.store.record_risk_flag(flag).await {
            e.log(None);
        }
        metrics::record_chat_outcome(ChatOutcome::Emergency);

        ChatReply {
            message: safety_message(&self.contacts),
            is_emergency: true,
            emergency_contacts: Some(self.contacts.clone()),
            screening_context: None,
        }
    }

    fn generation_request(&self, message: &str, history: &[ChatTurn]) -> GenerationRequest {
        let skip = history.len().saturating_sub(self.history_turns);
        GenerationRequest {
            system_prompt: SYSTEM_PROMPT.to_string(),
            history: history[skip..].to_vec(),
            message: message.to_string(),
            max_output_tokens: self.max_output_tokens,
            temperature: self.temperature,
        }
    }

    async fn route(&self, request: &GenerationRequest) -> std::result::Result<RouteOutcome, AdmissionError> {
        let _permit = self.admission.acquire().await?;
        metrics::record_admission(self.admission.in_flight(), self.admission.waiting());

        let mut plan = CandidatePlan::new(&self.pool, &self.models, self.max_keys_per_request);
        let mut last_failure = FailureCategory::Other;

        while let Some(candidate) = plan.next_candidate() {
            match self.attempt(&candidate, request).await {
                Ok(text) => {
                    self.pool.report_success(candidate.key.index);
                    metrics::record_upstream_attempt(&candidate.model, "success");
                    info!(
                        api_key.preview = %candidate.key.preview,
                        model = %candidate.model,
                        "Upstream reply received"
                    );
                    return Ok(RouteOutcome::Reply { text });
                }
                Err(err) => {
                    warn!(
                        api_key.preview = %candidate.key.preview,
                        model = %candidate.model,
                        error = %err,
                        "Upstream attempt failed"
                    );
                    last_failure = err.category();
                    self.pool.report_failure(candidate.key.index, &err);

                    if err.is_quota() || err.is_auth() {
                        metrics::record_upstream_attempt(&candidate.model, if err.is_quota() { "quota" } else { "auth" });
                        plan.skip_key();
                    } else {
                        metrics::record_upstream_attempt(&candidate.model, "error");
                        self.models.mark_failed(candidate.key.index, &candidate.model);
                    }
                }
            }
        }

        debug!(keys_tried = plan.keys_tried(), "Candidate plan exhausted");
        Ok(RouteOutcome::Exhausted(last_failure))
    }

    /// One call plus, for transient failures, a single retry after the backoff.
    async fn attempt(
        &self,
        candidate: &Candidate,
        request: &GenerationRequest,
    ) -> std::result::Result<String, UpstreamError> {
        match self.call_once(candidate, request).await {
            Err(err) if err.is_retryable() => {
                debug!(model = %candidate.model, error = %err, "Retrying upstream call once");
                tokio::time::sleep(self.retry_backoff).await;
                self.call_once(candidate, request).await
            }
            other => other,
        }
    }

    async fn call_once(
        &self,
        candidate: &Candidate,
        request: &GenerationRequest,
    ) -> std::result::Result<String, UpstreamError> {
        let call = self
            .client
            .generate(candidate.key.secret.as_ref(), &candidate.model, request);
        tokio::time::timeout(self.request_timeout, call)
            .await
            .unwrap_or(Err(UpstreamError::Timeout(self.request_timeout)))
    }
}

fn rate_limit_error(limited: RateLimited) -> AppError {
    let retry_after = limited.retry_after;
    AppError::RateLimit {
        limit: limited.limit,
        window_secs: limited.window.as_secs(),
        retry_after_secs: retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0),
    }
}

fn admission_error(err: AdmissionError) -> AppError {
    metrics::record_chat_outcome(ChatOutcome::Rejected);
    let message = match err {
        AdmissionError::Busy { .. } => "upstream admission queue is full",
        AdmissionError::Closed => "router is shutting down",
    };
    AppError::ServiceUnavailable {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::upstream::Role;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use secrecy::{ExposeSecret, SecretString};
    use std::collections::VecDeque;

    type Outcome = std::result::Result<String, UpstreamError>;

    /// Replays scripted outcomes, then repeats `fallback`.
    struct ScriptedClient {
        models: Vec<String>,
        script: Mutex<VecDeque<Outcome>>,
        fallback: Outcome,
        hang: bool,
        calls: Mutex<Vec<(String, String)>>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedClient {
        fn new(fallback: Outcome) -> Self {
            Self {
                models: vec!["models/gemma-a".to_string(), "models/gemma-b".to_string()],
                script: Mutex::new(VecDeque::new()),
                fallback,
                hang: false,
                calls: Mutex::new(Vec::new()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn with_script(self, outcomes: Vec<Outcome>) -> Self {
            *self.script.lock() = outcomes.into();
            self
        }

        fn hanging(mut self) -> Self {
            self.hang = true;
            self
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn list_models(&self, _: &SecretString) -> std::result::Result<Vec<String>, UpstreamError> {
            Ok(self.models.clone())
        }

        async fn generate(&self, key: &SecretString, model: &str, request: &GenerationRequest) -> Outcome {
            self.calls
                .lock()
                .push((key.expose_secret().clone(), model.to_string()));
            self.requests.lock().push(request.clone());
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            let next = self.script.lock().pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        }
    }

    fn config(keys: usize) -> AppConfig {
        let mut config = AppConfig::default();
        config.upstream.api_keys = (0..keys).map(|i| format!("test-key-{i:04}")).collect();
        config
    }

    async fn router(config: &AppConfig, client: Arc<ScriptedClient>) -> (ChatRouter, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let router = ChatRouter::initialize(config, client, store.clone()).await;
        (router, store)
    }

    fn quota() -> UpstreamError {
        UpstreamError::Quota { message: "RESOURCE_EXHAUSTED".into() }
    }

    fn server_error() -> UpstreamError {
        UpstreamError::Server { status: 500, message: "internal".into() }
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_bypasses_upstream_and_records_flag() {
        let client = Arc::new(ScriptedClient::new(Ok("hello".into())));
        let (router, store) = router(&config(2), client.clone()).await;

        let reply = router.handle("u1", ChatRequest::new("I want to die")).await.unwrap();

        assert!(reply.is_emergency);
        assert!(reply.message.contains("988"));
        assert!(reply.emergency_contacts.is_some());
        assert_eq!(client.call_count(), 0);

        let flags = store.list_risk_flags(true).await.unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].severity, RiskSeverity::Critical);
        assert_eq!(flags[0].flag_type, RiskFlagType::AiKeyword);
        assert_eq!(flags[0].context, "want to die");
        assert_eq!(flags[0].user_id, "u1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_bypasses_rate_limit() {
        let mut config = config(1);
        config.rate_limit.max_requests = 1;
        let client = Arc::new(ScriptedClient::new(Ok("hello".into())));
        let (router, _) = router(&config, client).await;

        router.handle("u1", ChatRequest::new("hi")).await.unwrap();
        assert!(matches!(
            router.handle("u1", ChatRequest::new("hi again")).await,
            Err(AppError::RateLimit { limit: 1, .. })
        ));
        let reply = router.handle("u1", ChatRequest::new("thinking about suicide")).await.unwrap();
        assert!(reply.is_emergency);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_crisis_message_still_gets_safety_reply() {
        let client = Arc::new(ScriptedClient::new(Ok("hello".into())));
        let (router, store) = router(&config(1), client.clone()).await;

        let message = format!("I want to die. {}", "x".repeat(2500));
        let reply = router.handle("u1", ChatRequest::new(message)).await.unwrap();

        assert!(reply.is_emergency);
        assert_eq!(client.call_count(), 0);
        let flags = store.list_risk_flags(true).await.unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].context, "want to die");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_rate_limit_windows_are_swept() {
        let client = Arc::new(ScriptedClient::new(Ok("hello".into())));
        let (router, _) = router(&config(1), client).await;

        for i in 0..50 {
            router.handle(&format!("student-{i}"), ChatRequest::new("hello")).await.unwrap();
        }
        assert_eq!(router.rate_limiter().tracked_users(), 50);

        tokio::time::advance(Duration::from_secs(3600)).await;
        router.handle("student-late", ChatRequest::new("hello")).await.unwrap();
        assert_eq!(router.rate_limiter().tracked_users(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tried_keys_do_not_advance_rotation() {
        let client = Arc::new(
            ScriptedClient::new(Ok("ok".into())).with_script((0..8).map(|_| Err(server_error())).collect()),
        );
        let (router, _) = router(&config(3), client.clone()).await;
        router.pool().report_failure(2, &quota());

        let first = router.handle("u1", ChatRequest::new("first")).await.unwrap();
        assert!(first.message.contains("trouble responding"));
        router.handle("u1", ChatRequest::new("second")).await.unwrap();

        let calls = client.calls.lock().clone();
        assert_eq!(calls.len(), 9);
        assert_eq!(calls[8].0, "test-key-0000");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_empty_and_oversized_messages() {
        let client = Arc::new(ScriptedClient::new(Ok("hello".into())));
        let (router, _) = router(&config(1), client.clone()).await;

        let oversized = "x".repeat(2001);
        for message in ["", "   \n", oversized.as_str()] {
            let err = router.handle("u1", ChatRequest::new(message)).await.unwrap_err();
            assert!(matches!(err, AppError::Validation { .. }), "{message:?}");
        }
        assert!(router.handle("u1", ChatRequest::new("x".repeat(2000))).await.is_ok());
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_upstream() {
        let client = Arc::new(ScriptedClient::new(Ok("Breathe in for four counts.".into())));
        let (router, _) = router(&config(1), client.clone()).await;

        let first = router.handle("u1", ChatRequest::new("I feel anxious")).await.unwrap();
        let second = router.handle("u2", ChatRequest::new("  i feel ANXIOUS ")).await.unwrap();

        assert_eq!(first.message, second.message);
        assert_eq!(client.call_count(), 1);

        tokio::time::advance(Duration::from_secs(300)).await;
        router.handle("u1", ChatRequest::new("I feel anxious")).await.unwrap();
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_quota_errors_end_in_wait_time_apology() {
        let client = Arc::new(ScriptedClient::new(Err(quota())));
        let (router, _) = router(&config(2), client.clone()).await;

        let reply = router.handle("u1", ChatRequest::new("hello")).await.unwrap();

        assert!(!reply.is_emergency);
        assert!(reply.message.contains("2 minutes"), "{}", reply.message);
        // Quota moves straight to the next key and is never retried in place.
        assert_eq!(client.call_count(), 2);
        assert_eq!(router.pool().active_count(), 0);
        assert!(router.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_is_retried_once_on_same_candidate() {
        let client = Arc::new(
            ScriptedClient::new(Ok("You've got this.".into()))
                .with_script(vec![Err(UpstreamError::Network { message: "reset".into() })]),
        );
        let (router, _) = router(&config(2), client.clone()).await;

        let started = tokio::time::Instant::now();
        let reply = router.handle("u1", ChatRequest::new("hello")).await.unwrap();

        assert_eq!(reply.message, "You've got this.");
        let calls = client.calls.lock().clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_walk_models_then_keys_within_bounds() {
        let client = Arc::new(ScriptedClient::new(Err(server_error())));
        let (router, _) = router(&config(5), client.clone()).await;

        let reply = router.handle("u1", ChatRequest::new("hello")).await.unwrap();
        assert!(reply.message.contains("trouble responding"));

        let calls = client.calls.lock().clone();
        // 3 keys x 2 models x (call + retry)
        assert_eq!(calls.len(), 12);
        let keys: std::collections::HashSet<_> = calls.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys.len(), 3);
        assert_eq!(calls[0].1, "gemma-b");
        assert_eq!(calls[2].1, "gemma-a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_produce_timeout_apology() {
        let client = Arc::new(ScriptedClient::new(Ok("late".into())).hanging());
        let (router, _) = router(&config(1), client.clone()).await;

        let reply = router.handle("u1", ChatRequest::new("hello")).await.unwrap();

        assert!(reply.message.contains("longer than usual"));
        assert_eq!(client.call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_moves_to_next_key() {
        let client = Arc::new(
            ScriptedClient::new(Ok("hi there".into()))
                .with_script(vec![Err(UpstreamError::Auth { message: "API key not valid".into() })]),
        );
        let (router, _) = router(&config(2), client.clone()).await;

        let reply = router.handle("u1", ChatRequest::new("hello")).await.unwrap();
        assert_eq!(reply.message, "hi there");

        let calls = client.calls.lock().clone();
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0].0, calls[1].0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_keys_returns_offline_message() {
        let client = Arc::new(ScriptedClient::new(Ok("unused".into())));
        let (router, _) = router(&config(0), client.clone()).await;

        let reply = router.handle("u1", ChatRequest::new("hello")).await.unwrap();
        assert!(reply.message.contains("counseling@university.edu"));
        assert_eq!(client.call_count(), 0);
        assert_eq!(router.models().models(), ["gemma-3-27b-it".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_is_decorated_with_latest_screening() {
        let client = Arc::new(ScriptedClient::new(Ok("I'm here with you.".into())));
        let (router, store) = router(&config(1), client).await;
        store
            .record_screening(
                "u1",
                ScreeningSeverity {
                    test_type: "GAD-7".into(),
                    severity: "moderate".into(),
                    completed_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let reply = router.handle("u1", ChatRequest::new("hello")).await.unwrap();
        let context = reply.screening_context.unwrap();
        assert_eq!(context.test_type, "GAD-7");

        let json = serde_json::to_value(ChatReply::plain("x".into())).unwrap();
        assert_eq!(json, serde_json::json!({ "message": "x", "isEmergency": false }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_truncated_to_last_turns() {
        let client = Arc::new(ScriptedClient::new(Ok("ok".into())));
        let (router, _) = router(&config(1), client.clone()).await;

        let history = (0..6)
            .map(|i| ChatTurn {
                role: if i % 2 == 0 { Role::User } else { Role::Assistant },
                content: format!("turn {i}"),
            })
            .collect();
        let request = ChatRequest {
            message: "latest".into(),
            conversation_history: history,
        };
        router.handle("u1", request).await.unwrap();

        let sent = client.requests.lock()[0].clone();
        assert_eq!(sent.history.len(), 4);
        assert_eq!(sent.history[0].content, "turn 2");
        assert_eq!(sent.message, "latest");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_rejects_new_upstream_work() {
        let client = Arc::new(ScriptedClient::new(Ok("ok".into())));
        let (router, _) = router(&config(1), client).await;

        router.shutdown();
        let err = router.handle("u1", ChatRequest::new("hello")).await.unwrap_err();
        assert!(matches!(err, AppError::ServiceUnavailable { .. }));
    }

    #[test]
    fn test_exhaustion_messages_are_distinct() {
        let contacts = EmergencyContacts::default();
        let wait = Duration::from_secs(120);
        let messages: std::collections::HashSet<_> = [
            FailureCategory::Timeout,
            FailureCategory::Quota,
            FailureCategory::Auth,
            FailureCategory::Other,
        ]
        .into_iter()
        .map(|c| exhaustion_message(c, &contacts, wait))
        .collect();
        assert_eq!(messages.len(), 4);
    }
}
