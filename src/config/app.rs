// src/config/app.rs

use crate::risk::EmergencyContacts;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, PartialEq, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default)]
    pub admin_token: Option<String>,
    /// Longest accepted chat message, in characters.
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            test_mode: false,
            admin_token: None,
            max_message_chars: default_max_message_chars(),
        }
    }
}

/// Generation settings sent with every chat-completion call.
#[derive(Debug, Deserialize, Clone, PartialEq, Serialize)]
pub struct GenerationConfig {
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Naming heuristics applied to the upstream model listing.
#[derive(Debug, Deserialize, Clone, PartialEq, Serialize)]
pub struct ModelFilter {
    #[serde(default = "default_model_include")]
    pub include: String,
    #[serde(default = "default_model_exclude")]
    pub exclude: Vec<String>,
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,
}

impl Default for ModelFilter {
    fn default() -> Self {
        Self {
            include: default_model_include(),
            exclude: default_model_exclude(),
            fallback_model: default_fallback_model(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Serialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Primary key first, numbered fallbacks after it.
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub model_filter: ModelFilter,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// How many prior conversation turns are forwarded upstream.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_keys: Vec::new(),
            generation: GenerationConfig::default(),
            model_filter: ModelFilter::default(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            history_turns: default_history_turns(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Serialize)]
pub struct RoutingConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// `None` keeps the wait line unbounded.
    #[serde(default)]
    pub max_queue_depth: Option<usize>,
    #[serde(default = "default_max_keys_per_request")]
    pub max_keys_per_request: usize,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_key_failure_threshold")]
    pub key_failure_threshold: u32,
    #[serde(default = "default_key_cooldown")]
    pub key_cooldown_secs: u64,
    #[serde(default = "default_quota_cooldown")]
    pub quota_cooldown_secs: u64,
    #[serde(default = "default_model_cooldown")]
    pub model_cooldown_secs: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_queue_depth: None,
            max_keys_per_request: default_max_keys_per_request(),
            retry_backoff_ms: default_retry_backoff_ms(),
            key_failure_threshold: default_key_failure_threshold(),
            key_cooldown_secs: default_key_cooldown(),
            quota_cooldown_secs: default_quota_cooldown(),
            model_cooldown_secs: default_model_cooldown(),
        }
    }
}

impl RoutingConfig {
    pub fn key_cooldown(&self) -> Duration {
        Duration::from_secs(self.key_cooldown_secs)
    }

    pub fn quota_cooldown(&self) -> Duration {
        Duration::from_secs(self.quota_cooldown_secs)
    }

    pub fn model_cooldown(&self) -> Duration {
        Duration::from_secs(self.model_cooldown_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            max_entries: default_cache_entries(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_requests")]
    pub max_requests: u32,
    #[serde(default = "default_rate_limit_window")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_rate_limit_requests(),
            window_secs: default_rate_limit_window(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default, Serialize)]
pub struct AuthConfig {
    /// Bearer token -> user id.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub emergency: EmergencyContacts,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub redis_key_prefix: Option<String>,
}

impl AppConfig {
    pub fn has_api_keys(&self) -> bool {
        self.upstream.api_keys.iter().any(|k| !k.trim().is_empty())
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_message_chars() -> usize {
    2000
}

fn default_max_output_tokens() -> u32 {
    500
}

fn default_temperature() -> f32 {
    0.7
}

fn default_model_include() -> String {
    "gemma".to_string()
}

fn default_model_exclude() -> Vec<String> {
    ["embedding", "aqa", "imagen", "tts", "vision"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub(crate) fn default_fallback_model() -> String {
    "gemma-3-27b-it".to_string()
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_request_timeout() -> u64 {
    20
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_history_turns() -> usize {
    4
}

fn default_max_concurrent() -> usize {
    3
}

fn default_max_keys_per_request() -> usize {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_key_failure_threshold() -> u32 {
    3
}

fn default_key_cooldown() -> u64 {
    30
}

fn default_quota_cooldown() -> u64 {
    120
}

fn default_model_cooldown() -> u64 {
    300
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_cache_entries() -> usize {
    100
}

fn default_rate_limit_requests() -> u32 {
    30
}

fn default_rate_limit_window() -> u64 {
    15 * 60
}
