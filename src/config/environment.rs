//! Environment-based configuration management

use serde::{Deserialize, Serialize};
use std::env;

/// Highest numbered fallback key, `GEMINI_API_KEY_9`.
pub const MAX_FALLBACK_KEYS: usize = 9;

/// Environment configuration that can override file-based config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub server_port: Option<u16>,
    pub admin_token: Option<String>,
    pub redis_url: Option<String>,
    pub crisis_hotline: Option<String>,
    pub counseling_email: Option<String>,
    pub counseling_phone: Option<String>,
    pub api_keys: Vec<String>,
}

impl EnvironmentConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            server_port: env::var("PORT").ok().and_then(|s| s.trim().parse().ok()),
            admin_token: non_empty_var("ADMIN_TOKEN"),
            redis_url: non_empty_var("REDIS_URL"),
            crisis_hotline: non_empty_var("CRISIS_HOTLINE"),
            counseling_email: non_empty_var("COUNSELING_EMAIL"),
            counseling_phone: non_empty_var("COUNSELING_PHONE"),
            api_keys: load_api_keys_from_env(),
        }
    }

    /// Check if any environment overrides are present
    pub fn has_overrides(&self) -> bool {
        !self.override_summary().is_empty()
    }

    /// Names of the variables that will override the file config. Never the values.
    pub fn override_summary(&self) -> Vec<&'static str> {
        let mut overrides = Vec::new();
        if self.server_port.is_some() {
            overrides.push("PORT");
        }
        if self.admin_token.is_some() {
            overrides.push("ADMIN_TOKEN");
        }
        if self.redis_url.is_some() {
            overrides.push("REDIS_URL");
        }
        if self.crisis_hotline.is_some() {
            overrides.push("CRISIS_HOTLINE");
        }
        if self.counseling_email.is_some() {
            overrides.push("COUNSELING_EMAIL");
        }
        if self.counseling_phone.is_some() {
            overrides.push("COUNSELING_PHONE");
        }
        if !self.api_keys.is_empty() {
            overrides.push("GEMINI_API_KEY*");
        }
        overrides
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Load upstream credentials from the environment.
///
/// `GEMINI_API_KEY` is the primary key; `GEMINI_API_KEY_1` through
/// `GEMINI_API_KEY_9` are fallbacks. Gaps in the numbering are skipped and
/// duplicates are dropped while keeping the first occurrence.
pub fn load_api_keys_from_env() -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();

    let names = std::iter::once("GEMINI_API_KEY".to_string())
        .chain((1..=MAX_FALLBACK_KEYS).map(|i| format!("GEMINI_API_KEY_{i}")));

    for name in names {
        if let Some(key) = non_empty_var(&name) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }

    keys
}
