// src/config/validation.rs

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use std::collections::HashSet;
use tracing::{debug, warn};
use url::Url;

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &AppConfig) -> Result<()> {
        debug!("Starting configuration validation");

        if let Err(e) = Self::validate_upstream(config) {
            warn!("Upstream validation failed: {}", e);
            return Err(e);
        }
        debug!("Upstream validation passed");

        if let Err(e) = Self::validate_limits(config) {
            warn!("Limit validation failed: {}", e);
            return Err(e);
        }
        debug!("Limit validation passed");

        if let Err(e) = Self::validate_server_config(config) {
            warn!("Server config validation failed: {}", e);
            return Err(e);
        }

        if let Some(redis_url) = &config.redis_url {
            Self::validate_url(redis_url, "redis_url")?;
        }

        debug!("Configuration validation completed successfully");
        Ok(())
    }

    fn validate_upstream(config: &AppConfig) -> Result<()> {
        Self::validate_url(&config.upstream.base_url, "upstream.base_url")?;

        let mut seen = HashSet::new();
        for key in &config.upstream.api_keys {
            if !seen.insert(key) {
                return Err(AppError::config_validation(
                    format!("Duplicate API key: {}", Self::preview_key(key)),
                    Some("upstream.api_keys"),
                ));
            }
        }

        if config.upstream.request_timeout_secs == 0 {
            return Err(AppError::config_validation(
                "Request timeout cannot be 0",
                Some("upstream.request_timeout_secs"),
            ));
        }

        if config.upstream.model_filter.fallback_model.trim().is_empty() {
            return Err(AppError::config_validation(
                "Fallback model cannot be empty",
                Some("upstream.model_filter.fallback_model"),
            ));
        }

        Ok(())
    }

    fn validate_limits(config: &AppConfig) -> Result<()> {
        let checks = [
            (config.routing.max_concurrent == 0, "routing.max_concurrent"),
            (config.routing.max_keys_per_request == 0, "routing.max_keys_per_request"),
            (config.routing.key_failure_threshold == 0, "routing.key_failure_threshold"),
            (config.routing.max_queue_depth == Some(0), "routing.max_queue_depth"),
            (config.cache.max_entries == 0, "cache.max_entries"),
            (config.rate_limit.max_requests == 0, "rate_limit.max_requests"),
            (config.rate_limit.window_secs == 0, "rate_limit.window_secs"),
        ];

        for (invalid, field) in checks {
            if invalid {
                return Err(AppError::config_validation(
                    format!("{} must be greater than 0", field),
                    Some(field),
                ));
            }
        }
        Ok(())
    }

    fn validate_server_config(config: &AppConfig) -> Result<()> {
        // Allow port 0 in test mode (system will assign a free port)
        if config.server.port == 0 && !config.server.test_mode {
            return Err(AppError::config_validation(
                "Server port cannot be 0 (except in test mode)",
                Some("server.port"),
            ));
        }

        if config.server.max_message_chars == 0 {
            return Err(AppError::config_validation(
                "Maximum message length cannot be 0",
                Some("server.max_message_chars"),
            ));
        }

        Ok(())
    }

    fn validate_url(url_str: &str, field_name: &str) -> Result<()> {
        Url::parse(url_str).map_err(|e| {
            AppError::config_validation(
                format!("Invalid URL in {}: {} - {}", field_name, url_str, e),
                Some(field_name),
            )
        })?;
        Ok(())
    }

    fn preview_key(key: &str) -> String {
        crate::key_pool::preview_key(key)
    }
}
