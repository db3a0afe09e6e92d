// src/config/loader.rs

use crate::config::{AppConfig, ConfigValidator, EnvironmentConfig};
use crate::error::{AppError, Result};
use std::path::Path;
use tracing::{debug, info, warn};

/// Load configuration from file, then apply environment overrides and validate.
///
/// A missing file is not an error: every field has a default and credentials
/// usually arrive through the environment.
pub fn load_config(config_path: &Path) -> Result<AppConfig> {
    let mut config = if config_path.exists() {
        info!("Loading configuration from file: {}", config_path.display());
        load_from_file(config_path)?
    } else {
        info!("Configuration file not found, using defaults");
        AppConfig::default()
    };

    override_with_env(&mut config, EnvironmentConfig::from_env());

    ConfigValidator::validate(&config)?;

    if !config.has_api_keys() {
        warn!("No upstream API keys configured. Chat replies will use the static supportive message.");
    }

    debug!("Configuration loaded and validated successfully");
    Ok(config)
}

fn load_from_file(config_path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(config_path).map_err(|_| AppError::ConfigNotFound {
        path: config_path.display().to_string(),
    })?;

    if content.trim().is_empty() {
        warn!("Config file '{}' is empty. Using defaults.", config_path.display());
        return Ok(AppConfig::default());
    }

    serde_yaml::from_str(&content).map_err(|e| AppError::ConfigParse {
        message: format!("Failed to parse config file: {}", e),
        line: e.location().map(|loc| loc.line()),
    })
}

/// Environment variables win over the file. Keys from the environment replace
/// the file's key list rather than extending it.
pub fn override_with_env(config: &mut AppConfig, env: EnvironmentConfig) {
    if env.has_overrides() {
        info!(overrides = ?env.override_summary(), "Applying environment overrides");
    }

    if let Some(port) = env.server_port {
        config.server.port = port;
    }
    if let Some(token) = env.admin_token {
        config.server.admin_token = Some(token);
    }
    if let Some(redis_url) = env.redis_url {
        config.redis_url = Some(redis_url);
    }
    if let Some(hotline) = env.crisis_hotline {
        config.emergency.hotline = hotline;
    }
    if let Some(email) = env.counseling_email {
        config.emergency.institution_email = email;
    }
    if let Some(phone) = env.counseling_phone {
        config.emergency.institution_phone = phone;
    }
    if !env.api_keys.is_empty() {
        config.upstream.api_keys = env.api_keys;
    }

    config.upstream.api_keys.retain(|k| !k.trim().is_empty());
}
