//! Error handling module
//!
//! Every fallible operation in the crate returns [`AppError`]. Handlers turn it
//! into an RFC 7807 Problem Details body; internal failures are logged with
//! full detail and reach the client only as a generic message.
//!
//! Upstream (LLM provider) failures are deliberately *not* part of this type:
//! they are absorbed by the orchestrator and surface as conversational
//! replies, see [`crate::upstream::UpstreamError`].

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

/// Standard error response format following RFC 7807 Problem Details
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// A URI reference that identifies the problem type
    #[serde(rename = "type")]
    pub error_type: String,

    /// A short, human-readable summary of the problem type
    pub title: String,

    /// The HTTP status code
    pub status: u16,

    /// A human-readable explanation specific to this occurrence
    pub detail: String,

    /// A URI reference that identifies the specific occurrence
    pub instance: String,

    /// Request ID for tracing
    pub request_id: Option<String>,
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    // Configuration errors
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String, line: Option<usize> },

    // Storage errors
    #[error("Redis connection failed: {message}")]
    RedisConnection { message: String },

    #[error("Storage persistence failed: {message}")]
    StoragePersistence { message: String },

    // HTTP client setup
    #[error("HTTP client error: {message}")]
    HttpClient { message: String },

    // Request errors
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Validation failed: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    // Authentication and authorization
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Authorization failed: insufficient permissions")]
    Authorization,

    // Throttling and backpressure
    #[error("Rate limit exceeded: {limit} requests per {window_secs}s")]
    RateLimit {
        limit: u32,
        window_secs: u64,
        retry_after_secs: u64,
    },

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    // System errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("IO operation failed: {operation} - {message}")]
    Io { operation: String, message: String },
}

impl AppError {
    /// Create a new configuration validation error
    pub fn config_validation(message: impl Into<String>, field: Option<impl Into<String>>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
            field: field.map(Into::into),
        }
    }

    /// Create a new internal error with context
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } | Self::Validation { .. } => StatusCode::BAD_REQUEST,

            Self::Authentication { .. } => StatusCode::UNAUTHORIZED,

            Self::Authorization => StatusCode::FORBIDDEN,

            Self::NotFound { .. } => StatusCode::NOT_FOUND,

            Self::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,

            Self::ServiceUnavailable { .. } | Self::RedisConnection { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            Self::ConfigValidation { .. }
            | Self::ConfigNotFound { .. }
            | Self::ConfigParse { .. }
            | Self::StoragePersistence { .. }
            | Self::HttpClient { .. }
            | Self::Internal { .. }
            | Self::Serialization { .. }
            | Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type URI for RFC 7807 compliance
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::ConfigValidation { .. } | Self::ConfigNotFound { .. } | Self::ConfigParse { .. } => {
                "https://support-chat-router.dev/errors/configuration"
            }
            Self::RedisConnection { .. } | Self::StoragePersistence { .. } => {
                "https://support-chat-router.dev/errors/storage"
            }
            Self::Authentication { .. } | Self::Authorization => {
                "https://support-chat-router.dev/errors/authentication"
            }
            Self::RateLimit { .. } => "https://support-chat-router.dev/errors/rate-limit",
            Self::ServiceUnavailable { .. } => "https://support-chat-router.dev/errors/unavailable",
            Self::Validation { .. } | Self::InvalidRequest { .. } => {
                "https://support-chat-router.dev/errors/validation"
            }
            Self::NotFound { .. } => "https://support-chat-router.dev/errors/not-found",
            _ => "https://support-chat-router.dev/errors/internal",
        }
    }

    /// Get a human-readable title for the error
    pub fn title(&self) -> &'static str {
        match self.status_code() {
            StatusCode::BAD_REQUEST => "Validation Error",
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => "Authentication Error",
            StatusCode::NOT_FOUND => "Not Found",
            StatusCode::TOO_MANY_REQUESTS => "Rate Limit Exceeded",
            StatusCode::SERVICE_UNAVAILABLE => "Service Unavailable",
            _ => "Internal Server Error",
        }
    }

    /// Detail string safe to show a client. Server-side failures never leak
    /// their message.
    pub fn public_detail(&self) -> String {
        match self {
            Self::RateLimit { retry_after_secs, .. } => format!(
                "Too many messages. Please wait about {} minute(s) before trying again.",
                retry_after_secs.div_ceil(60).max(1)
            ),
            Self::ServiceUnavailable { .. } => {
                "The support assistant is busy right now. Please try again in a moment.".to_string()
            }
            _ if self.status_code().is_server_error() => {
                "An unexpected error occurred. Please try again later.".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Log the error with appropriate level
    pub fn log(&self, request_id: Option<&str>) {
        let request_id = request_id.unwrap_or("unknown");

        if self.status_code().is_server_error() {
            error!(
                error = %self,
                request_id = request_id,
                error_type = self.error_type(),
                "Application error occurred"
            );
        } else {
            warn!(
                error = %self,
                request_id = request_id,
                error_type = self.error_type(),
                "Client error occurred"
            );
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();

        self.log(Some(&request_id));

        let status = self.status_code();
        let error_response = ErrorResponse {
            error_type: self.error_type().to_string(),
            title: self.title().to_string(),
            status: status.as_u16(),
            detail: self.public_detail(),
            instance: format!("/errors/{}", request_id),
            request_id: Some(request_id),
        };

        let mut response = (status, Json(error_response)).into_response();
        if let Self::RateLimit { retry_after_secs, .. } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            operation: "io".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() {
            Self::RedisConnection {
                message: err.to_string(),
            }
        } else {
            Self::StoragePersistence {
                message: err.to_string(),
            }
        }
    }
}

#[cfg(feature = "redis")]
impl From<deadpool_redis::PoolError> for AppError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::RedisConnection {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "redis")]
impl From<deadpool_redis::CreatePoolError> for AppError {
    fn from(err: deadpool_redis::CreatePoolError) -> Self {
        Self::RedisConnection {
            message: format!("failed to create pool: {err}"),
        }
    }
}

/// Result type alias for the application
pub type Result<T, E = AppError> = std::result::Result<T, E>;
