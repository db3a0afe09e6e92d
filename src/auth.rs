// src/auth.rs

use crate::error::AppError;
use crate::state::AppState;
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Compares two secrets without short-circuiting on the first differing byte.
pub(crate) fn secure_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.bytes().zip(b.bytes()) {
        result |= byte_a ^ byte_b;
    }
    result == 0
}

/// Resolves a bearer token to the id of the student it belongs to.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Option<String>;
}

/// Fixed token table loaded from configuration.
#[derive(Debug, Default)]
pub struct StaticTokenAuthenticator {
    tokens: Vec<(String, String)>,
}

impl StaticTokenAuthenticator {
    pub fn new(tokens: &HashMap<String, String>) -> Self {
        Self {
            tokens: tokens
                .iter()
                .filter(|(token, _)| !token.trim().is_empty())
                .map(|(token, user)| (token.clone(), user.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, token: &str) -> Option<String> {
        // Every entry is compared so the lookup time does not depend on which one matches.
        let mut found = None;
        for (candidate, user) in &self.tokens {
            if secure_compare(candidate, token) && found.is_none() {
                found = Some(user.clone());
            }
        }
        found
    }
}

/// The authenticated caller of a chat request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer_token(parts) else {
            debug!("Chat request without bearer token");
            return Err(AppError::Authentication {
                message: "missing bearer token".to_string(),
            });
        };

        match state.authenticator.authenticate(token).await {
            Some(user_id) => Ok(AuthUser { user_id }),
            None => {
                warn!("Chat request with unknown bearer token");
                Err(AppError::Authentication {
                    message: "invalid bearer token".to_string(),
                })
            }
        }
    }
}
