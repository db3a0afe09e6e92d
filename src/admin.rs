// src/admin.rs

use crate::auth::secure_compare;
use crate::cache::CacheStats;
use crate::error::{AppError, Result};
use crate::key_pool::KeyStatus;
use crate::state::AppState;
use crate::store::RiskFlag;
use axum::{
    body::Body,
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Every admin route sits behind [`admin_auth_middleware`] under `/admin`.
pub fn admin_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new().nest(
        "/admin",
        Router::new()
            .route("/keys", get(list_keys))
            .route("/keys/reset", post(reset_keys))
            .route("/cache", get(cache_stats).delete(clear_cache))
            .route("/queue", get(queue_status))
            .route("/risk-flags", get(list_risk_flags))
            .route("/risk-flags/:id/resolve", post(resolve_risk_flag))
            .route_layer(middleware::from_fn_with_state(state, admin_auth_middleware)),
    )
}

/// Compares the `x-admin-token` header against the configured admin token.
/// Without a configured token the admin surface is closed.
pub async fn admin_auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response> {
    let expected = state
        .config
        .server
        .admin_token
        .as_deref()
        .filter(|t| !t.is_empty());

    let Some(expected) = expected else {
        warn!("Admin authentication failed: no admin token configured");
        return Err(AppError::Authentication {
            message: "admin access is disabled".to_string(),
        });
    };

    let provided = req
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(token) if secure_compare(token, expected) => {
            debug!("Admin authentication successful");
            Ok(next.run(req).await)
        }
        _ => {
            warn!("Admin authentication failed: invalid or missing token");
            Err(AppError::Authentication {
                message: "invalid admin token".to_string(),
            })
        }
    }
}

/// A key's health plus where its model rotation currently stands.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyOverview {
    #[serde(flatten)]
    pub status: KeyStatus,
    pub current_model_index: usize,
}

fn key_overview(state: &AppState) -> Vec<KeyOverview> {
    let models = state.router.models();
    state
        .router
        .pool()
        .statuses()
        .into_iter()
        .map(|status| KeyOverview {
            current_model_index: models.cursor(status.index),
            status,
        })
        .collect()
}

pub async fn list_keys(State(state): State<Arc<AppState>>) -> Json<Vec<KeyOverview>> {
    Json(key_overview(&state))
}

/// Reactivates every key and forgets all model failures.
pub async fn reset_keys(State(state): State<Arc<AppState>>) -> Json<Vec<KeyOverview>> {
    state.router.pool().reset();
    state.router.models().reset();
    info!("Key pool and model cool-downs reset by admin");
    Json(key_overview(&state))
}

pub async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStats> {
    Json(state.router.cache().stats())
}

pub async fn clear_cache(State(state): State<Arc<AppState>>) -> StatusCode {
    state.router.cache().clear();
    StatusCode::NO_CONTENT
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub capacity: usize,
    pub in_flight: usize,
    pub waiting: usize,
}

pub async fn queue_status(State(state): State<Arc<AppState>>) -> Json<QueueStatus> {
    let admission = state.router.admission();
    Json(QueueStatus {
        capacity: admission.capacity(),
        in_flight: admission.in_flight(),
        waiting: admission.waiting(),
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct RiskFlagQuery {
    #[serde(default)]
    pub unresolved: bool,
}

pub async fn list_risk_flags(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RiskFlagQuery>,
) -> Result<Json<Vec<RiskFlag>>> {
    let flags = state.router.store().list_risk_flags(query.unresolved).await?;
    Ok(Json(flags))
}

pub async fn resolve_risk_flag(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RiskFlag>> {
    let flag = state.router.store().resolve_risk_flag(id).await?;
    info!(flag_id = %id, user_id = %flag.user_id, "Risk flag resolved");
    Ok(Json(flag))
}
