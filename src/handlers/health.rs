// src/handlers/health.rs

use crate::state::AppState;
use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: &'static str,
    pub keys: usize,
    pub active_keys: usize,
    pub models: Vec<String>,
}

/// `GET /health`. Reports `degraded` when no key can currently serve traffic.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    let pool = state.router.pool();
    let active_keys = pool.active_count();
    Json(HealthStatus {
        status: if active_keys > 0 { "ok" } else { "degraded" },
        keys: pool.len(),
        active_keys,
        models: state.router.models().models().to_vec(),
    })
}
