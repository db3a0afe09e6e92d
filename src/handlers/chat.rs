// src/handlers/chat.rs

use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::orchestrator::{ChatReply, ChatRequest};
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use std::sync::Arc;
use tracing::instrument;

/// `POST /chat`. Every handled message answers 200, including degraded replies.
#[instrument(name = "chat", skip_all, fields(user_id = %user.user_id))]
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>> {
    let Json(request) = payload.map_err(|rejection| AppError::InvalidRequest {
        message: rejection.body_text(),
    })?;

    let reply = state.router.handle(&user.user_id, request).await?;
    Ok(Json(reply))
}
