// src/lib.rs

pub mod admin;
pub mod admission;
pub mod auth;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod key_pool;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod rate_limit;
pub mod risk;
pub mod state;
pub mod store;
pub mod upstream;

use crate::handlers::{chat_handler, health_check};
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method, Request as AxumRequest},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::{path::PathBuf, sync::Arc, time::Instant};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

pub use config::AppConfig;
pub use error::{AppError, Result};
pub use orchestrator::{ChatReply, ChatRequest, ChatRouter};
pub use state::AppState;

/// Request bodies above this size are rejected before JSON parsing.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Builds the axum router for the service.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let router = Router::new()
        .route("/health", get(health_check))
        .route("/chat", post(chat_handler))
        .route("/api/ai/chat", post(chat_handler))
        .merge(admin::admin_routes(state.clone()));

    #[cfg(feature = "metrics")]
    let router = router.route("/metrics", get(metrics_handler));

    router
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state)
}

#[cfg(feature = "metrics")]
async fn metrics_handler() -> axum::response::Response {
    match metrics::render() {
        Some(body) => body.into_response(),
        None => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed",
        )
            .into_response(),
    }
}

/// Adds a request id, a span per request and the `X-Request-ID` response header.
pub async fn trace_requests(
    mut req: AxumRequest<Body>,
    next: axum::middleware::Next,
) -> impl IntoResponse {
    let request_id = Uuid::new_v4();
    let start_time = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let span = info_span!(
        "request",
        request_id = %request_id,
        http.method = %method,
        url.path = %path,
    );

    req.extensions_mut().insert(request_id);

    async move {
        let mut response = next.run(req).await;
        let elapsed = start_time.elapsed();

        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().insert("X-Request-ID", value);
        }

        metrics::record_request_end(start_time, response.status().as_u16(), &path);
        info!(
            http.response.duration = ?elapsed,
            http.status_code = response.status().as_u16(),
            "Finished processing request"
        );

        response
    }
    .instrument(span)
    .await
}

/// Loads configuration, builds the shared state and returns the ready router.
/// The state is returned too so the caller can shut the chat router down.
pub async fn run(config_path_override: Option<PathBuf>) -> Result<(Router, Arc<AppState>)> {
    info!("Starting student support chat router...");

    let app_config = setup_configuration(config_path_override)?;

    if let Err(e) = metrics::initialize_metrics() {
        error!(error = ?e, "Metrics recorder unavailable. Continuing without /metrics data.");
    }

    let app_state = AppState::new(&app_config).await.map_err(|e| {
        error!(error = ?e, "Failed to initialize application state. Exiting.");
        e
    })?;
    let app_state = Arc::new(app_state);
    info!("Application state initialized successfully.");

    let app = create_router(app_state.clone()).layer(axum::middleware::from_fn(trace_requests));

    Ok((app, app_state))
}

/// Loads, validates and logs the application configuration.
fn setup_configuration(config_path_override: Option<PathBuf>) -> Result<AppConfig> {
    let config_path = config_path_override.unwrap_or_else(|| {
        std::env::var("CONFIG_PATH").map_or_else(|_| PathBuf::from("config.yaml"), PathBuf::from)
    });

    let config_path_display = config_path.display().to_string();
    if config_path.exists() {
        info!(config.path = %config_path_display, "Using configuration file");
    } else {
        info!(config.path = %config_path_display, "Optional configuration file not found. Using defaults and environment variables.");
    }

    let app_config = config::load_config(&config_path).map_err(|e| {
        error!(
            config.path = %config_path_display,
            error = ?e,
            "Failed to load or validate configuration. Exiting."
        );
        e
    })?;

    info!(
        config.total_keys = app_config.upstream.api_keys.len(),
        config.max_concurrent = app_config.routing.max_concurrent,
        config.redis = app_config.redis_url.is_some(),
        server.port = app_config.server.port,
        "Configuration loaded and validated successfully."
    );

    Ok(app_config)
}
