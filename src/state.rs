// src/state.rs

use crate::auth::{Authenticator, StaticTokenAuthenticator};
use crate::config::AppConfig;
use crate::error::Result;
use crate::orchestrator::ChatRouter;
use crate::store::{CareStore, InMemoryStore};
use crate::upstream::{GeminiClient, LlmClient};
use std::sync::Arc;
use tracing::info;

/// Shared state handed to every axum handler.
pub struct AppState {
    pub config: AppConfig,
    pub router: ChatRouter,
    pub authenticator: Arc<dyn Authenticator>,
}

impl AppState {
    /// Wires the production collaborators: the Gemini client, the configured
    /// care store and the static token table.
    pub async fn new(config: &AppConfig) -> Result<Self> {
        info!("Creating shared AppState: building HTTP client and care store...");
        let client: Arc<dyn LlmClient> = Arc::new(GeminiClient::new(&config.upstream)?);
        let store = build_store(config).await?;
        let authenticator = Arc::new(StaticTokenAuthenticator::new(&config.auth.tokens));

        Ok(Self::with_collaborators(config, client, store, authenticator).await)
    }

    /// Builds state around injected collaborators.
    pub async fn with_collaborators(
        config: &AppConfig,
        client: Arc<dyn LlmClient>,
        store: Arc<dyn CareStore>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        let router = ChatRouter::initialize(config, client, store).await;
        Self {
            config: config.clone(),
            router,
            authenticator,
        }
    }
}

#[cfg(feature = "redis")]
async fn build_store(config: &AppConfig) -> Result<Arc<dyn CareStore>> {
    match config.redis_url.as_deref() {
        Some(url) => {
            let store =
                crate::store::RedisStore::connect(url, config.redis_key_prefix.clone()).await?;
            Ok(Arc::new(store))
        }
        None => {
            info!("No Redis URL configured. Risk flags and screenings are kept in memory.");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

#[cfg(not(feature = "redis"))]
async fn build_store(config: &AppConfig) -> Result<Arc<dyn CareStore>> {
    if config.redis_url.is_some() {
        tracing::warn!("A Redis URL is configured but the `redis` feature is disabled. Using the in-memory store.");
    }
    Ok(Arc::new(InMemoryStore::new()))
}
