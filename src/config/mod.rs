// src/config/mod.rs

pub mod app;
pub mod environment;
pub mod loader;
pub mod validation;

pub use app::{
    AppConfig, AuthConfig, CacheConfig, GenerationConfig, ModelFilter, RateLimitConfig,
    RoutingConfig, ServerConfig, UpstreamConfig,
};
pub use environment::{load_api_keys_from_env, EnvironmentConfig};
pub use loader::load_config;
pub use validation::ConfigValidator;
