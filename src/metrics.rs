// src/metrics.rs

//! Prometheus counters for the chat path. Every recorder is a no-op when the
//! `metrics` feature is off.

use std::time::Instant;

#[cfg(feature = "metrics")]
use metrics::{counter, gauge, histogram};
#[cfg(feature = "metrics")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
#[cfg(feature = "metrics")]
use once_cell::sync::OnceCell;

#[cfg(feature = "metrics")]
static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Installs the global Prometheus recorder once. Later calls are no-ops.
#[cfg(feature = "metrics")]
pub fn initialize_metrics() -> crate::error::Result<()> {
    HANDLE.get_or_try_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| crate::error::AppError::internal(format!("failed to install Prometheus recorder: {e}")))
    })?;
    tracing::info!("Prometheus recorder installed");
    Ok(())
}

#[cfg(not(feature = "metrics"))]
pub fn initialize_metrics() -> crate::error::Result<()> {
    Ok(())
}

/// Prometheus text exposition, if the recorder is installed.
#[cfg(feature = "metrics")]
pub fn render() -> Option<String> {
    HANDLE.get().map(PrometheusHandle::render)
}

/// How a chat request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatOutcome {
    Emergency,
    Offline,
    CacheHit,
    Generated,
    Exhausted,
    Rejected,
}

impl ChatOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Emergency => "emergency",
            Self::Offline => "offline",
            Self::CacheHit => "cache_hit",
            Self::Generated => "generated",
            Self::Exhausted => "exhausted",
            Self::Rejected => "rejected",
        }
    }
}

pub fn record_chat_outcome(outcome: ChatOutcome) {
    #[cfg(feature = "metrics")]
    counter!("support_chat_requests_total", "outcome" => outcome.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = outcome;
}

pub fn record_upstream_attempt(model: &str, result: &'static str) {
    #[cfg(feature = "metrics")]
    counter!("support_chat_upstream_attempts_total", "model" => model.to_string(), "result" => result)
        .increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = (model, result);
}

pub fn record_admission(in_flight: usize, waiting: usize) {
    #[cfg(feature = "metrics")]
    {
        gauge!("support_chat_upstream_in_flight").set(in_flight as f64);
        gauge!("support_chat_admission_waiting").set(waiting as f64);
    }
    #[cfg(not(feature = "metrics"))]
    let _ = (in_flight, waiting);
}

pub fn record_request_end(start_time: Instant, status_code: u16, path: &str) {
    #[cfg(feature = "metrics")]
    {
        let duration = start_time.elapsed().as_secs_f64();
        counter!("support_chat_http_requests_total", "status" => status_code.to_string(), "path" => path.to_string())
            .increment(1);
        histogram!("support_chat_http_request_duration_seconds", "path" => path.to_string()).record(duration);
    }
    #[cfg(not(feature = "metrics"))]
    let _ = (start_time, status_code, path);
}
