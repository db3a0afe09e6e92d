// src/key_pool.rs

use crate::config::RoutingConfig;
use crate::upstream::UpstreamError;
use parking_lot::Mutex;
use secrecy::SecretString;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Masks a credential for logs and admin output.
pub fn preview_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    } else {
        "****".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPoolConfig {
    /// Non-quota failures before a key is benched.
    pub failure_threshold: u32,
    pub error_cooldown: Duration,
    pub quota_cooldown: Duration,
}

impl Default for KeyPoolConfig {
    fn default() -> Self {
        Self::from(&RoutingConfig::default())
    }
}

impl From<&RoutingConfig> for KeyPoolConfig {
    fn from(cfg: &RoutingConfig) -> Self {
        Self {
            failure_threshold: cfg.key_failure_threshold,
            error_cooldown: cfg.key_cooldown(),
            quota_cooldown: cfg.quota_cooldown(),
        }
    }
}

/// One upstream credential and its health.
#[derive(Debug)]
pub struct ApiKeyHandle {
    index: usize,
    secret: Arc<SecretString>,
    preview: String,
    is_active: bool,
    error_count: u32,
    last_error: Option<String>,
    /// Set while inactive; the key is reactivated on the first selection at or after it.
    eligible_at: Option<Instant>,
}

impl ApiKeyHandle {
    fn new(index: usize, key: String) -> Self {
        Self {
            index,
            preview: preview_key(&key),
            secret: Arc::new(SecretString::new(key)),
            is_active: true,
            error_count: 0,
            last_error: None,
            eligible_at: None,
        }
    }

    fn deactivate(&mut self, until: Instant) {
        self.is_active = false;
        self.eligible_at = Some(until);
    }

    fn reset(&mut self) {
        self.is_active = true;
        self.error_count = 0;
        self.last_error = None;
        self.eligible_at = None;
    }

    fn selected(&self) -> SelectedKey {
        SelectedKey {
            index: self.index,
            secret: self.secret.clone(),
            preview: self.preview.clone(),
        }
    }
}

/// A key handed out by [`KeyPool::select_key`]. Outcomes are reported back by index.
#[derive(Debug, Clone)]
pub struct SelectedKey {
    pub index: usize,
    pub secret: Arc<SecretString>,
    pub preview: String,
}

/// Admin view of a key. Carries no key material.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeyStatus {
    pub index: usize,
    pub preview: String,
    pub is_active: bool,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub reactivates_in_secs: Option<u64>,
}

#[derive(Debug)]
struct PoolInner {
    keys: Vec<ApiKeyHandle>,
    cursor: usize,
}

impl PoolInner {
    fn reactivate_due(&mut self, now: Instant) {
        for key in self.keys.iter_mut().filter(|k| !k.is_active) {
            if key.eligible_at.is_some_and(|at| at <= now) {
                key.reset();
                info!(api_key.preview = %key.preview, "API key cool-down elapsed, reactivated");
            }
        }
    }
}

/// Round-robin pool of upstream credentials with timed exclusion on failure.
#[derive(Debug)]
pub struct KeyPool {
    inner: Mutex<PoolInner>,
    config: KeyPoolConfig,
}

impl KeyPool {
    pub fn new(keys: Vec<String>, config: KeyPoolConfig) -> Self {
        let keys = keys
            .into_iter()
            .filter(|k| !k.trim().is_empty())
            .enumerate()
            .map(|(i, k)| ApiKeyHandle::new(i, k))
            .collect::<Vec<_>>();
        info!(keys.count = keys.len(), "Key pool initialized");

        Self {
            inner: Mutex::new(PoolInner { keys, cursor: 0 }),
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.reactivate_due(Instant::now());
        inner.keys.iter().filter(|k| k.is_active).count()
    }

    /// Next active key by round-robin.
    ///
    /// When every key is benched the whole pool is reset and the first key is
    /// returned, so a request always has something to try. `None` only for an
    /// empty pool.
    pub fn select_key(&self) -> Option<SelectedKey> {
        self.select_key_excluding(&[])
    }

    /// Like [`select_key`](Self::select_key), but never returns an index in
    /// `excluded` and leaves the cursor alone when it skips one. Returns `None`
    /// when the only active keys are excluded.
    pub fn select_key_excluding(&self, excluded: &[usize]) -> Option<SelectedKey> {
        let mut inner = self.inner.lock();
        let count = inner.keys.len();
        if count == 0 {
            return None;
        }

        inner.reactivate_due(Instant::now());

        for offset in 0..count {
            let idx = (inner.cursor + offset) % count;
            if inner.keys[idx].is_active && !excluded.contains(&idx) {
                inner.cursor = (idx + 1) % count;
                let selected = inner.keys[idx].selected();
                debug!(api_key.preview = %selected.preview, index = idx, "Selected API key (round-robin)");
                return Some(selected);
            }
        }

        if inner.keys.iter().any(|k| k.is_active) {
            return None;
        }

        warn!(keys.count = count, "All API keys are inactive. Resetting the pool.");
        for key in inner.keys.iter_mut() {
            key.reset();
        }
        let idx = (0..count).find(|i| !excluded.contains(i))?;
        inner.cursor = (idx + 1) % count;
        Some(inner.keys[idx].selected())
    }

    #[instrument(level = "debug", skip(self, error))]
    pub fn report_failure(&self, index: usize, error: &UpstreamError) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let Some(key) = inner.keys.get_mut(index) else {
            warn!(index, "Failure reported for unknown key index");
            return;
        };

        key.last_error = Some(error.to_string());

        if error.is_quota() {
            key.deactivate(now + self.config.quota_cooldown);
            warn!(
                api_key.preview = %key.preview,
                cooldown_secs = self.config.quota_cooldown.as_secs(),
                "API key hit quota. Deactivated."
            );
            return;
        }

        key.error_count += 1;
        if key.error_count >= self.config.failure_threshold {
            key.deactivate(now + self.config.error_cooldown);
            warn!(
                api_key.preview = %key.preview,
                failures = key.error_count,
                cooldown_secs = self.config.error_cooldown.as_secs(),
                "API key reached failure threshold. Deactivated."
            );
        } else {
            debug!(api_key.preview = %key.preview, failures = key.error_count, "API key failure recorded");
        }
    }

    pub fn report_success(&self, index: usize) {
        if let Some(key) = self.inner.lock().keys.get_mut(index) {
            key.error_count = 0;
            key.last_error = None;
        }
    }

    /// Reactivates every key and clears all error state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        for key in inner.keys.iter_mut() {
            key.reset();
        }
        inner.cursor = 0;
        info!("Key pool reset");
    }

    pub fn statuses(&self) -> Vec<KeyStatus> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.reactivate_due(now);
        inner
            .keys
            .iter()
            .map(|k| KeyStatus {
                index: k.index,
                preview: k.preview.clone(),
                is_active: k.is_active,
                error_count: k.error_count,
                last_error: k.last_error.clone(),
                reactivates_in_secs: k
                    .eligible_at
                    .map(|at| at.saturating_duration_since(now).as_secs()),
            })
            .collect()
    }
}
