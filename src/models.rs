// src/models.rs

use crate::config::ModelFilter;
use crate::upstream::LlmClient;
use parking_lot::Mutex;
use secrecy::SecretString;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct KeyModelState {
    /// Where the next scan starts; the key's current model index.
    cursor: usize,
    /// Last failure per model id.
    failures: HashMap<String, Instant>,
}

/// Per-key rotation over the candidate models with a cool-down after failure.
#[derive(Debug)]
pub struct ModelTable {
    models: Vec<String>,
    cooldown: Duration,
    per_key: Mutex<HashMap<usize, KeyModelState>>,
}

impl ModelTable {
    /// An empty candidate list is replaced by `fallback_model`.
    pub fn new(models: Vec<String>, fallback_model: &str, cooldown: Duration) -> Self {
        let models = if models.is_empty() {
            vec![fallback_model.to_string()]
        } else {
            models
        };
        Self {
            models,
            cooldown,
            per_key: Mutex::new(HashMap::new()),
        }
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Position the next [`ModelTable::next_model`] scan for this key starts at.
    pub fn cursor(&self, key_index: usize) -> usize {
        self.per_key
            .lock()
            .get(&key_index)
            .map_or(0, |state| state.cursor)
    }

    /// Next model for `key_index`, skipping models still cooling down.
    ///
    /// If every model is cooling down the key's failure history is dropped and
    /// the first model is returned.
    pub fn next_model(&self, key_index: usize) -> String {
        let now = Instant::now();
        let count = self.models.len();
        let mut table = self.per_key.lock();
        let state = table.entry(key_index).or_default();

        for offset in 0..count {
            let idx = (state.cursor + offset) % count;
            let model = &self.models[idx];
            let cooling = state
                .failures
                .get(model)
                .is_some_and(|failed_at| now.duration_since(*failed_at) < self.cooldown);
            if !cooling {
                state.cursor = (idx + 1) % count;
                return model.clone();
            }
        }

        warn!(key_index, "Every model is cooling down for this key. Resetting its failures.");
        state.failures.clear();
        state.cursor = 1 % count;
        self.models[0].clone()
    }

    pub fn mark_failed(&self, key_index: usize, model: &str) {
        debug!(key_index, model, "Model marked as failed");
        self.per_key
            .lock()
            .entry(key_index)
            .or_default()
            .failures
            .insert(model.to_string(), Instant::now());
    }

    pub fn reset(&self) {
        self.per_key.lock().clear();
    }
}

/// Applies the naming heuristics to a raw model listing.
///
/// Names are stripped of the `models/` prefix, must contain `filter.include`
/// and none of `filter.exclude` (case-insensitive). The result is sorted in
/// descending lexical order, which puts newer model generations first.
pub fn filter_models(names: Vec<String>, filter: &ModelFilter) -> Vec<String> {
    let include = filter.include.to_lowercase();
    let exclude: Vec<String> = filter.exclude.iter().map(|e| e.to_lowercase()).collect();

    let mut models: Vec<String> = names
        .into_iter()
        .map(|n| n.strip_prefix("models/").map(str::to_string).unwrap_or(n))
        .filter(|n| {
            let lower = n.to_lowercase();
            lower.contains(&include) && !exclude.iter().any(|e| lower.contains(e.as_str()))
        })
        .collect();

    models.sort_unstable_by(|a, b| b.cmp(a));
    models.dedup();
    models
}

/// Queries the upstream model listing once and filters it. Any failure, or an
/// empty result, yields the configured fallback model alone.
pub async fn discover_models(
    client: &dyn LlmClient,
    api_key: &SecretString,
    filter: &ModelFilter,
) -> Vec<String> {
    let models = match client.list_models(api_key).await {
        Ok(names) => filter_models(names, filter),
        Err(e) => {
            warn!(error = %e, "Model listing failed. Using fallback model.");
            Vec::new()
        }
    };

    if models.is_empty() {
        info!(model = %filter.fallback_model, "No candidate models discovered. Using fallback model.");
        return vec![filter.fallback_model.clone()];
    }

    info!(models = ?models, "Discovered candidate models");
    models
}
