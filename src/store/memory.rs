// src/store/memory.rs

use crate::error::{AppError, Result};
use crate::store::{CareStore, RiskFlag, ScreeningSeverity};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::trace;
use uuid::Uuid;

/// Process-local store used when no Redis URL is configured.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    flags: RwLock<Vec<RiskFlag>>,
    screenings: RwLock<HashMap<String, ScreeningSeverity>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CareStore for InMemoryStore {
    async fn record_risk_flag(&self, flag: RiskFlag) -> Result<()> {
        trace!(flag_id = %flag.id, "InMemoryStore::record_risk_flag");
        self.flags.write().await.push(flag);
        Ok(())
    }

    async fn latest_severity(&self, user_id: &str) -> Result<Option<ScreeningSeverity>> {
        Ok(self.screenings.read().await.get(user_id).cloned())
    }

    async fn list_risk_flags(&self, unresolved_only: bool) -> Result<Vec<RiskFlag>> {
        let flags = self.flags.read().await;
        let mut out: Vec<RiskFlag> = flags
            .iter()
            .filter(|f| !unresolved_only || !f.resolved)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn resolve_risk_flag(&self, id: Uuid) -> Result<RiskFlag> {
        let mut flags = self.flags.write().await;
        let flag = flags
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| AppError::NotFound {
                resource: format!("risk flag {id}"),
            })?;
        flag.resolved = true;
        Ok(flag.clone())
    }

    async fn record_screening(&self, user_id: &str, screening: ScreeningSeverity) -> Result<()> {
        let mut screenings = self.screenings.write().await;
        let newer = screenings
            .get(user_id)
            .map_or(true, |current| screening.completed_at >= current.completed_at);
        if newer {
            screenings.insert(user_id.to_string(), screening);
        }
        Ok(())
    }
}
