// src/store/mod.rs

//! Persistence for the care collaborators the router talks to: risk flags
//! raised for counselor follow-up and the latest screening result per user.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use memory::InMemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFlagType {
    AiKeyword,
    ForumRisk,
    SelfReport,
    ScreeningHighRisk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// A record for counselor follow-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskFlag {
    pub id: Uuid,
    pub user_id: String,
    pub flag_type: RiskFlagType,
    pub severity: RiskSeverity,
    pub context: String,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

impl RiskFlag {
    pub fn new(
        user_id: impl Into<String>,
        flag_type: RiskFlagType,
        severity: RiskSeverity,
        context: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            flag_type,
            severity,
            context: context.into(),
            resolved: false,
            created_at: Utc::now(),
        }
    }
}

/// The most recent screening outcome for a user, attached to chat replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreeningSeverity {
    pub test_type: String,
    pub severity: String,
    pub completed_at: DateTime<Utc>,
}

#[async_trait]
pub trait CareStore: Send + Sync {
    async fn record_risk_flag(&self, flag: RiskFlag) -> Result<()>;

    /// Latest screening for `user_id` by completion time.
    async fn latest_severity(&self, user_id: &str) -> Result<Option<ScreeningSeverity>>;

    /// Newest first.
    async fn list_risk_flags(&self, unresolved_only: bool) -> Result<Vec<RiskFlag>>;

    /// Marks a flag resolved. `AppError::NotFound` for an unknown id.
    async fn resolve_risk_flag(&self, id: Uuid) -> Result<RiskFlag>;

    async fn record_screening(&self, user_id: &str, screening: ScreeningSeverity) -> Result<()>;
}
