// src/store/redis.rs

use crate::error::{AppError, Result};
use crate::store::{CareStore, RiskFlag, ScreeningSeverity};
use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Connection as RedisConnection, Pool, Runtime};
use redis::AsyncCommands;
use tracing::{info, trace};
use uuid::Uuid;

const RISK_FLAGS_KEY: &str = "risk_flags";
const SCREENING_KEY: &str = "screening";

/// Redis-backed store. Risk flags live in one hash keyed by flag id, the latest
/// screening per user under its own string key; values are JSON.
pub struct RedisStore {
    pool: Pool,
    key_prefix: String,
}

impl RedisStore {
    pub async fn connect(url: &str, key_prefix: Option<String>) -> Result<Self> {
        let pool = PoolConfig::from_url(url).create_pool(Some(Runtime::Tokio1))?;
        let store = Self::new(pool, key_prefix);

        let mut conn = store.get_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(key_prefix = %store.key_prefix, "Connected to Redis care store");
        Ok(store)
    }

    pub fn new(pool: Pool, key_prefix: Option<String>) -> Self {
        Self {
            pool,
            key_prefix: key_prefix.unwrap_or_else(|| "support_chat:".to_string()),
        }
    }

    fn prefix_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn get_connection(&self) -> Result<RedisConnection> {
        self.pool.get().await.map_err(Into::into)
    }
}

#[async_trait]
impl CareStore for RedisStore {
    async fn record_risk_flag(&self, flag: RiskFlag) -> Result<()> {
        trace!(flag_id = %flag.id, "RedisStore::record_risk_flag");
        let mut conn = self.get_connection().await?;
        let value = serde_json::to_string(&flag)?;
        let _: () = conn
            .hset(self.prefix_key(RISK_FLAGS_KEY), flag.id.to_string(), value)
            .await?;
        Ok(())
    }

    async fn latest_severity(&self, user_id: &str) -> Result<Option<ScreeningSeverity>> {
        let mut conn = self.get_connection().await?;
        let raw: Option<String> = conn
            .get(self.prefix_key(&format!("{SCREENING_KEY}:{user_id}")))
            .await?;
        raw.map(|s| serde_json::from_str(&s).map_err(Into::into))
            .transpose()
    }

    async fn list_risk_flags(&self, unresolved_only: bool) -> Result<Vec<RiskFlag>> {
        let mut conn = self.get_connection().await?;
        let values: Vec<String> = conn.hvals(self.prefix_key(RISK_FLAGS_KEY)).await?;
        trace!("RedisStore::list_risk_flags: found {} flags", values.len());

        let mut flags = values
            .iter()
            .map(|v| serde_json::from_str::<RiskFlag>(v))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        flags.retain(|f| !unresolved_only || !f.resolved);
        flags.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(flags)
    }

    async fn resolve_risk_flag(&self, id: Uuid) -> Result<RiskFlag> {
        let mut conn = self.get_connection().await?;
        let hash_key = self.prefix_key(RISK_FLAGS_KEY);
        let raw: Option<String> = conn.hget(&hash_key, id.to_string()).await?;
        let raw = raw.ok_or_else(|| AppError::NotFound {
            resource: format!("risk flag {id}"),
        })?;

        let mut flag: RiskFlag = serde_json::from_str(&raw)?;
        flag.resolved = true;
        let _: () = conn
            .hset(&hash_key, id.to_string(), serde_json::to_string(&flag)?)
            .await?;
        Ok(flag)
    }

    async fn record_screening(&self, user_id: &str, screening: ScreeningSeverity) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let key = self.prefix_key(&format!("{SCREENING_KEY}:{user_id}"));

        let current: Option<String> = conn.get(&key).await?;
        if let Some(current) = current {
            let current: ScreeningSeverity = serde_json::from_str(&current)?;
            if current.completed_at > screening.completed_at {
                return Ok(());
            }
        }
        let _: () = conn.set(&key, serde_json::to_string(&screening)?).await?;
        Ok(())
    }
}
