use crate::error::{EngineError, EngineResult};
use crate::models::{DailyPick, UserId};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use redis::AsyncCommands;
use std::sync::Arc;

/// Stores each user's daily pick until the next rollover.
#[async_trait]
pub trait PickCache: Send + Sync {
    async fn get(&self, user_id: UserId, day: NaiveDate) -> EngineResult<Option<DailyPick>>;

    async fn put(&self, pick: &DailyPick, expires_at: DateTime<Utc>) -> EngineResult<()>;
}

pub struct RedisPickCache {
    client: Arc<redis::Client>,
    key_prefix: String,
}

impl RedisPickCache {
    pub fn new(client: Arc<redis::Client>, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    fn key(&self, user_id: UserId, day: NaiveDate) -> String {
        format!("{}:daily_pick:{}:{}", self.key_prefix, user_id, day.format("%Y-%m-%d"))
    }
}

#[async_trait]
impl PickCache for RedisPickCache {
    async fn get(&self, user_id: UserId, day: NaiveDate) -> EngineResult<Option<DailyPick>> {
        let mut conn = self.client.get_async_connection().await?;
        let cached: Option<String> = conn.get(self.key(user_id, day)).await?;
        match cached {
            Some(json) => match serde_json::from_str::<DailyPick>(&json) {
                Ok(pick) => Ok(Some(pick)),
                Err(e) => {
                    tracing::warn!(user_id = %user_id, "Discarding undecodable cached pick: {}", e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn put(&self, pick: &DailyPick, expires_at: DateTime<Utc>) -> EngineResult<()> {
        let ttl = (expires_at - Utc::now()).num_seconds().max(1) as u64;
        let json = serde_json::to_string(pick).map_err(|e| EngineError::Internal(e.to_string()))?;
        let mut conn = self.client.get_async_connection().await?;
        let _: () = conn.set_ex(self.key(pick.user_id, pick.day), json, ttl).await?;
        Ok(())
    }
}

/// Process-local cache. Entries from earlier days are dropped on write.
#[derive(Default)]
pub struct InMemoryPickCache {
    picks: DashMap<UserId, DailyPick>,
}

impl InMemoryPickCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PickCache for InMemoryPickCache {
    async fn get(&self, user_id: UserId, day: NaiveDate) -> EngineResult<Option<DailyPick>> {
        Ok(self
            .picks
            .get(&user_id)
            .filter(|pick| pick.day == day)
            .map(|pick| pick.clone()))
    }

    async fn put(&self, pick: &DailyPick, _expires_at: DateTime<Utc>) -> EngineResult<()> {
        self.picks.insert(pick.user_id, pick.clone());
        Ok(())
    }
}
