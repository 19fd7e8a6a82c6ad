//! Redis-backed user cache.

use super::{CacheError, UserCache, user_key};
use crate::db::User;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, IntoConnectionInfo};
use tracing::info;

/// User cache stored in Redis with a per-key TTL.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    ttl_secs: u64,
}

impl RedisCache {
    /// Connect to Redis. The connection manager reconnects on its own after failures.
    pub async fn connect(
        info: impl IntoConnectionInfo,
        ttl_secs: u64,
    ) -> Result<Self, CacheError> {
        let client = redis::Client::open(info)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Redis cache connected");
        Ok(Self { conn, ttl_secs })
    }
}

#[async_trait]
impl UserCache for RedisCache {
    async fn get(&self, email: &str) -> Result<Option<User>, CacheError> {
        let mut conn = self.conn.clone();
        let cached: Option<String> = conn.get(user_key(email)).await?;
        match cached {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, user: &User) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let serialized = serde_json::to_string(user)?;
        conn.set_ex::<_, _, ()>(user_key(&user.email), serialized, self.ttl_secs)
            .await?;
        Ok(())
    }

    async fn evict(&self, email: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(user_key(email)).await?;
        Ok(())
    }
}
