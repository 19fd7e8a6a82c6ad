//! Cache of authenticated user records.
//!
//! Every authenticated request resolves its bearer token to a [`User`]. The
//! record is cached under `user:{email}` as JSON for a bounded time so the
//! database is only consulted on a miss.
//!
//! Cache failures never fail a request: they are logged and treated as a
//! miss (on read) or ignored (on write).

mod memory;
mod redis;

pub use self::memory::MemoryCache;
pub use self::redis::RedisCache;

use crate::db::User;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Cache errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Shared handle to the configured cache.
pub type SharedCache = Arc<dyn UserCache>;

/// Key under which a user record is stored.
pub fn user_key(email: &str) -> String {
    format!("user:{email}")
}

/// Time-bounded store of user records keyed by e-mail.
#[async_trait]
pub trait UserCache: Send + Sync {
    async fn get(&self, email: &str) -> Result<Option<User>, CacheError>;
    async fn put(&self, user: &User) -> Result<(), CacheError>;
    async fn evict(&self, email: &str) -> Result<(), CacheError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_format() {
        assert_eq!(user_key("a@example.com"), "user:a@example.com");
    }
}
