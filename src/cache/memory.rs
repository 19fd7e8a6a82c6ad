//! In-process user cache with expiry.

use super::{CacheError, UserCache, user_key};
use crate::db::User;
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// User cache kept in a `DashMap`. Expired entries are dropped lazily on read
/// and in bulk by [`MemoryCache::prune_expired`].
pub struct MemoryCache {
    entries: DashMap<String, (User, Instant)>,
    ttl: Duration,
}

impl MemoryCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires)| *expires > now);
        before - self.entries.len()
    }

    /// Number of cached users, expired or not.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl UserCache for MemoryCache {
    async fn get(&self, email: &str) -> Result<Option<User>, CacheError> {
        let key = user_key(email);
        let hit = self
            .entries
            .get(&key)
            .map(|entry| (entry.0.clone(), entry.1));
        match hit {
            Some((user, expires)) if expires > Instant::now() => Ok(Some(user)),
            Some(_) => {
                self.entries.remove(&key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, user: &User) -> Result<(), CacheError> {
        self.entries.insert(
            user_key(&user.email),
            (user.clone(), Instant::now() + self.ttl),
        );
        Ok(())
    }

    async fn evict(&self, email: &str) -> Result<(), CacheError> {
        self.entries.remove(&user_key(email));
        Ok(())
    }
}
