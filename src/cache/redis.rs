// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis cache backend.
//!
//! Values are plain STRINGs written with `SETEX`. Tag groups are Redis SETs
//! (`{prefix}tag:{tag}`) holding the unprefixed member keys, so a purge is
//! `SMEMBERS` followed by one pipelined `DEL`.

use std::time::Duration;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, pipe, AsyncCommands, Client};
use tracing::{debug, info};
use crate::resilience::retry::{retry, RetryConfig};
use super::{CacheError, CacheStore};

pub struct RedisCache {
    connection: ConnectionManager,
    /// Optional key prefix for namespacing (e.g., "shop:" → "shop:goods:list:10:1")
    prefix: String,
}

impl RedisCache {
    /// Create a new Redis cache without a key prefix.
    pub async fn new(connection_string: &str) -> Result<Self, CacheError> {
        Self::with_prefix(connection_string, None).await
    }

    /// Create a new Redis cache with an optional key prefix.
    ///
    /// ```rust,no_run
    /// # use ranked_store::cache::redis::RedisCache;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let cache = RedisCache::with_prefix("redis://localhost", Some("shop:")).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_prefix(connection_string: &str, prefix: Option<&str>) -> Result<Self, CacheError> {
        let client = Client::open(connection_string)
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: redis::RedisError| CacheError::Backend(e.to_string()))?;

        info!(prefix = prefix.unwrap_or(""), "Redis cache connected");
        Ok(Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
        })
    }

    #[inline]
    fn prefixed_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", self.prefix, key)
        }
    }

    #[inline]
    fn tag_key(&self, tag: &str) -> String {
        format!("{}tag:{}", self.prefix, tag)
    }

    /// Get a clone of the connection manager (shared with the audit stream sink)
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    /// Get the configured prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// `SETEX` rejects zero, and sub-second TTLs round up.
fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 { secs + 1 } else { secs.max(1) }
}

fn backend(context: &str, e: redis::RedisError) -> CacheError {
    CacheError::Backend(format!("{}: {}", context, e))
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.connection.clone();
        conn.get(self.prefixed_key(key))
            .await
            .map_err(|e| backend("GET failed", e))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(self.prefixed_key(key), value, ttl_secs(ttl))
            .await
            .map_err(|e| backend("SETEX failed", e))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(self.prefixed_key(key))
            .await
            .map_err(|e| backend("DEL failed", e))
    }

    async fn put_tagged(&self, tag: &str, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let tag_key = self.tag_key(tag);
        let ttl = ttl_secs(ttl);

        // The tag SET outlives its members by at most one TTL
        let mut pipeline = pipe();
        pipeline
            .atomic()
            .cmd("SETEX").arg(self.prefixed_key(key)).arg(ttl).arg(value).ignore()
            .cmd("SADD").arg(&tag_key).arg(key).ignore()
            .cmd("EXPIRE").arg(&tag_key).arg(ttl).ignore();

        pipeline
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| backend("Tagged SETEX failed", e))
    }

    async fn purge_tag(&self, tag: &str) -> Result<usize, CacheError> {
        let mut conn = self.connection.clone();
        let tag_key = self.tag_key(tag);

        let keys: Vec<String> = cmd("SMEMBERS")
            .arg(&tag_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend("Failed to get tag members", e))?;

        let mut pipeline = pipe();
        for key in &keys {
            pipeline.del(self.prefixed_key(key)).ignore();
        }
        pipeline.del(&tag_key).ignore();

        pipeline
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| backend("Failed to purge tag", e))?;

        debug!(tag, purged = keys.len(), "Purged cache tag");
        Ok(keys.len())
    }
}
