// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache layer for listing pages.
//!
//! Byte-valued key/value storage with per-key expiry. Keys can also be
//! tagged into a group so one call drops every page derived from the same
//! table.
//!
//! - [`redis::RedisCache`]: shared cache backed by Redis
//! - [`memory::InMemoryCache`]: process-local cache for tests and embedding
//!
//! Nothing here is load-bearing: callers treat every [`CacheError`] as a
//! miss and go to the store.

pub mod memory;
pub mod redis;

use std::time::Duration;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),
    #[error("Cache operation '{operation}' timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("Cached value could not be decoded: {0}")]
    Codec(String),
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value` under `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// [`set`](Self::set), then record `key` as a member of `tag`.
    async fn put_tagged(&self, tag: &str, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    /// Delete every key recorded under `tag`, and the tag itself.
    /// Returns how many keys were dropped.
    async fn purge_tag(&self, tag: &str) -> Result<usize, CacheError>;
}
