// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::HashSet;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use dashmap::DashMap;
use super::{CacheError, CacheStore};

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// Process-local cache with lazy expiry.
///
/// Expired entries are dropped when they are next read.
#[derive(Default)]
pub struct InMemoryCache {
    entries: DashMap<String, Entry>,
    tags: DashMap<String, HashSet<String>>,
}

impl InMemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries (expired ones included until touched).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `key` holds a live value.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.expires_at > Instant::now())
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Ok(Some(entry.value.clone()));
            }
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn put_tagged(&self, tag: &str, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        self.set(key, value, ttl).await?;
        self.tags
            .entry(tag.to_string())
            .or_default()
            .insert(key.to_string());
        Ok(())
    }

    async fn purge_tag(&self, tag: &str) -> Result<usize, CacheError> {
        let Some((_, keys)) = self.tags.remove(tag) else {
            return Ok(0);
        };
        for key in &keys {
            self.entries.remove(key);
        }
        Ok(keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_after_set() {
        let cache = InMemoryCache::new();
        cache.set("k", b"v", Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert!(cache.contains("k"));
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = InMemoryCache::new();
        cache.set("k", b"v", Duration::from_millis(5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let cache = InMemoryCache::new();
        cache.set("k", b"v", Duration::from_secs(60)).await.unwrap();
        cache.delete("k").await.unwrap();
        cache.delete("missing").await.unwrap();

        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_purge_tag_drops_only_members() {
        let cache = InMemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.put_tagged("list", "page:1", b"a", ttl).await.unwrap();
        cache.put_tagged("list", "page:2", b"b", ttl).await.unwrap();
        cache.set("other", b"c", ttl).await.unwrap();

        assert_eq!(cache.purge_tag("list").await.unwrap(), 2);
        assert!(!cache.contains("page:1"));
        assert!(!cache.contains("page:2"));
        assert!(cache.contains("other"));

        assert_eq!(cache.purge_tag("list").await.unwrap(), 0);
    }
}
