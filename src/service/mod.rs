// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Ranked item service.
//!
//! The [`RankedItemService`] ties the components together:
//! - the durable [`RankedStore`] owning rows and priorities
//! - the listing [`CacheStore`], read-aside with per-window keys
//! - the [`AuditPublisher`], fed after every commit
//!
//! # Write Path
//!
//! ```text
//! validate → store (one transaction) → audit (spawned) → purge listing pages → return
//! ```
//!
//! # Read Path
//!
//! ```text
//! list → cache hit? ──yes──→ return cached page
//!             │ miss / error / undecodable
//!             ▼
//!        store (page + counts) → cache page → return
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use ranked_store::{InMemoryCache, InMemoryStore, ItemDraft, ListParams, RankedItemService};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let service = RankedItemService::new(Arc::new(InMemoryStore::new()), Arc::new(InMemoryCache::new()));
//!
//! let apples = service.create(ItemDraft::new(1, 7, "Apples")).await.unwrap();
//! assert_eq!(apples.priority, 1);
//!
//! let page = service.list(ListParams::default()).await.unwrap();
//! assert_eq!(page.meta.total, 1);
//! # }
//! ```

mod api;
pub mod list_cache;
mod types;

pub use list_cache::{ListKey, LIST_CACHE_TAG};
pub use types::ServiceError;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use crate::audit::redis_stream::RedisStreamSink;
use crate::audit::AuditPublisher;
use crate::cache::memory::InMemoryCache;
use crate::cache::redis::RedisCache;
use crate::cache::{CacheError, CacheStore};
use crate::config::RankedStoreConfig;
use crate::metrics;
use crate::storage::sql::SqlStore;
use crate::storage::traits::RankedStore;

pub struct RankedItemService {
    store: Arc<dyn RankedStore>,
    cache: Arc<dyn CacheStore>,
    audit: AuditPublisher,
    cache_timeout: Duration,
    list_ttl: Duration,
}

impl RankedItemService {
    /// Wire a service over existing backends, with default timeouts and no
    /// audit publishing.
    pub fn new(store: Arc<dyn RankedStore>, cache: Arc<dyn CacheStore>) -> Self {
        let defaults = RankedStoreConfig::default();
        Self {
            store,
            cache,
            audit: AuditPublisher::disabled(),
            cache_timeout: defaults.cache_timeout(),
            list_ttl: defaults.list_cache_ttl(),
        }
    }

    #[must_use]
    pub fn with_audit(mut self, audit: AuditPublisher) -> Self {
        self.audit = audit;
        self
    }

    #[must_use]
    pub fn with_cache_timeout(mut self, timeout: Duration) -> Self {
        self.cache_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_list_ttl(mut self, ttl: Duration) -> Self {
        self.list_ttl = ttl;
        self
    }

    /// Connect every backend named by `config`.
    ///
    /// Without `redis_url` the listing cache lives in process and audit
    /// events are dropped.
    #[tracing::instrument(skip(config), fields(has_redis = config.redis_url.is_some()))]
    pub async fn connect(config: &RankedStoreConfig) -> Result<Self, ServiceError> {
        config
            .validate()
            .map_err(|e| ServiceError::Connect(e.to_string()))?;

        let started = Instant::now();
        let store = SqlStore::with_limits(&config.sql_url, config.sql_max_connections, config.store_timeout())
            .await
            .map_err(|e| {
                metrics::set_backend_healthy("sql", false);
                ServiceError::Connect(e.to_string())
            })?;
        metrics::set_backend_healthy("sql", true);
        metrics::record_startup_phase("sql_connect", started.elapsed());

        let (cache, audit): (Arc<dyn CacheStore>, AuditPublisher) = match config.redis_url.as_deref() {
            Some(url) => {
                let started = Instant::now();
                let redis = RedisCache::with_prefix(url, config.redis_prefix.as_deref())
                    .await
                    .map_err(|e| {
                        metrics::set_backend_healthy("redis", false);
                        ServiceError::Connect(e.to_string())
                    })?;
                metrics::set_backend_healthy("redis", true);
                metrics::record_startup_phase("redis_connect", started.elapsed());

                let sink = RedisStreamSink::new(
                    redis.connection(),
                    config.redis_prefix.as_deref(),
                    config.audit_stream_maxlen,
                );
                let audit = AuditPublisher::new(Arc::new(sink), config.audit_topic.clone(), config.audit_timeout());
                (Arc::new(redis), audit)
            }
            None => {
                info!("No Redis configured: in-process listing cache, audit disabled");
                (Arc::new(InMemoryCache::new()), AuditPublisher::disabled())
            }
        };

        info!(dialect = ?store.dialect(), audit = audit.is_enabled(), "Ranked item service ready");
        Ok(Self::new(Arc::new(store), cache)
            .with_audit(audit)
            .with_cache_timeout(config.cache_timeout())
            .with_list_ttl(config.list_cache_ttl()))
    }

    /// The durable store behind this service.
    pub fn store(&self) -> &Arc<dyn RankedStore> {
        &self.store
    }

    /// Run a cache call under the cache deadline.
    async fn cache_call<T, F>(&self, operation: &'static str, fut: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        match tokio::time::timeout(self.cache_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                metrics::record_timeout("cache", operation);
                Err(CacheError::Timeout {
                    operation,
                    after: self.cache_timeout,
                })
            }
        }
    }
}
