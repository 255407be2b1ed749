// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Service operations: cache-aside listing and audited mutations.

use tracing::{debug, error, warn};

use crate::item::{Item, ItemDraft, ItemKey, ItemPatch, ListMeta, ListPage, ListParams, NewItem, Reprioritized};
use crate::metrics::{self, LatencyTimer};
use crate::request::ValidationError;
use crate::storage::traits::StoreError;

use super::list_cache::{decode_page, encode_page, ListKey, LIST_CACHE_TAG};
use super::{RankedItemService, ServiceError};

impl RankedItemService {
    // ═══════════════════════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════════════════════

    /// One page of items (ascending id, soft-deleted included) plus table
    /// counts.
    ///
    /// Served from the cache when a decodable page for this exact window is
    /// present; otherwise read from the store and cached. Cache trouble of
    /// any kind only costs the store round-trip.
    #[tracing::instrument(skip(self), fields(limit = params.limit, offset = params.offset))]
    pub async fn list(&self, params: ListParams) -> Result<ListPage, ServiceError> {
        let _timer = LatencyTimer::new("service", "list");
        let key = ListKey::from(params).to_string();

        if let Some(page) = self.cached_page(&key).await {
            metrics::record_operation("list", "success");
            return Ok(page);
        }

        let page = observe("list", self.load_page(params).await)?;
        self.populate(&key, &page).await;
        Ok(page)
    }

    /// Uncached point read.
    #[tracing::instrument(skip(self), fields(id = key.id, owner_id = key.owner_id))]
    pub async fn get(&self, key: ItemKey) -> Result<Option<Item>, ServiceError> {
        let _timer = LatencyTimer::new("service", "get");
        observe("get", self.store.get(key).await)
    }

    async fn cached_page(&self, key: &str) -> Option<ListPage> {
        match self.cache_call("get", self.cache.get(key)).await {
            Ok(Some(bytes)) => match decode_page(&bytes) {
                Ok(page) => {
                    metrics::record_cache_lookup("hit");
                    debug!(key, "Listing cache hit");
                    Some(page)
                }
                Err(e) => {
                    metrics::record_cache_lookup("error");
                    warn!(key, error = %e, "Discarding undecodable listing page");
                    None
                }
            },
            Ok(None) => {
                metrics::record_cache_lookup("miss");
                debug!(key, "Listing cache miss");
                None
            }
            Err(e) => {
                metrics::record_cache_lookup("error");
                warn!(key, error = %e, "Listing cache read failed, using store");
                None
            }
        }
    }

    async fn load_page(&self, params: ListParams) -> Result<ListPage, StoreError> {
        let _timer = LatencyTimer::new("store", "list");
        let (goods, total, removed) = tokio::try_join!(
            self.store.list(params),
            self.store.count(),
            self.store.removed_count(),
        )?;
        metrics::set_row_counts(total, removed);

        Ok(ListPage {
            meta: ListMeta {
                total,
                removed,
                limit: params.limit,
                offset: params.offset,
            },
            goods,
        })
    }

    async fn populate(&self, key: &str, page: &ListPage) {
        let bytes = match encode_page(page) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "Failed to encode listing page");
                return;
            }
        };

        let ttl = self.list_ttl;
        if let Err(e) = self
            .cache_call("put", self.cache.put_tagged(LIST_CACHE_TAG, key, &bytes, ttl))
            .await
        {
            metrics::record_error("cache", "put", "backend");
            warn!(key, error = %e, "Failed to cache listing page");
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Mutations
    // ═══════════════════════════════════════════════════════════════════════════

    /// Append a new item at `max(priority) + 1`.
    #[tracing::instrument(skip(self, draft), fields(id = draft.id, owner_id = draft.owner_id))]
    pub async fn create(&self, draft: ItemDraft) -> Result<Item, ServiceError> {
        let _timer = LatencyTimer::new("service", "create");
        check("create", draft.owner_id > 0, "projectId", "projectId is required")?;
        check("create", !draft.name.is_empty(), "name", "name is required")?;
        check("create", draft.id != 0, "id", "id is required")?;

        let item = observe("create", self.store.create(NewItem::from_draft(draft)).await)?;
        self.after_commit(&item).await;
        Ok(item)
    }

    /// Soft-delete. The returned row shows `removed = true` and its
    /// untouched priority.
    #[tracing::instrument(skip(self), fields(id = key.id, owner_id = key.owner_id))]
    pub async fn delete(&self, key: ItemKey) -> Result<Item, ServiceError> {
        let _timer = LatencyTimer::new("service", "delete");
        let item = observe("delete", self.store.delete(key).await)?;
        self.after_commit(&item).await;
        Ok(item)
    }

    /// Overwrite fields. `priority` is written as given, without renumbering.
    #[tracing::instrument(skip(self, patch), fields(id = key.id, owner_id = key.owner_id))]
    pub async fn update(&self, key: ItemKey, patch: ItemPatch) -> Result<Item, ServiceError> {
        let _timer = LatencyTimer::new("service", "update");
        check("update", !patch.name.is_empty(), "name", "name is required")?;
        check("update", patch.priority != 0, "priority", "priority field is required")?;
        check(
            "update",
            patch.owner_id != 0,
            "projectId",
            "projectId field is required or cannot be equal to 0",
        )?;

        let item = observe("update", self.store.update(key, &patch).await)?;
        self.after_commit(&item).await;
        Ok(item)
    }

    /// Move the item to `new_priority` and renumber every later id behind it.
    #[tracing::instrument(skip(self), fields(id = key.id, owner_id = key.owner_id))]
    pub async fn reprioritize(&self, key: ItemKey, new_priority: i64) -> Result<Reprioritized, ServiceError> {
        let _timer = LatencyTimer::new("service", "reprioritize");
        check("reprioritize", new_priority != 0, "newPriority", "newPriority field is required")?;

        let result = observe("reprioritize", self.store.reprioritize(key, new_priority).await)?;
        metrics::record_renumbered(result.priorities.len());
        self.after_commit(&result.item).await;
        Ok(result)
    }

    /// Audit the committed row, then drop every cached listing page before
    /// the mutation reports success.
    async fn after_commit(&self, item: &Item) {
        self.audit.publish(item);

        match self.cache_call("purge", self.cache.purge_tag(LIST_CACHE_TAG)).await {
            Ok(purged) => {
                metrics::record_cache_invalidation(purged, true);
                debug!(purged, "Listing cache invalidated");
            }
            Err(e) => {
                metrics::record_cache_invalidation(0, false);
                warn!(error = %e, "Listing cache invalidation failed");
            }
        }
    }
}

fn check(operation: &'static str, ok: bool, field: &'static str, message: &str) -> Result<(), ServiceError> {
    if ok {
        return Ok(());
    }
    metrics::record_operation(operation, "rejected");
    Err(ValidationError::new(field, message).into())
}

/// Record the outcome of a store call and lift it into a [`ServiceError`].
fn observe<T>(operation: &'static str, result: Result<T, StoreError>) -> Result<T, ServiceError> {
    match result {
        Ok(value) => {
            metrics::record_operation(operation, "success");
            Ok(value)
        }
        Err(e) => {
            let err = ServiceError::from(e);
            match err {
                ServiceError::NotFound { .. }
                | ServiceError::AlreadyExists { .. }
                | ServiceError::Validation(_) => {
                    metrics::record_operation(operation, "rejected");
                    debug!(operation, error = %err, "Store rejected operation");
                }
                _ => {
                    metrics::record_operation(operation, "error");
                    metrics::record_error("store", operation, err.kind());
                    error!(operation, error = %err, "Store operation failed");
                }
            }
            Err(err)
        }
    }
}
