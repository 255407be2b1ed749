use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use crate::item::{Item, ItemKey, ItemPatch, ListParams, NewItem, Reprioritized};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Item {id} not found for owner {owner_id}")]
    NotFound { id: i64, owner_id: i64 },
    #[error("Item {id} already exists")]
    AlreadyExists { id: i64 },
    /// Assigning `base + offset` would leave the i64 range; nothing was written.
    #[error("Priority {base} + {offset} is out of range")]
    PriorityOverflow { base: i64, offset: i64 },
    #[error("Store operation '{operation}' timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    /// The transaction failed and was rolled back cleanly.
    #[error("Transaction failed (rolled back): {0}")]
    Transaction(String),
    /// The transaction failed and the rollback failed too; the store state is unknown.
    #[error("Transaction failed: {cause}; rollback also failed: {rollback}")]
    RollbackFailed { cause: String, rollback: String },
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(key: ItemKey) -> Self {
        Self::NotFound {
            id: key.id,
            owner_id: key.owner_id,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// `base + offset`, or [`StoreError::PriorityOverflow`].
pub fn offset_priority(base: i64, offset: i64) -> Result<i64, StoreError> {
    base.checked_add(offset)
        .ok_or(StoreError::PriorityOverflow { base, offset })
}

/// Durable owner of the item table and its priority-ranking rules.
///
/// Every mutation runs in one transaction. Creates are serialized by a
/// table-scoped lock so `max(priority) + 1` can never be computed twice;
/// point mutations lock the target row for the life of the transaction.
#[async_trait]
pub trait RankedStore: Send + Sync {
    /// Page of items in ascending id order (soft-deleted rows included).
    async fn list(&self, params: ListParams) -> Result<Vec<Item>, StoreError>;

    /// Unlocked point read.
    async fn get(&self, key: ItemKey) -> Result<Option<Item>, StoreError>;

    /// Insert with priority `MAX(priority) + 1` (1 on an empty table) under
    /// the sequence lock. Fails with [`StoreError::PriorityOverflow`] when
    /// the maximum is already `i64::MAX`.
    async fn create(&self, item: NewItem) -> Result<Item, StoreError>;

    /// Overwrite fields under the row lock. Does not renumber anything, so a
    /// caller-supplied priority may collide with another item.
    async fn update(&self, key: ItemKey, patch: &ItemPatch) -> Result<Item, StoreError>;

    /// Flip `removed` to true under the row lock; priority is left alone.
    async fn delete(&self, key: ItemKey) -> Result<Item, StoreError>;

    /// Move the item to `new_priority`, then renumber every item with a
    /// greater id to `new_priority + rank` (rank is 1-based, in id order).
    /// Nothing is written if the last rank would leave the i64 range.
    async fn reprioritize(&self, key: ItemKey, new_priority: i64) -> Result<Reprioritized, StoreError>;

    /// Total number of rows.
    async fn count(&self) -> Result<i64, StoreError>;

    /// Number of soft-deleted rows.
    async fn removed_count(&self) -> Result<i64, StoreError>;
}
