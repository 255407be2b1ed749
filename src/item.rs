// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Ranked item data structures.
//!
//! An [`Item`] (a catalog "good") carries a caller-supplied id, the id of the
//! owning project, display fields, a soft-delete flag and a globally unique
//! integer `priority`. The store owns priority assignment; everything in this
//! module is plain data.
//!
//! # Example
//!
//! ```
//! use ranked_store::{ItemDraft, ListParams};
//!
//! let draft = ItemDraft::new(1, 7, "Apples");
//! assert_eq!(draft.owner_id, 7);
//! assert!(draft.description.is_empty());
//!
//! let params = ListParams::new(0, -3);
//! assert_eq!(params.limit, 10);
//! assert_eq!(params.offset, 1);
//! ```

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Default page size when the caller passes nothing usable.
pub const DEFAULT_LIST_LIMIT: i64 = 10;

/// Default 1-based offset (start of the listing).
pub const DEFAULT_LIST_OFFSET: i64 = 1;

/// A persisted ranked item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub description: String,
    /// Unique rank among all items (owners share one priority space)
    pub priority: i64,
    /// Soft-delete flag; removed items keep their row and priority
    pub removed: bool,
    pub created_at: DateTime<Utc>,
}

impl Item {
    /// The (id, owner) pair addressing this item.
    #[must_use]
    pub fn key(&self) -> ItemKey {
        ItemKey::new(self.id, self.owner_id)
    }
}

/// Address of an item for point mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemKey {
    pub id: i64,
    pub owner_id: i64,
}

impl ItemKey {
    #[must_use]
    pub fn new(id: i64, owner_id: i64) -> Self {
        Self { id, owner_id }
    }
}

impl std::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.owner_id)
    }
}

/// Caller input for creating an item. Priority is never caller-supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDraft {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub description: String,
}

impl ItemDraft {
    pub fn new(id: i64, owner_id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            owner_id,
            name: name.into(),
            description: String::new(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A fully-formed row handed to the store for insertion.
///
/// The store fills in `priority`; `removed` and `created_at` are set by the
/// service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub description: String,
    pub removed: bool,
    pub created_at: DateTime<Utc>,
}

impl NewItem {
    /// Build an active row from a draft, stamped with the current time.
    #[must_use]
    pub fn from_draft(draft: ItemDraft) -> Self {
        Self {
            id: draft.id,
            owner_id: draft.owner_id,
            name: draft.name,
            description: draft.description,
            removed: false,
            created_at: now_millis(),
        }
    }

    /// Materialize the row once the store has chosen its priority.
    #[must_use]
    pub fn into_item(self, priority: i64) -> Item {
        Item {
            id: self.id,
            owner_id: self.owner_id,
            name: self.name,
            description: self.description,
            priority,
            removed: self.removed,
            created_at: self.created_at,
        }
    }
}

/// Field values applied by a plain update.
///
/// Every field except `description` overwrites the stored value.
/// `description: None` keeps the stored text; `Some("")` clears it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemPatch {
    pub owner_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub priority: i64,
    pub removed: bool,
}

impl ItemPatch {
    /// Apply this patch on top of `current`, returning the new row.
    ///
    /// `id` and `created_at` are immutable and always carried over.
    #[must_use]
    pub fn apply_to(&self, current: &Item) -> Item {
        Item {
            id: current.id,
            owner_id: self.owner_id,
            name: self.name.clone(),
            description: self
                .description
                .clone()
                .unwrap_or_else(|| current.description.clone()),
            priority: self.priority,
            removed: self.removed,
            created_at: current.created_at,
        }
    }
}

/// One (id, priority) pair reported by a reprioritize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityEntry {
    pub id: i64,
    pub priority: i64,
}

/// Outcome of a reprioritize: the moved row plus the priorities of every
/// item with id at or after it, in id order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reprioritized {
    pub item: Item,
    pub priorities: Vec<PriorityEntry>,
}

/// Listing window. `offset` is the 1-based position of the first item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListParams {
    pub limit: i64,
    pub offset: i64,
}

impl ListParams {
    /// Normalize raw values: non-positive inputs fall back to the defaults.
    #[must_use]
    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit: if limit > 0 { limit } else { DEFAULT_LIST_LIMIT },
            offset: if offset > 0 { offset } else { DEFAULT_LIST_OFFSET },
        }
    }

    /// Number of rows the store skips before the page starts. `offset` is
    /// the 1-based position of the first returned row.
    #[must_use]
    pub fn skip(&self) -> i64 {
        (self.offset - 1).max(0)
    }
}

impl Default for ListParams {
    fn default() -> Self {
        Self::new(DEFAULT_LIST_LIMIT, DEFAULT_LIST_OFFSET)
    }
}

/// Listing metadata returned next to the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListMeta {
    pub total: i64,
    pub removed: i64,
    pub limit: i64,
    pub offset: i64,
}

/// A listing page as served to callers (and as cached).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPage {
    pub meta: ListMeta,
    pub goods: Vec<Item>,
}

/// Short form returned by a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedItem {
    pub id: i64,
    pub owner_id: i64,
    pub removed: bool,
}

impl From<&Item> for DeletedItem {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id,
            owner_id: item.owner_id,
            removed: item.removed,
        }
    }
}

/// Current UTC time truncated to the millisecond precision the store keeps.
#[must_use]
pub fn now_millis() -> DateTime<Utc> {
    from_epoch_millis(Utc::now().timestamp_millis())
}

/// Convert persisted epoch millis back to a timestamp.
#[must_use]
pub fn from_epoch_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
}
