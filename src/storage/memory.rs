use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};
use crate::item::{Item, ItemKey, ItemPatch, ListParams, NewItem, PriorityEntry, Reprioritized};
use super::traits::{offset_priority, RankedStore, StoreError};

/// In-process ranked store.
///
/// Mirrors the SQL lock discipline: a single sequence mutex stands in for
/// the table-scoped create lock, and each id has its own async mutex held
/// for the whole read-modify-write of a point mutation. Row mutexes exist
/// only while someone holds or waits on them.
pub struct InMemoryStore {
    rows: RwLock<BTreeMap<i64, Item>>,
    sequence: Mutex<()>,
    row_locks: DashMap<i64, Arc<Mutex<()>>>,
}

/// Held row lock. Dropping it releases the row and forgets the mutex once
/// no other task references it.
struct RowGuard<'a> {
    id: i64,
    guard: Option<OwnedMutexGuard<()>>,
    locks: &'a DashMap<i64, Arc<Mutex<()>>>,
}

impl Drop for RowGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            sequence: Mutex::new(()),
            row_locks: DashMap::new(),
        }
    }

    /// Get current row count
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Insert a row verbatim, bypassing priority assignment.
    ///
    /// Lets callers seed arbitrary (even inconsistent) priority layouts.
    pub fn insert_raw(&self, item: Item) {
        self.rows.write().insert(item.id, item);
    }

    fn owned_row(&self, key: ItemKey) -> Option<Item> {
        self.rows
            .read()
            .get(&key.id)
            .filter(|item| item.owner_id == key.owner_id)
            .cloned()
    }

    async fn lock_row(&self, id: i64) -> RowGuard<'_> {
        let lock = Arc::clone(&*self.row_locks.entry(id).or_default());
        RowGuard {
            id,
            guard: Some(lock.lock_owned().await),
            locks: &self.row_locks,
        }
    }

    /// Lock the row, then confirm it (still) belongs to the owner.
    ///
    /// Unknown pairs are rejected before a row mutex is created.
    async fn fetch_for_update(&self, key: ItemKey) -> Result<(RowGuard<'_>, Item), StoreError> {
        if self.owned_row(key).is_none() {
            return Err(StoreError::not_found(key));
        }
        let guard = self.lock_row(key.id).await;
        let current = self.owned_row(key).ok_or_else(|| StoreError::not_found(key))?;
        Ok((guard, current))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RankedStore for InMemoryStore {
    async fn list(&self, params: ListParams) -> Result<Vec<Item>, StoreError> {
        let rows = self.rows.read();
        Ok(rows
            .values()
            .skip(params.skip() as usize)
            .take(params.limit as usize)
            .cloned()
            .collect())
    }

    async fn get(&self, key: ItemKey) -> Result<Option<Item>, StoreError> {
        Ok(self
            .rows
            .read()
            .get(&key.id)
            .filter(|item| item.owner_id == key.owner_id)
            .cloned())
    }

    async fn create(&self, item: NewItem) -> Result<Item, StoreError> {
        let _sequence = self.sequence.lock().await;

        if self.rows.read().contains_key(&item.id) {
            return Err(StoreError::AlreadyExists { id: item.id });
        }

        let max_priority = self
            .rows
            .read()
            .values()
            .map(|row| row.priority)
            .max()
            .unwrap_or(0);
        let next_priority = offset_priority(max_priority, 1)?;

        let created = item.into_item(next_priority);
        self.rows.write().insert(created.id, created.clone());
        Ok(created)
    }

    async fn update(&self, key: ItemKey, patch: &ItemPatch) -> Result<Item, StoreError> {
        let (_row, current) = self.fetch_for_update(key).await?;
        let updated = patch.apply_to(&current);
        self.rows.write().insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, key: ItemKey) -> Result<Item, StoreError> {
        let (_row, mut current) = self.fetch_for_update(key).await?;
        current.removed = true;
        self.rows.write().insert(current.id, current.clone());
        Ok(current)
    }

    async fn reprioritize(&self, key: ItemKey, new_priority: i64) -> Result<Reprioritized, StoreError> {
        let (_row, _) = self.fetch_for_update(key).await?;

        let mut rows = self.rows.write();
        let later = rows.range((Bound::Excluded(key.id), Bound::Unbounded)).count() as i64;
        offset_priority(new_priority, later)?;

        let mut priorities = Vec::new();
        for (rank, (_, row)) in (0_i64..).zip(rows.range_mut(key.id..)) {
            row.priority = new_priority + rank;
            priorities.push(PriorityEntry {
                id: row.id,
                priority: row.priority,
            });
        }

        let item = rows
            .get(&key.id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(key))?;
        Ok(Reprioritized { item, priorities })
    }

    async fn count(&self) -> Result<i64, StoreError> {
        Ok(self.rows.read().len() as i64)
    }

    async fn removed_count(&self) -> Result<i64, StoreError> {
        Ok(self.rows.read().values().filter(|row| row.removed).count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{from_epoch_millis, ItemDraft};

    fn draft(id: i64, owner_id: i64) -> NewItem {
        NewItem::from_draft(ItemDraft::new(id, owner_id, format!("item-{}", id)))
    }

    fn seeded(id: i64, priority: i64) -> Item {
        Item {
            id,
            owner_id: 1,
            name: format!("seed-{}", id),
            description: String::new(),
            priority,
            removed: false,
            created_at: from_epoch_millis(0),
        }
    }

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = InMemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_appends_max_plus_one() {
        let store = InMemoryStore::new();
        store.insert_raw(seeded(10, 41));

        let created = store.create(draft(11, 1)).await.unwrap();
        assert_eq!(created.priority, 42);
    }

    #[tokio::test]
    async fn test_create_duplicate_id_is_rejected() {
        let store = InMemoryStore::new();
        store.create(draft(1, 1)).await.unwrap();

        let err = store.create(draft(1, 2)).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { id: 1 }));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_mutations_require_matching_owner() {
        let store = InMemoryStore::new();
        store.create(draft(1, 7)).await.unwrap();

        let err = store.delete(ItemKey::new(1, 8)).await.unwrap_err();
        assert!(err.is_not_found());

        let err = store.reprioritize(ItemKey::new(2, 7), 5).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_keeps_priority() {
        let store = InMemoryStore::new();
        store.create(draft(1, 7)).await.unwrap();
        store.create(draft(2, 7)).await.unwrap();

        let deleted = store.delete(ItemKey::new(1, 7)).await.unwrap();
        assert!(deleted.removed);
        assert_eq!(deleted.priority, 1);
        assert_eq!(store.removed_count().await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reprioritize_renumbers_by_id_order() {
        let store = InMemoryStore::new();
        for (id, priority) in [(1, 50), (2, 3), (3, 99), (4, 1), (5, 7)] {
            store.insert_raw(seeded(id, priority));
        }

        let result = store.reprioritize(ItemKey::new(2, 1), 10).await.unwrap();
        let got: Vec<(i64, i64)> = result.priorities.iter().map(|e| (e.id, e.priority)).collect();
        assert_eq!(got, vec![(2, 10), (3, 11), (4, 12), (5, 13)]);
        assert_eq!(result.item.priority, 10);

        let first = store.get(ItemKey::new(1, 1)).await.unwrap().unwrap();
        assert_eq!(first.priority, 50);
    }

    #[tokio::test]
    async fn test_list_pages_in_id_order() {
        let store = InMemoryStore::new();
        for id in [5, 3, 1, 4, 2] {
            store.create(draft(id, 1)).await.unwrap();
        }

        let page = store.list(ListParams::new(2, 2)).await.unwrap();
        let ids: Vec<i64> = page.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_reprioritize_past_i64_max_is_rejected_untouched() {
        let store = InMemoryStore::new();
        store.insert_raw(seeded(1, 1));
        store.insert_raw(seeded(2, 2));

        let err = store.reprioritize(ItemKey::new(1, 1), i64::MAX).await.unwrap_err();
        assert!(matches!(err, StoreError::PriorityOverflow { base: i64::MAX, offset: 1 }));

        let priorities: Vec<i64> = store
            .list(ListParams::new(10, 1))
            .await
            .unwrap()
            .iter()
            .map(|i| i.priority)
            .collect();
        assert_eq!(priorities, vec![1, 2]);

        // The last id has nothing behind it, so the top of the range is fine
        let moved = store.reprioritize(ItemKey::new(2, 1), i64::MAX).await.unwrap();
        assert_eq!(moved.item.priority, i64::MAX);
    }

    #[tokio::test]
    async fn test_create_after_max_priority_is_rejected() {
        let store = InMemoryStore::new();
        store.create(draft(1, 1)).await.unwrap();
        store
            .update(
                ItemKey::new(1, 1),
                &ItemPatch {
                    owner_id: 1,
                    name: "top".into(),
                    description: None,
                    priority: i64::MAX,
                    removed: false,
                },
            )
            .await
            .unwrap();

        let err = store.create(draft(2, 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::PriorityOverflow { base: i64::MAX, offset: 1 }));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_rows_leave_no_row_locks() {
        let store = InMemoryStore::new();
        for id in 1..=1000 {
            assert!(store.delete(ItemKey::new(id, 1)).await.unwrap_err().is_not_found());
        }
        assert_eq!(store.row_locks.len(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_row_locks_are_released_after_mutations() {
        let store = Arc::new(InMemoryStore::new());
        for id in 1..=8 {
            store.create(draft(id, 1)).await.unwrap();
        }

        let mut handles = vec![];
        for round in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let id = 1 + round % 8;
                store.delete(ItemKey::new(id, 1)).await.unwrap();
                store.reprioritize(ItemKey::new(id, 1), 100 + round).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.row_locks.len(), 0);
        assert_eq!(store.removed_count().await.unwrap(), 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_get_distinct_priorities() {
        let store = Arc::new(InMemoryStore::new());
        let mut handles = vec![];

        for id in 1..=64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.create(draft(id, 1)).await.unwrap().priority }));
        }

        let mut priorities = vec![];
        for handle in handles {
            priorities.push(handle.await.unwrap());
        }
        priorities.sort_unstable();
        assert_eq!(priorities, (1..=64).collect::<Vec<i64>>());
    }
}
