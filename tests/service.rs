//! Behavioural tests for the ranked item service.
//!
//! Every property runs against the in-memory store and against a real
//! SQLite file, both behind the in-process listing cache.
//!
//! ```bash
//! cargo test --test service
//! ```

use std::sync::Arc;
use std::time::Duration;

use ranked_store::request::{decode, UpdateRequest};
use ranked_store::{
    DeletedItem, InMemoryCache, InMemoryStore, ItemDraft, ItemKey, ItemPatch, ListParams, RankedItemService,
    RankedStore, ServiceError, SqlStore,
};
use tempfile::TempDir;

// =============================================================================
// Fixtures
// =============================================================================

fn memory_service() -> RankedItemService {
    RankedItemService::new(Arc::new(InMemoryStore::new()), Arc::new(InMemoryCache::new()))
}

async fn sqlite_service() -> (RankedItemService, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("goods.db").display());
    let store = SqlStore::new(&url).await.expect("Failed to open SQLite store");
    (RankedItemService::new(Arc::new(store), Arc::new(InMemoryCache::new())), dir)
}

fn patch(owner_id: i64, name: &str, description: Option<&str>, priority: i64, removed: bool) -> ItemPatch {
    ItemPatch {
        owner_id,
        name: name.to_string(),
        description: description.map(String::from),
        priority,
        removed,
    }
}

// =============================================================================
// Scenario
// =============================================================================

async fn create_delete_list_scenario(service: &RankedItemService) {
    let a = service.create(ItemDraft::new(1, 7, "A")).await.unwrap();
    assert_eq!(a.priority, 1);

    let b = service.create(ItemDraft::new(2, 7, "B")).await.unwrap();
    assert_eq!(b.priority, 2);

    let deleted = service.delete(ItemKey::new(1, 7)).await.unwrap();
    assert!(deleted.removed);
    assert_eq!(deleted.priority, 1);
    assert_eq!(DeletedItem::from(&deleted), DeletedItem { id: 1, owner_id: 7, removed: true });

    let page = service.list(ListParams::default()).await.unwrap();
    assert_eq!(page.meta.total, 2);
    assert_eq!(page.meta.removed, 1);
    assert_eq!(page.meta.limit, 10);
    assert_eq!(page.meta.offset, 1);
    assert_eq!(page.goods.len(), 2);
}

#[tokio::test]
async fn scenario_memory() {
    create_delete_list_scenario(&memory_service()).await;
}

#[tokio::test]
async fn scenario_sqlite() {
    let (service, _dir) = sqlite_service().await;
    create_delete_list_scenario(&service).await;
}

// =============================================================================
// Concurrent creates never share a priority
// =============================================================================

async fn concurrent_creates(service: Arc<RankedItemService>, n: i64) {
    let mut handles = Vec::new();
    for id in 1..=n {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service.create(ItemDraft::new(id, 1 + id % 3, format!("item-{id}"))).await
        }));
    }

    let mut priorities = Vec::new();
    for handle in handles {
        priorities.push(handle.await.unwrap().unwrap().priority);
    }
    priorities.sort_unstable();
    assert_eq!(priorities, (1..=n).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_memory() {
    concurrent_creates(Arc::new(memory_service()), 100).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_sqlite() {
    let (service, _dir) = sqlite_service().await;
    concurrent_creates(Arc::new(service), 25).await;
}

// =============================================================================
// Concurrent updates of one row are serialized
// =============================================================================

async fn concurrent_updates_keep_merged_description(service: Arc<RankedItemService>) {
    for round in 0..20 {
        let id = round + 1;
        service
            .create(ItemDraft::new(id, 7, "orig").with_description("orig"))
            .await
            .unwrap();

        let writer = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .update(ItemKey::new(id, 7), patch(7, "writer", Some("from-writer"), 50, false))
                    .await
            })
        };
        let keeper = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .update(ItemKey::new(id, 7), patch(7, "keeper", None, 60, false))
                    .await
            })
        };
        writer.await.unwrap().unwrap();
        keeper.await.unwrap().unwrap();

        let stored = service.get(ItemKey::new(id, 7)).await.unwrap().unwrap();
        assert_eq!(stored.description, "from-writer", "round {round} lost an update");
        assert!(stored.name == "writer" || stored.name == "keeper");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_memory() {
    concurrent_updates_keep_merged_description(Arc::new(memory_service())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_sqlite() {
    let (service, _dir) = sqlite_service().await;
    concurrent_updates_keep_merged_description(Arc::new(service)).await;
}

// =============================================================================
// Reprioritize renumbering
// =============================================================================

async fn reprioritize_renumbers_later_ids(service: &RankedItemService) {
    for id in 1..=5 {
        service.create(ItemDraft::new(id, 1, format!("g{id}"))).await.unwrap();
    }
    // Arbitrary starting layout through the unguarded update path
    for (id, priority) in [(2, 7), (3, 1), (4, 99), (5, 3)] {
        service
            .update(ItemKey::new(id, 1), patch(1, &format!("g{id}"), None, priority, false))
            .await
            .unwrap();
    }

    let result = service.reprioritize(ItemKey::new(2, 1), 10).await.unwrap();
    let reported: Vec<(i64, i64)> = result.priorities.iter().map(|e| (e.id, e.priority)).collect();
    assert_eq!(reported, vec![(2, 10), (3, 11), (4, 12), (5, 13)]);

    let first = service.get(ItemKey::new(1, 1)).await.unwrap().unwrap();
    assert_eq!(first.priority, 1);
}

#[tokio::test]
async fn reprioritize_memory() {
    reprioritize_renumbers_later_ids(&memory_service()).await;
}

#[tokio::test]
async fn reprioritize_sqlite() {
    let (service, _dir) = sqlite_service().await;
    reprioritize_renumbers_later_ids(&service).await;
}

#[tokio::test]
async fn reprioritize_unknown_pair_is_not_found() {
    let service = memory_service();
    service.create(ItemDraft::new(1, 7, "A")).await.unwrap();
    service.create(ItemDraft::new(2, 7, "B")).await.unwrap();

    let err = service.reprioritize(ItemKey::new(1, 8), 40).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.to_response().code, 3);

    let b = service.get(ItemKey::new(2, 7)).await.unwrap().unwrap();
    assert_eq!(b.priority, 2);
}

async fn priorities_past_i64_max_are_refused(service: &RankedItemService) {
    for id in 1..=3 {
        service.create(ItemDraft::new(id, 1, format!("g{id}"))).await.unwrap();
    }

    let err = service.reprioritize(ItemKey::new(2, 1), i64::MAX).await.unwrap_err();
    assert!(matches!(&err, ServiceError::Validation(v) if v.field == "priority"), "got {err:?}");

    let page = service.list(ListParams::default()).await.unwrap();
    let priorities: Vec<i64> = page.goods.iter().map(|g| g.priority).collect();
    assert_eq!(priorities, vec![1, 2, 3]);

    service
        .update(ItemKey::new(3, 1), patch(1, "g3", None, i64::MAX, false))
        .await
        .unwrap();
    let err = service.create(ItemDraft::new(4, 1, "g4")).await.unwrap_err();
    assert!(matches!(&err, ServiceError::Validation(v) if v.field == "priority"), "got {err:?}");
    assert!(service.get(ItemKey::new(4, 1)).await.unwrap().is_none());
}

#[tokio::test]
async fn priority_range_memory() {
    priorities_past_i64_max_are_refused(&memory_service()).await;
}

#[tokio::test]
async fn priority_range_sqlite() {
    let (service, _dir) = sqlite_service().await;
    priorities_past_i64_max_are_refused(&service).await;
}

// =============================================================================
// Soft delete is non-destructive
// =============================================================================

async fn soft_delete_keeps_row(service: &RankedItemService) {
    service
        .create(ItemDraft::new(4, 2, "Figs").with_description("dried"))
        .await
        .unwrap();
    let before = service.get(ItemKey::new(4, 2)).await.unwrap().unwrap();

    service.delete(ItemKey::new(4, 2)).await.unwrap();

    let after = service.get(ItemKey::new(4, 2)).await.unwrap().unwrap();
    assert!(after.removed);
    assert_eq!(after.name, before.name);
    assert_eq!(after.description, before.description);
    assert_eq!(after.priority, before.priority);
    assert_eq!(after.created_at, before.created_at);
}

#[tokio::test]
async fn soft_delete_memory() {
    soft_delete_keeps_row(&memory_service()).await;
}

#[tokio::test]
async fn soft_delete_sqlite() {
    let (service, _dir) = sqlite_service().await;
    soft_delete_keeps_row(&service).await;
}

// =============================================================================
// Every mutation invalidates the listing cache
// =============================================================================

async fn mutations_invalidate_listing(service: &RankedItemService) {
    let params = ListParams::default();

    service.create(ItemDraft::new(1, 7, "A")).await.unwrap();
    assert_eq!(service.list(params).await.unwrap().meta.total, 1);

    service.create(ItemDraft::new(2, 7, "B")).await.unwrap();
    assert_eq!(service.list(params).await.unwrap().meta.total, 2);

    service
        .update(ItemKey::new(2, 7), patch(7, "B2", None, 2, false))
        .await
        .unwrap();
    let page = service.list(params).await.unwrap();
    assert_eq!(page.goods[1].name, "B2");

    service.delete(ItemKey::new(1, 7)).await.unwrap();
    let page = service.list(params).await.unwrap();
    assert_eq!(page.meta.removed, 1);
    assert!(page.goods[0].removed);

    service.reprioritize(ItemKey::new(1, 7), 30).await.unwrap();
    let page = service.list(params).await.unwrap();
    assert_eq!(page.goods[0].priority, 30);
    assert_eq!(page.goods[1].priority, 31);
}

#[tokio::test]
async fn invalidation_memory() {
    mutations_invalidate_listing(&memory_service()).await;
}

#[tokio::test]
async fn invalidation_sqlite() {
    let (service, _dir) = sqlite_service().await;
    mutations_invalidate_listing(&service).await;
}

#[tokio::test]
async fn invalidation_beats_long_ttl() {
    let service = memory_service().with_list_ttl(Duration::from_secs(3600));
    service.create(ItemDraft::new(1, 7, "A")).await.unwrap();
    service.list(ListParams::new(5, 1)).await.unwrap();
    service.list(ListParams::new(1, 1)).await.unwrap();

    service.delete(ItemKey::new(1, 7)).await.unwrap();

    assert_eq!(service.list(ListParams::new(5, 1)).await.unwrap().meta.removed, 1);
    assert_eq!(service.list(ListParams::new(1, 1)).await.unwrap().meta.removed, 1);
}

// =============================================================================
// Cached pages never leak across windows
// =============================================================================

async fn windows_have_their_own_pages(service: &RankedItemService) {
    for id in 1..=6 {
        service.create(ItemDraft::new(id, 1, format!("w{id}"))).await.unwrap();
    }

    let five = service.list(ListParams::new(5, 0)).await.unwrap();
    assert_eq!(five.goods.len(), 5);

    let one = service.list(ListParams::new(1, 0)).await.unwrap();
    assert_eq!(one.goods.len(), 1);
    assert_eq!(one.meta.limit, 1);

    let shifted = service.list(ListParams::new(5, 3)).await.unwrap();
    let ids: Vec<i64> = shifted.goods.iter().map(|g| g.id).collect();
    assert_eq!(ids, vec![3, 4, 5, 6]);
}

#[tokio::test]
async fn windows_memory() {
    windows_have_their_own_pages(&memory_service()).await;
}

#[tokio::test]
async fn windows_sqlite() {
    let (service, _dir) = sqlite_service().await;
    windows_have_their_own_pages(&service).await;
}

// =============================================================================
// Partial update merge
// =============================================================================

async fn empty_description_keeps_previous(service: &RankedItemService) {
    service
        .create(ItemDraft::new(1, 7, "A").with_description("first"))
        .await
        .unwrap();

    let keep: UpdateRequest =
        decode(br#"{"projectId": 7, "name": "A", "description": "", "priority": 1, "removed": false}"#).unwrap();
    let kept = service.update(ItemKey::new(1, 7), keep.validate().unwrap()).await.unwrap();
    assert_eq!(kept.description, "first");

    let replace: UpdateRequest =
        decode(br#"{"projectId": 7, "name": "A", "description": "second", "priority": 1, "removed": false}"#)
            .unwrap();
    let replaced = service.update(ItemKey::new(1, 7), replace.validate().unwrap()).await.unwrap();
    assert_eq!(replaced.description, "second");

    // The domain patch can still clear it explicitly
    let cleared = service
        .update(ItemKey::new(1, 7), patch(7, "A", Some(""), 1, false))
        .await
        .unwrap();
    assert_eq!(cleared.description, "");
}

#[tokio::test]
async fn partial_update_memory() {
    empty_description_keeps_previous(&memory_service()).await;
}

#[tokio::test]
async fn partial_update_sqlite() {
    let (service, _dir) = sqlite_service().await;
    empty_description_keeps_previous(&service).await;
}

// =============================================================================
// Error taxonomy
// =============================================================================

#[tokio::test]
async fn duplicate_create_is_a_conflict() {
    let (service, _dir) = sqlite_service().await;
    service.create(ItemDraft::new(1, 7, "A")).await.unwrap();

    let err = service.create(ItemDraft::new(1, 7, "A")).await.unwrap_err();
    assert!(matches!(err, ServiceError::AlreadyExists { id: 1 }));
    assert_eq!(service.store().count().await.unwrap(), 1);
}

#[tokio::test]
async fn update_unknown_pair_is_not_found() {
    let service = memory_service();
    let err = service
        .update(ItemKey::new(1, 1), patch(1, "x", None, 1, false))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn update_may_duplicate_priorities() {
    let service = memory_service();
    service.create(ItemDraft::new(1, 7, "A")).await.unwrap();
    service.create(ItemDraft::new(2, 7, "B")).await.unwrap();

    service
        .update(ItemKey::new(2, 7), patch(7, "B", None, 1, false))
        .await
        .unwrap();

    let page = service.list(ListParams::default()).await.unwrap();
    assert!(page.goods.iter().all(|g| g.priority == 1));
}

#[tokio::test]
async fn soft_deleted_items_can_still_move() {
    let service = memory_service();
    service.create(ItemDraft::new(1, 7, "A")).await.unwrap();
    service.delete(ItemKey::new(1, 7)).await.unwrap();

    let moved = service.reprioritize(ItemKey::new(1, 7), 5).await.unwrap();
    assert!(moved.item.removed);
    assert_eq!(moved.item.priority, 5);
}
