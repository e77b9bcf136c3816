//! Folder-tree cache behavior against the in-memory provider.

use std::sync::Arc;
use std::time::Duration;

use cloudpad_storage::{EntryKind, MemoryStorage, RemoteFileId};
use cloudpad_tree::{FolderTreeCache, NodeState, TreeError, TreeEvent};

fn id(path: &str) -> RemoteFileId {
    RemoteFileId::Path(path.to_string())
}

fn setup() -> (Arc<MemoryStorage>, FolderTreeCache) {
    let storage = Arc::new(MemoryStorage::new());
    let cache = FolderTreeCache::new(storage.clone());
    (storage, cache)
}

#[tokio::test]
async fn expand_is_idempotent_once_populated() {
    let (storage, cache) = setup();
    storage.seed_file("app:/a.txt", "A");
    storage.seed_file("app:/b.txt", "B");

    let first = cache.expand(&id("app:/")).await.unwrap();
    let listed = storage.op_count();

    let second = cache.expand(&id("app:/")).await.unwrap();
    let third = cache.expand(&id("app:/")).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(second, third);
    // No additional network traffic after the first listing.
    assert_eq!(storage.op_count(), listed);
}

#[tokio::test]
async fn concurrent_expands_share_one_listing() {
    let (storage, cache) = setup();
    storage.seed_file("app:/a.txt", "A");
    storage.set_latency(Duration::from_millis(50));

    let root = id("app:/");
    let (first, second) = tokio::join!(cache.expand(&root), cache.expand(&root));

    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(storage.op_count(), 1);
}

#[tokio::test]
async fn stale_children_stay_servable_until_the_refetch_lands() {
    let (storage, cache) = setup();
    storage.seed_file("app:/a.txt", "A");

    let root = id("app:/");
    cache.expand(&root).await.unwrap();

    // Remote side changes behind our back, then something invalidates.
    storage.seed_file("app:/b.txt", "B");
    cache.invalidate(&root).await;

    assert_eq!(cache.node_state(&root).await, NodeState::Stale);
    let cached = cache.children(&root).await.unwrap();
    assert_eq!(cached.len(), 1, "stale children remain servable");

    let fresh = cache.expand(&root).await.unwrap();
    let names: Vec<&str> = fresh.iter().map(|n| n.name.as_str()).collect();
    // Old entries are fully replaced, not merged.
    assert_eq!(names, vec!["a.txt", "b.txt"]);
    assert_eq!(cache.children(&root).await.unwrap().len(), 2);
}

#[tokio::test]
async fn vanished_folder_self_heals_to_empty() {
    let (storage, cache) = setup();
    storage.seed_file("app:/docs/b.txt", "B");

    let docs = id("app:/docs");
    cache.expand(&id("app:/")).await.unwrap();
    cache.expand(&docs).await.unwrap();

    // Folder disappears remotely; a later refresh should not error out.
    storage.evict("app:/docs");
    cache.invalidate(&docs).await;

    let children = cache.expand(&docs).await.unwrap();
    assert!(children.is_empty());
    assert_eq!(cache.node_state(&docs).await, NodeState::Populated);
}

#[tokio::test]
async fn self_move_is_rejected_before_any_adapter_call() {
    let (storage, cache) = setup();
    storage.seed_dir("app:/a/b/c");

    cache.expand(&id("app:/")).await.unwrap();
    let before = storage.op_count();
    let cached_before = cache.children(&id("app:/")).await;

    let result = cache.apply_move(&id("app:/a"), &id("app:/a/b/c")).await;
    assert!(matches!(result, Err(TreeError::CyclicMove)));

    // No network call, no cache change.
    assert_eq!(storage.op_count(), before);
    assert_eq!(cache.children(&id("app:/")).await, cached_before);
    assert_eq!(cache.node_state(&id("app:/")).await, NodeState::Populated);
}

#[tokio::test]
async fn delete_empties_directories_bottom_up() {
    let (storage, cache) = setup();
    storage.seed_file("app:/docs/b.txt", "B");
    storage.seed_file("app:/docs/sub/c.txt", "C");

    // The in-memory provider refuses to delete a non-empty directory, so
    // this only succeeds if descendants go first.
    let deleted = cache.apply_delete(&id("app:/docs")).await.unwrap();

    assert!(deleted.contains(&id("app:/docs")));
    assert!(deleted.contains(&id("app:/docs/b.txt")));
    assert!(deleted.contains(&id("app:/docs/sub")));
    assert!(deleted.contains(&id("app:/docs/sub/c.txt")));
    assert!(storage.content_of("app:/docs/b.txt").is_none());
}

#[tokio::test]
async fn the_root_is_never_deleted_or_renamed() {
    let (_storage, cache) = setup();
    let root = id("app:/");

    assert!(matches!(
        cache.apply_delete(&root).await,
        Err(TreeError::RootImmutable)
    ));
    assert!(matches!(
        cache.apply_rename(&root, "other").await,
        Err(TreeError::RootImmutable)
    ));
}

#[tokio::test]
async fn rename_invalidates_the_affected_subtree() {
    let (storage, cache) = setup();
    storage.seed_file("app:/docs/b.txt", "B");

    let root = id("app:/");
    let docs = id("app:/docs");
    cache.expand(&root).await.unwrap();
    cache.expand(&docs).await.unwrap();

    let new_id = cache.apply_rename(&docs, "papers").await.unwrap();
    assert_eq!(new_id, id("app:/papers"));

    // Old identity is gone from the cache; the parent refetches.
    assert_eq!(cache.node_state(&docs).await, NodeState::Unfetched);
    assert_eq!(cache.node_state(&root).await, NodeState::Stale);

    let children = cache.expand(&root).await.unwrap();
    let names: Vec<&str> = children.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["papers"]);
}

#[tokio::test]
async fn move_refreshes_both_parents() {
    let (storage, cache) = setup();
    storage.seed_file("app:/a/report.txt", "R");
    storage.seed_dir("app:/archive");

    let a = id("app:/a");
    let archive = id("app:/archive");
    cache.expand(&id("app:/")).await.unwrap();
    cache.expand(&a).await.unwrap();
    cache.expand(&archive).await.unwrap();

    let moved = cache
        .apply_move(&id("app:/a/report.txt"), &archive)
        .await
        .unwrap();
    assert_eq!(moved, id("app:/archive/report.txt"));

    assert_eq!(cache.node_state(&a).await, NodeState::Stale);
    assert_eq!(cache.node_state(&archive).await, NodeState::Stale);

    let in_a = cache.expand(&a).await.unwrap();
    assert!(in_a.is_empty());
    let in_archive = cache.expand(&archive).await.unwrap();
    assert_eq!(in_archive.len(), 1);
    assert_eq!(in_archive[0].name, "report.txt");
}

#[tokio::test]
async fn deletions_are_broadcast_with_the_whole_subtree() {
    let (storage, cache) = setup();
    storage.seed_file("app:/docs/b.txt", "B");

    let mut events = cache.subscribe();
    cache.apply_delete(&id("app:/docs")).await.unwrap();

    match events.recv().await.unwrap() {
        TreeEvent::Deleted { ids } => {
            assert!(ids.contains(&id("app:/docs")));
            assert!(ids.contains(&id("app:/docs/b.txt")));
        }
        other => panic!("expected a delete event, got {other:?}"),
    }
}

#[tokio::test]
async fn create_lands_in_the_parent_on_the_next_expand() {
    let (storage, cache) = setup();
    storage.seed_dir("app:/docs");

    let docs = id("app:/docs");
    cache.expand(&docs).await.unwrap();

    let created = cache
        .apply_create(&docs, "new.txt", EntryKind::File)
        .await
        .unwrap();
    assert_eq!(created, id("app:/docs/new.txt"));

    assert_eq!(cache.node_state(&docs).await, NodeState::Stale);
    let children = cache.expand(&docs).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].name, "new.txt");
}
