//! Document session behavior against the in-memory provider.

use std::sync::Arc;
use std::time::Duration;

use cloudpad_session::{spawn_tree_watcher, DocumentSession, SessionError, SessionState};
use cloudpad_storage::{MemoryStorage, RemoteError, RemoteFileId};
use cloudpad_tree::{FolderTreeCache, TreeEvent};

fn id(path: &str) -> RemoteFileId {
    RemoteFileId::Path(path.to_string())
}

fn setup(debounce: Duration) -> (Arc<MemoryStorage>, DocumentSession) {
    let storage = Arc::new(MemoryStorage::new());
    let session = DocumentSession::with_debounce(storage.clone(), debounce);
    (storage, session)
}

#[tokio::test]
async fn open_loads_the_document() {
    let (storage, session) = setup(Duration::from_secs(2));
    storage.seed_file("app:/notes.txt", "hello");

    session.open(&id("app:/notes.txt")).await.unwrap();

    assert_eq!(session.state().await, SessionState::Ready);
    let doc = session.document().await.unwrap();
    assert_eq!(doc.text, "hello");
    assert!(!doc.dirty);
    assert!(!doc.deleted);
}

#[tokio::test]
async fn unsupported_formats_are_rejected_without_a_content_fetch() {
    let (storage, session) = setup(Duration::from_secs(2));
    storage.seed_file("app:/photo.png", "not text");

    let before = storage.op_count();
    let result = session.open(&id("app:/photo.png")).await;

    assert!(matches!(result, Err(SessionError::UnsupportedFormat(_))));
    assert_eq!(session.state().await, SessionState::Rejected);
    // Exactly one metadata call; the content was never requested.
    assert_eq!(storage.op_count(), before + 1);
}

#[tokio::test]
async fn opening_a_directory_is_refused() {
    let (storage, session) = setup(Duration::from_secs(2));
    storage.seed_dir("app:/docs");

    let result = session.open(&id("app:/docs")).await;
    assert!(matches!(result, Err(SessionError::NotAFile)));
}

#[tokio::test]
async fn edits_autosave_after_the_quiet_period() {
    let (storage, session) = setup(Duration::from_millis(30));
    storage.seed_file("app:/notes.txt", "v1");

    session.open(&id("app:/notes.txt")).await.unwrap();
    session.edit("v2").await.unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(storage.content_of("app:/notes.txt").as_deref(), Some("v2"));
    let doc = session.document().await.unwrap();
    assert!(!doc.dirty);
    assert_eq!(session.state().await, SessionState::Ready);
    assert!(session.last_save_error().await.is_none());
}

#[tokio::test]
async fn rapid_edits_coalesce_into_a_single_write() {
    let (storage, session) = setup(Duration::from_millis(80));
    storage.seed_file("app:/notes.txt", "v0");

    session.open(&id("app:/notes.txt")).await.unwrap();
    let after_open = storage.op_count();

    session.edit("v1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    session.edit("v2").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    session.edit("v3").await.unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(storage.content_of("app:/notes.txt").as_deref(), Some("v3"));
    assert_eq!(storage.op_count(), after_open + 1);
}

#[tokio::test]
async fn explicit_save_on_a_clean_buffer_is_a_no_op() {
    let (storage, session) = setup(Duration::from_secs(2));
    storage.seed_file("app:/notes.txt", "v1");

    session.open(&id("app:/notes.txt")).await.unwrap();
    let before = storage.op_count();
    session.save().await.unwrap();
    assert_eq!(storage.op_count(), before);
}

#[tokio::test]
async fn deleted_documents_refuse_saves_without_touching_the_network() {
    let (storage, session) = setup(Duration::from_secs(600));
    storage.seed_file("app:/docs/notes.txt", "v1");

    session.open(&id("app:/docs/notes.txt")).await.unwrap();
    session.edit("v2").await.unwrap();

    // An ancestor folder of the open document gets deleted.
    session
        .handle_tree_event(&TreeEvent::Deleted {
            ids: vec![id("app:/docs")],
        })
        .await;

    let doc = session.document().await.unwrap();
    assert!(doc.deleted);
    assert_eq!(session.state().await, SessionState::Rejected);

    let before = storage.op_count();
    let result = session.save().await;
    assert!(matches!(result, Err(SessionError::DocumentDeleted)));
    assert_eq!(storage.op_count(), before);
}

#[tokio::test]
async fn rename_away_marks_a_path_addressed_document_deleted() {
    let (storage, session) = setup(Duration::from_secs(2));
    storage.seed_file("app:/docs/notes.txt", "v1");

    session.open(&id("app:/docs/notes.txt")).await.unwrap();
    session
        .handle_tree_event(&TreeEvent::Renamed {
            old: id("app:/docs"),
            new: id("app:/papers"),
        })
        .await;

    assert!(session.document().await.unwrap().deleted);
}

#[tokio::test]
async fn close_cancels_the_pending_autosave() {
    let (storage, session) = setup(Duration::from_millis(50));
    storage.seed_file("app:/notes.txt", "v1");

    session.open(&id("app:/notes.txt")).await.unwrap();
    session.edit("v2").await.unwrap();
    session.close().await;

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(storage.content_of("app:/notes.txt").as_deref(), Some("v1"));
    assert_eq!(session.state().await, SessionState::Closed);
    assert!(session.document().await.is_none());
}

#[tokio::test]
async fn cancelled_open_applies_no_state() {
    let (storage, session) = setup(Duration::from_secs(2));
    storage.seed_file("app:/slow.txt", "content");
    storage.set_latency(Duration::from_millis(150));

    let opener = session.clone();
    let handle = tokio::spawn(async move { opener.open(&id("app:/slow.txt")).await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    session.close().await;

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(SessionError::Cancelled)));
    assert_eq!(session.state().await, SessionState::Closed);
    assert!(session.document().await.is_none());
}

#[tokio::test]
async fn failed_saves_keep_the_buffer_and_surface_the_error() {
    let (storage, session) = setup(Duration::from_secs(600));
    storage.seed_file("app:/notes.txt", "v1");

    session.open(&id("app:/notes.txt")).await.unwrap();
    session.edit("v2").await.unwrap();

    storage.inject_failure(RemoteError::Transient("connection reset".to_string()));
    let result = session.save().await;
    assert!(matches!(result, Err(SessionError::Remote(_))));

    // Last-good buffer intact, still dirty, error recorded.
    let doc = session.document().await.unwrap();
    assert_eq!(doc.text, "v2");
    assert!(doc.dirty);
    assert!(session.last_save_error().await.is_some());
    assert_eq!(storage.content_of("app:/notes.txt").as_deref(), Some("v1"));

    // The next save goes through and clears the error.
    session.save().await.unwrap();
    assert_eq!(storage.content_of("app:/notes.txt").as_deref(), Some("v2"));
    assert!(session.last_save_error().await.is_none());
    assert!(!session.document().await.unwrap().dirty);
}

#[tokio::test]
async fn tree_watcher_flags_the_open_document_end_to_end() {
    let storage = Arc::new(MemoryStorage::new());
    storage.seed_file("app:/docs/notes.txt", "v1");

    let cache = FolderTreeCache::new(storage.clone());
    let session = DocumentSession::with_debounce(storage.clone(), Duration::from_secs(600));
    let watcher = spawn_tree_watcher(session.clone(), cache.subscribe());

    session.open(&id("app:/docs/notes.txt")).await.unwrap();
    cache.apply_delete(&id("app:/docs")).await.unwrap();

    // Give the watcher a beat to drain the broadcast.
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(session.document().await.unwrap().deleted);
    let result = session.save().await;
    assert!(matches!(result, Err(SessionError::DocumentDeleted)));

    watcher.abort();
}
