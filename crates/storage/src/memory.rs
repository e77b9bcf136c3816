//! In-memory storage provider for testing
//!
//! Implements the full `RemoteStorage` contract over a path-addressed
//! map (same `app:/` namespace as the Yandex adapter), so the tree and
//! session layers can be exercised without the network. Ships a few test
//! hooks: an operation counter, injectable latency, injectable failures,
//! and out-of-band eviction to simulate entries vanishing remotely.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::backend::RemoteStorage;
use crate::error::{RemoteError, RemoteResult};
use crate::id::RemoteFileId;
use crate::node::{EntryKind, FileNode};

#[derive(Debug, Clone)]
struct MemEntry {
    kind: EntryKind,
    content: String,
}

/// In-memory provider; every operation that a real adapter would answer
/// with a network round-trip bumps `op_count`.
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, MemEntry>>,
    ops: AtomicUsize,
    latency: RwLock<Duration>,
    injected_failure: Mutex<Option<RemoteError>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            "app:/".to_string(),
            MemEntry {
                kind: EntryKind::Directory,
                content: String::new(),
            },
        );
        Self {
            entries: RwLock::new(entries),
            ops: AtomicUsize::new(0),
            latency: RwLock::new(Duration::ZERO),
            injected_failure: Mutex::new(None),
        }
    }

    /// Seed a file, creating missing parent folders.
    pub fn seed_file(&self, path: &str, content: &str) {
        let path = Self::normalize_infallible(path);
        self.ensure_parents(&path);
        self.entries.write().expect("lock poisoned").insert(
            path,
            MemEntry {
                kind: EntryKind::File,
                content: content.to_string(),
            },
        );
    }

    /// Seed a folder, creating missing parents.
    pub fn seed_dir(&self, path: &str) {
        let path = Self::normalize_infallible(path);
        self.ensure_parents(&path);
        self.entries.write().expect("lock poisoned").insert(
            path,
            MemEntry {
                kind: EntryKind::Directory,
                content: String::new(),
            },
        );
    }

    /// Drop an entry and its subtree without going through the contract,
    /// simulating an out-of-band remote change.
    pub fn evict(&self, path: &str) {
        let path = Self::normalize_infallible(path);
        let prefix = format!("{path}/");
        let mut entries = self.entries.write().expect("lock poisoned");
        entries.retain(|key, _| key != &path && !key.starts_with(&prefix));
    }

    /// Number of contract operations performed so far.
    pub fn op_count(&self) -> usize {
        self.ops.load(Ordering::SeqCst)
    }

    /// Delay applied to every operation; lets tests overlap calls.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write().expect("lock poisoned") = latency;
    }

    /// Make the next operation fail with `err`.
    pub fn inject_failure(&self, err: RemoteError) {
        *self.injected_failure.lock().expect("lock poisoned") = Some(err);
    }

    /// Current content of a file, for assertions.
    pub fn content_of(&self, path: &str) -> Option<String> {
        let path = Self::normalize_infallible(path);
        self.entries
            .read()
            .expect("lock poisoned")
            .get(&path)
            .map(|e| e.content.clone())
    }

    fn normalize(raw: &str) -> RemoteResult<String> {
        let tail = raw.trim().strip_prefix("app:/").unwrap_or_else(|| {
            raw.trim().trim_start_matches('/')
        });
        let mut segments: Vec<&str> = Vec::new();
        for segment in tail.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(RemoteError::Containment(format!(
                            "path escapes the application folder: {raw}"
                        )));
                    }
                }
                other => segments.push(other),
            }
        }
        if segments.is_empty() {
            Ok("app:/".to_string())
        } else {
            Ok(format!("app:/{}", segments.join("/")))
        }
    }

    fn normalize_infallible(raw: &str) -> String {
        Self::normalize(raw).unwrap_or_else(|_| "app:/".to_string())
    }

    fn ensure_parents(&self, path: &str) {
        let Some(tail) = path.strip_prefix("app:/") else {
            return;
        };
        let mut entries = self.entries.write().expect("lock poisoned");
        let segments: Vec<&str> = tail.split('/').collect();
        let mut current = String::from("app:");
        for segment in &segments[..segments.len().saturating_sub(1)] {
            current = format!("{current}/{segment}");
            entries.entry(current.clone()).or_insert(MemEntry {
                kind: EntryKind::Directory,
                content: String::new(),
            });
        }
    }

    fn path_of(&self, id: &RemoteFileId) -> RemoteResult<String> {
        match id {
            RemoteFileId::Path(path) => Self::normalize(path),
            RemoteFileId::Drive(_) => Err(RemoteError::Containment(
                "identifier was issued by another provider".to_string(),
            )),
        }
    }

    /// Count the operation, apply latency, surface injected failures.
    async fn begin_op(&self) -> RemoteResult<()> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.injected_failure.lock().expect("lock poisoned").take() {
            return Err(err);
        }
        let latency = *self.latency.read().expect("lock poisoned");
        if latency > Duration::ZERO {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }

    fn mime_for(name: &str) -> Option<String> {
        let lower = name.to_lowercase();
        if lower.ends_with(".txt") {
            Some("text/plain".to_string())
        } else if lower.ends_with(".md") {
            Some("text/markdown".to_string())
        } else {
            None
        }
    }

    fn node_at(&self, path: &str, entry: &MemEntry) -> FileNode {
        let name = path
            .strip_prefix("app:/")
            .unwrap_or("")
            .rsplit('/')
            .next()
            .unwrap_or("")
            .to_string();
        FileNode {
            id: RemoteFileId::Path(path.to_string()),
            name: name.clone(),
            kind: entry.kind,
            mime_type: match entry.kind {
                EntryKind::Directory => None,
                EntryKind::File => Self::mime_for(&name),
            },
            size: match entry.kind {
                EntryKind::Directory => None,
                EntryKind::File => Some(entry.content.len() as u64),
            },
            created: None,
            modified: None,
            owner: None,
            children: None,
        }
    }

    fn relocate(&self, from: &str, to: &str) -> RemoteResult<()> {
        let mut entries = self.entries.write().expect("lock poisoned");
        if entries.contains_key(to) {
            return Err(RemoteError::Conflict(format!("{to} already exists")));
        }
        let from_prefix = format!("{from}/");
        let moved: Vec<(String, MemEntry)> = entries
            .iter()
            .filter(|(key, _)| key.as_str() == from || key.starts_with(&from_prefix))
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect();
        if moved.is_empty() {
            return Err(RemoteError::NotFound(from.to_string()));
        }
        for (key, _) in &moved {
            entries.remove(key);
        }
        for (key, entry) in moved {
            let new_key = format!("{to}{}", &key[from.len()..]);
            entries.insert(new_key, entry);
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStorage for MemoryStorage {
    async fn root(&self) -> RemoteResult<RemoteFileId> {
        Ok(RemoteFileId::Path("app:/".to_string()))
    }

    async fn list_children(&self, folder: &RemoteFileId) -> RemoteResult<Vec<FileNode>> {
        let path = self.path_of(folder)?;
        self.begin_op().await?;

        let entries = self.entries.read().expect("lock poisoned");
        match entries.get(&path) {
            Some(entry) if entry.kind == EntryKind::Directory => {}
            Some(_) => return Err(RemoteError::NotFound(format!("{path} is not a folder"))),
            None => return Err(RemoteError::NotFound(path)),
        }

        let prefix = if path == "app:/" {
            "app:/".to_string()
        } else {
            format!("{path}/")
        };
        let children = entries
            .iter()
            .filter(|(key, _)| {
                key.starts_with(&prefix)
                    && key.as_str() != path
                    && !key[prefix.len()..].contains('/')
                    && !key[prefix.len()..].is_empty()
            })
            .map(|(key, entry)| self.node_at(key, entry))
            .collect();
        Ok(children)
    }

    async fn read_content(
        &self,
        file: &RemoteFileId,
        cancel: CancellationToken,
    ) -> RemoteResult<String> {
        let path = self.path_of(file)?;
        let transfer = async {
            self.begin_op().await?;
            let entries = self.entries.read().expect("lock poisoned");
            match entries.get(&path) {
                Some(entry) if entry.kind == EntryKind::File => Ok(entry.content.clone()),
                Some(_) => Err(RemoteError::UnsupportedFormat(format!(
                    "{path} is a folder"
                ))),
                None => Err(RemoteError::NotFound(path.clone())),
            }
        };

        tokio::select! {
            () = cancel.cancelled() => Err(RemoteError::Cancelled),
            result = transfer => result,
        }
    }

    async fn write_content(&self, file: &RemoteFileId, text: &str) -> RemoteResult<()> {
        let path = self.path_of(file)?;
        self.begin_op().await?;
        let mut entries = self.entries.write().expect("lock poisoned");
        match entries.get_mut(&path) {
            Some(entry) if entry.kind == EntryKind::File => {
                entry.content = text.to_string();
                Ok(())
            }
            Some(_) => Err(RemoteError::UnsupportedFormat(format!(
                "{path} is a folder"
            ))),
            None => Err(RemoteError::NotFound(path.clone())),
        }
    }

    async fn create_entry(
        &self,
        parent: &RemoteFileId,
        name: &str,
        kind: EntryKind,
    ) -> RemoteResult<RemoteFileId> {
        if name.is_empty() || name.contains('/') {
            return Err(RemoteError::Containment(format!(
                "invalid entry name: {name:?}"
            )));
        }
        let parent_path = self.path_of(parent)?;
        self.begin_op().await?;

        let path = if parent_path == "app:/" {
            format!("app:/{name}")
        } else {
            format!("{parent_path}/{name}")
        };
        let mut entries = self.entries.write().expect("lock poisoned");
        match entries.get(&parent_path) {
            Some(entry) if entry.kind == EntryKind::Directory => {}
            _ => return Err(RemoteError::NotFound(parent_path)),
        }
        if entries.contains_key(&path) {
            return Err(RemoteError::Conflict(format!("{path} already exists")));
        }
        entries.insert(
            path.clone(),
            MemEntry {
                kind,
                content: String::new(),
            },
        );
        Ok(RemoteFileId::Path(path))
    }

    async fn delete_entry(&self, target: &RemoteFileId) -> RemoteResult<()> {
        let path = self.path_of(target)?;
        if path == "app:/" {
            return Err(RemoteError::Containment(
                "the sandbox root cannot be deleted".to_string(),
            ));
        }
        self.begin_op().await?;

        let mut entries = self.entries.write().expect("lock poisoned");
        let prefix = format!("{path}/");
        // No cascade here, same as the adapter contract: callers empty
        // directories first.
        if entries.keys().any(|key| key.starts_with(&prefix)) {
            return Err(RemoteError::Conflict(format!("{path} is not empty")));
        }
        match entries.remove(&path) {
            Some(_) => Ok(()),
            None => Err(RemoteError::NotFound(path.clone())),
        }
    }

    async fn rename(&self, target: &RemoteFileId, new_name: &str) -> RemoteResult<RemoteFileId> {
        if new_name.is_empty() || new_name.contains('/') {
            return Err(RemoteError::Containment(format!(
                "invalid entry name: {new_name:?}"
            )));
        }
        let from = self.path_of(target)?;
        if from == "app:/" {
            return Err(RemoteError::Containment(
                "the sandbox root cannot be renamed".to_string(),
            ));
        }
        self.begin_op().await?;

        let parent = match from.strip_prefix("app:/").and_then(|t| t.rsplit_once('/')) {
            Some((head, _)) => format!("app:/{head}"),
            None => "app:/".to_string(),
        };
        let to = if parent == "app:/" {
            format!("app:/{new_name}")
        } else {
            format!("{parent}/{new_name}")
        };
        self.relocate(&from, &to)?;
        Ok(RemoteFileId::Path(to))
    }

    async fn move_entry(
        &self,
        target: &RemoteFileId,
        new_parent: &RemoteFileId,
    ) -> RemoteResult<RemoteFileId> {
        let from = self.path_of(target)?;
        let parent = self.path_of(new_parent)?;
        let from_id = RemoteFileId::Path(from.clone());
        if from_id.is_same_or_ancestor_of(&RemoteFileId::Path(parent.clone())) {
            return Ok(from_id);
        }
        let name = from_id.name().ok_or_else(|| {
            RemoteError::Containment("the sandbox root cannot be moved".to_string())
        })?;
        self.begin_op().await?;

        let to = if parent == "app:/" {
            format!("app:/{name}")
        } else {
            format!("{parent}/{name}")
        };
        self.relocate(&from, &to)?;
        Ok(RemoteFileId::Path(to))
    }

    async fn fetch_metadata(&self, target: &RemoteFileId) -> RemoteResult<FileNode> {
        let path = self.path_of(target)?;
        self.begin_op().await?;
        let entries = self.entries.read().expect("lock poisoned");
        match entries.get(&path) {
            Some(entry) => Ok(self.node_at(&path, entry)),
            None => Err(RemoteError::NotFound(path.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(path: &str) -> RemoteFileId {
        RemoteFileId::Path(path.to_string())
    }

    #[tokio::test]
    async fn listing_returns_direct_children_only() {
        let storage = MemoryStorage::new();
        storage.seed_file("app:/a.txt", "A");
        storage.seed_file("app:/docs/b.txt", "B");
        storage.seed_file("app:/docs/sub/c.txt", "C");

        let root = storage.list_children(&id("app:/")).await.unwrap();
        let names: Vec<&str> = root.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "docs"]);

        let docs = storage.list_children(&id("app:/docs")).await.unwrap();
        let names: Vec<&str> = docs.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["b.txt", "sub"]);
    }

    #[tokio::test]
    async fn create_detects_collisions() {
        let storage = MemoryStorage::new();
        storage.seed_file("app:/a.txt", "A");
        let result = storage
            .create_entry(&id("app:/"), "a.txt", EntryKind::File)
            .await;
        assert!(matches!(result, Err(RemoteError::Conflict(_))));
    }

    #[tokio::test]
    async fn rename_carries_the_subtree_along() {
        let storage = MemoryStorage::new();
        storage.seed_file("app:/docs/b.txt", "B");

        let renamed = storage.rename(&id("app:/docs"), "papers").await.unwrap();
        assert_eq!(renamed, id("app:/papers"));
        assert_eq!(storage.content_of("app:/papers/b.txt").as_deref(), Some("B"));
        assert!(storage.content_of("app:/docs/b.txt").is_none());
    }

    #[tokio::test]
    async fn delete_refuses_non_empty_directories() {
        let storage = MemoryStorage::new();
        storage.seed_file("app:/docs/b.txt", "B");
        let result = storage.delete_entry(&id("app:/docs")).await;
        assert!(matches!(result, Err(RemoteError::Conflict(_))));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_slow_read() {
        let storage = MemoryStorage::new();
        storage.seed_file("app:/slow.txt", "content");
        storage.set_latency(Duration::from_secs(5));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = storage.read_content(&id("app:/slow.txt"), cancel).await;
        assert!(matches!(result, Err(RemoteError::Cancelled)));
    }
}
