//! Client-side folder-tree cache
//!
//! Each folder node moves through `Unfetched → Loading → Populated`,
//! falling back to `Stale` when a mutation touches its subtree. Expansion
//! is lazy and idempotent; concurrent expansions of one node collapse
//! into a single in-flight listing. Mutations go invalidate-and-refetch:
//! the cache never speculates about what a provider-side operation will
//! have done once its pending half completes.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{broadcast, watch, RwLock};

use cloudpad_storage::{FileNode, RemoteError, RemoteFileId, RemoteStorage};

pub type TreeResult<T> = Result<T, TreeError>;

#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// Moving a folder into itself or its own subtree.
    #[error("cannot move a folder into its own subtree")]
    CyclicMove,

    /// The provider root is never created, deleted, renamed, or moved.
    #[error("the provider root cannot be modified")]
    RootImmutable,

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Fetch state of one folder node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Never listed; children unknown.
    Unfetched,
    /// A listing is in flight.
    Loading,
    /// Children reflect the last successful listing.
    Populated,
    /// A mutation touched this subtree; cached children remain servable
    /// until the next expand replaces them.
    Stale,
}

/// Structural change notifications, consumed by the editor layer to
/// detect when the open document is deleted or renamed away.
#[derive(Debug, Clone)]
pub enum TreeEvent {
    Created {
        parent: RemoteFileId,
        id: RemoteFileId,
    },
    /// Every entry removed by a delete, the subtree included.
    Deleted { ids: Vec<RemoteFileId> },
    Renamed {
        old: RemoteFileId,
        new: RemoteFileId,
    },
    Moved {
        old: RemoteFileId,
        new: RemoteFileId,
    },
}

struct NodeEntry {
    state: NodeState,
    children: Option<Vec<FileNode>>,
    /// Completion signal present while a listing is in flight.
    fetch_done: Option<watch::Receiver<bool>>,
}

impl NodeEntry {
    fn new() -> Self {
        Self {
            state: NodeState::Unfetched,
            children: None,
            fetch_done: None,
        }
    }

    /// State to fall back to after a failed or abandoned fetch.
    fn settled_state(&self) -> NodeState {
        if self.children.is_some() {
            NodeState::Stale
        } else {
            NodeState::Unfetched
        }
    }
}

struct CacheState {
    nodes: HashMap<RemoteFileId, NodeEntry>,
    /// Child → parent links learned from listings; the only ancestry
    /// source for opaque Drive ids.
    parents: HashMap<RemoteFileId, RemoteFileId>,
}

enum ExpandStep {
    Cached(Vec<FileNode>),
    Wait(watch::Receiver<bool>),
    Fetch(watch::Sender<bool>),
}

/// The folder-tree cache. Cheap to share; all methods take `&self`.
pub struct FolderTreeCache {
    storage: Arc<dyn RemoteStorage>,
    state: RwLock<CacheState>,
    events: broadcast::Sender<TreeEvent>,
}

impl FolderTreeCache {
    pub fn new(storage: Arc<dyn RemoteStorage>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            storage,
            state: RwLock::new(CacheState {
                nodes: HashMap::new(),
                parents: HashMap::new(),
            }),
            events,
        }
    }

    pub fn storage(&self) -> Arc<dyn RemoteStorage> {
        self.storage.clone()
    }

    /// Subscribe to structural change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.events.subscribe()
    }

    /// Current fetch state of a folder.
    pub async fn node_state(&self, folder: &RemoteFileId) -> NodeState {
        self.state
            .read()
            .await
            .nodes
            .get(folder)
            .map_or(NodeState::Unfetched, |entry| entry.state)
    }

    /// Cached children, regardless of staleness (stale-while-revalidate:
    /// old entries stay servable until a refetch replaces them).
    pub async fn children(&self, folder: &RemoteFileId) -> Option<Vec<FileNode>> {
        self.state
            .read()
            .await
            .nodes
            .get(folder)
            .and_then(|entry| entry.children.clone())
    }

    /// Expand a folder: list it if `Unfetched` or `Stale`, otherwise
    /// return the cached children with no network traffic. Concurrent
    /// calls on one not-yet-populated node share a single request.
    pub async fn expand(&self, folder: &RemoteFileId) -> TreeResult<Vec<FileNode>> {
        loop {
            let step = {
                let mut state = self.state.write().await;
                let entry = state
                    .nodes
                    .entry(folder.clone())
                    .or_insert_with(NodeEntry::new);
                match entry.state {
                    NodeState::Populated => {
                        ExpandStep::Cached(entry.children.clone().unwrap_or_default())
                    }
                    NodeState::Loading => match entry.fetch_done.clone() {
                        Some(rx) => ExpandStep::Wait(rx),
                        // Loading without a signal: treat as abandoned.
                        None => {
                            entry.state = entry.settled_state();
                            continue;
                        }
                    },
                    NodeState::Unfetched | NodeState::Stale => {
                        let (tx, rx) = watch::channel(false);
                        entry.state = NodeState::Loading;
                        entry.fetch_done = Some(rx);
                        ExpandStep::Fetch(tx)
                    }
                }
            };

            match step {
                ExpandStep::Cached(children) => return Ok(children),
                ExpandStep::Wait(mut rx) => {
                    if rx.changed().await.is_err() {
                        // The fetching task was dropped mid-flight;
                        // reclaim the node so someone can retry.
                        let mut state = self.state.write().await;
                        if let Some(entry) = state.nodes.get_mut(folder) {
                            if entry.state == NodeState::Loading {
                                entry.state = entry.settled_state();
                                entry.fetch_done = None;
                            }
                        }
                    }
                }
                ExpandStep::Fetch(tx) => return self.fetch_into(folder, tx).await,
            }
        }
    }

    async fn fetch_into(
        &self,
        folder: &RemoteFileId,
        done: watch::Sender<bool>,
    ) -> TreeResult<Vec<FileNode>> {
        let result = self.storage.list_children(folder).await;

        let mut vanished = false;
        let outcome = {
            let mut state = self.state.write().await;
            match result {
                Ok(children) => {
                    for child in &children {
                        state.parents.insert(child.id.clone(), folder.clone());
                    }
                    let entry = state
                        .nodes
                        .entry(folder.clone())
                        .or_insert_with(NodeEntry::new);
                    entry.state = NodeState::Populated;
                    entry.children = Some(children.clone());
                    entry.fetch_done = None;
                    Ok(children)
                }
                Err(RemoteError::NotFound(_)) => {
                    // The folder vanished out-of-band. Self-heal: empty
                    // it here and let the parent's next expand drop it.
                    vanished = true;
                    let parent = Self::parent_in(&state, folder);
                    let entry = state
                        .nodes
                        .entry(folder.clone())
                        .or_insert_with(NodeEntry::new);
                    entry.state = NodeState::Populated;
                    entry.children = Some(Vec::new());
                    entry.fetch_done = None;
                    if let Some(parent) = parent {
                        Self::mark_stale(&mut state, &parent);
                    }
                    Ok(Vec::new())
                }
                Err(err) => {
                    let entry = state
                        .nodes
                        .entry(folder.clone())
                        .or_insert_with(NodeEntry::new);
                    entry.state = entry.settled_state();
                    entry.fetch_done = None;
                    Err(err.into())
                }
            }
        };

        let _ = done.send(true);
        if vanished {
            tracing::warn!(folder = %folder, "folder vanished out-of-band");
            let _ = self.events.send(TreeEvent::Deleted {
                ids: vec![folder.clone()],
            });
        }
        outcome
    }

    /// Mark a subtree stale without dropping its cached children.
    pub async fn invalidate(&self, folder: &RemoteFileId) {
        let mut state = self.state.write().await;
        Self::mark_stale(&mut state, folder);
    }

    fn mark_stale(state: &mut CacheState, folder: &RemoteFileId) {
        let mut pending = vec![folder.clone()];
        while let Some(id) = pending.pop() {
            if let Some(entry) = state.nodes.get_mut(&id) {
                if entry.state == NodeState::Populated {
                    entry.state = NodeState::Stale;
                }
                if let Some(children) = &entry.children {
                    pending.extend(children.iter().map(|child| child.id.clone()));
                }
            }
        }
    }

    fn parent_in(state: &CacheState, id: &RemoteFileId) -> Option<RemoteFileId> {
        state.parents.get(id).cloned().or_else(|| id.parent())
    }

    /// Drop every cache entry keyed at or under `id`.
    fn forget_subtree(state: &mut CacheState, id: &RemoteFileId) {
        state
            .nodes
            .retain(|key, _| !id.is_same_or_ancestor_of(key));
        state
            .parents
            .retain(|key, _| !id.is_same_or_ancestor_of(key));
    }

    /// Create an entry and invalidate its parent for refetch.
    pub async fn apply_create(
        &self,
        parent: &RemoteFileId,
        name: &str,
        kind: cloudpad_storage::EntryKind,
    ) -> TreeResult<RemoteFileId> {
        let id = self.storage.create_entry(parent, name, kind).await?;
        {
            let mut state = self.state.write().await;
            state.parents.insert(id.clone(), parent.clone());
            Self::mark_stale(&mut state, parent);
        }
        let _ = self.events.send(TreeEvent::Created {
            parent: parent.clone(),
            id: id.clone(),
        });
        Ok(id)
    }

    /// Delete an entry. Directories are emptied bottom-up first — the
    /// adapter contract has no cascade — so behavior is identical on
    /// providers that would and would not cascade server-side. Returns
    /// every id that was removed.
    pub async fn apply_delete(&self, target: &RemoteFileId) -> TreeResult<Vec<RemoteFileId>> {
        if self.storage.root().await? == *target {
            return Err(TreeError::RootImmutable);
        }

        let mut deleted = Vec::new();
        self.delete_recursive(target.clone(), &mut deleted).await?;

        {
            let mut state = self.state.write().await;
            let parent = Self::parent_in(&state, target);
            for id in &deleted {
                state.nodes.remove(id);
                state.parents.remove(id);
            }
            if let Some(parent) = parent {
                Self::mark_stale(&mut state, &parent);
            }
        }
        tracing::info!(target = %target, removed = deleted.len(), "deleted subtree");
        let _ = self.events.send(TreeEvent::Deleted {
            ids: deleted.clone(),
        });
        Ok(deleted)
    }

    fn delete_recursive<'a>(
        &'a self,
        id: RemoteFileId,
        deleted: &'a mut Vec<RemoteFileId>,
    ) -> Pin<Box<dyn Future<Output = TreeResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let meta = match self.storage.fetch_metadata(&id).await {
                Ok(meta) => meta,
                // Already gone remotely; nothing left to do but forget it.
                Err(RemoteError::NotFound(_)) => {
                    deleted.push(id);
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            };
            if meta.is_dir() {
                let children = self.storage.list_children(&id).await?;
                for child in children {
                    self.delete_recursive(child.id, deleted).await?;
                }
            }
            self.storage.delete_entry(&id).await?;
            deleted.push(id);
            Ok(())
        })
    }

    /// Rename an entry in place and invalidate whatever the rename could
    /// have touched.
    pub async fn apply_rename(
        &self,
        target: &RemoteFileId,
        new_name: &str,
    ) -> TreeResult<RemoteFileId> {
        if self.storage.root().await? == *target {
            return Err(TreeError::RootImmutable);
        }

        let new_id = self.storage.rename(target, new_name).await?;
        {
            let mut state = self.state.write().await;
            let parent = Self::parent_in(&state, target);
            // Path-addressed subtrees change identity wholesale.
            Self::forget_subtree(&mut state, target);
            if let Some(parent) = parent {
                state.parents.insert(new_id.clone(), parent.clone());
                Self::mark_stale(&mut state, &parent);
            }
        }
        let _ = self.events.send(TreeEvent::Renamed {
            old: target.clone(),
            new: new_id.clone(),
        });
        Ok(new_id)
    }

    /// Move an entry under a new parent. Cyclic moves are rejected here,
    /// by ancestry comparison, before the adapter sees anything.
    pub async fn apply_move(
        &self,
        target: &RemoteFileId,
        new_parent: &RemoteFileId,
    ) -> TreeResult<RemoteFileId> {
        if self.storage.root().await? == *target {
            return Err(TreeError::RootImmutable);
        }
        if target.is_same_or_ancestor_of(new_parent) {
            return Err(TreeError::CyclicMove);
        }
        // Opaque ids carry no hierarchy; walk the cached ancestry chain.
        {
            let state = self.state.read().await;
            let mut cursor = new_parent.clone();
            loop {
                if cursor == *target {
                    return Err(TreeError::CyclicMove);
                }
                match state.parents.get(&cursor) {
                    Some(parent) => cursor = parent.clone(),
                    None => break,
                }
            }
        }

        let new_id = self.storage.move_entry(target, new_parent).await?;
        {
            let mut state = self.state.write().await;
            let old_parent = Self::parent_in(&state, target);
            Self::forget_subtree(&mut state, target);
            state.parents.insert(new_id.clone(), new_parent.clone());
            if let Some(old_parent) = old_parent {
                Self::mark_stale(&mut state, &old_parent);
            }
            Self::mark_stale(&mut state, new_parent);
        }
        let _ = self.events.send(TreeEvent::Moved {
            old: target.clone(),
            new: new_id.clone(),
        });
        Ok(new_id)
    }

    /// Assemble a deep snapshot of the cached subtree under `folder`,
    /// with `children` attached wherever a listing has been cached.
    pub async fn snapshot(&self, folder: &RemoteFileId) -> Vec<FileNode> {
        fn attach(state: &CacheState, nodes: &[FileNode]) -> Vec<FileNode> {
            nodes
                .iter()
                .map(|node| {
                    let mut node = node.clone();
                    if node.is_dir() {
                        if let Some(entry) = state.nodes.get(&node.id) {
                            node.children =
                                entry.children.as_ref().map(|c| attach(state, c));
                        }
                    }
                    node
                })
                .collect()
        }

        let state = self.state.read().await;
        state
            .nodes
            .get(folder)
            .and_then(|entry| entry.children.as_ref())
            .map(|children| attach(&state, children))
            .unwrap_or_default()
    }

    /// Filtered snapshot: a pure view transform over the cached tree.
    pub async fn view(
        &self,
        folder: &RemoteFileId,
        options: &crate::filter::FilterOptions,
    ) -> Vec<FileNode> {
        let snapshot = self.snapshot(folder).await;
        crate::filter::filter_nodes(&snapshot, options)
    }
}
