//! The document editing session
//!
//! State machine: `Closed → Loading → Ready → (Saving ⇄ Ready) → Closed`,
//! with a terminal `Rejected` for unsupported formats and for documents
//! deleted or renamed away while open. Metadata is checked before any
//! content fetch; content reads are cancellable; edits arm a debounced
//! autosave with at most one write in flight per session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use cloudpad_storage::{RemoteError, RemoteFileId, RemoteStorage};
use cloudpad_tree::TreeEvent;

/// Quiet period between the last edit and the autosave write.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no document is open")]
    NoDocument,

    /// The backing file was deleted or renamed away; the session never
    /// tries to resurrect it.
    #[error("the document was deleted or renamed away")]
    DocumentDeleted,

    #[error("cannot edit this file: {0}")]
    UnsupportedFormat(String),

    #[error("target is not a regular file")]
    NotAFile,

    /// The caller abandoned the operation; nothing was applied.
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Loading,
    Ready,
    Saving,
    /// Terminal: unsupported format, or the backing file is gone.
    Rejected,
}

/// The currently edited file.
#[derive(Debug, Clone)]
pub struct OpenDocument {
    pub id: RemoteFileId,
    pub name: String,
    pub mime_type: Option<String>,
    pub text: String,
    pub dirty: bool,
    pub deleted: bool,
}

struct Shared {
    state: SessionState,
    doc: Option<OpenDocument>,
    /// Bumped on every open/close; stale async completions check it and
    /// drop their results instead of applying them.
    epoch: u64,
    read_cancel: Option<CancellationToken>,
    debounce_cancel: Option<CancellationToken>,
    last_save_error: Option<String>,
}

struct Inner {
    storage: Arc<dyn RemoteStorage>,
    debounce: Duration,
    shared: Mutex<Shared>,
    /// Serializes writes: at most one save in flight per session.
    save_gate: Mutex<()>,
}

/// A document editing session. Clones share the same underlying state.
#[derive(Clone)]
pub struct DocumentSession {
    inner: Arc<Inner>,
}

impl DocumentSession {
    pub fn new(storage: Arc<dyn RemoteStorage>) -> Self {
        Self::with_debounce(storage, DEFAULT_DEBOUNCE)
    }

    pub fn with_debounce(storage: Arc<dyn RemoteStorage>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                storage,
                debounce,
                shared: Mutex::new(Shared {
                    state: SessionState::Closed,
                    doc: None,
                    epoch: 0,
                    read_cancel: None,
                    debounce_cancel: None,
                    last_save_error: None,
                }),
                save_gate: Mutex::new(()),
            }),
        }
    }

    pub async fn state(&self) -> SessionState {
        self.inner.shared.lock().await.state
    }

    pub async fn document(&self) -> Option<OpenDocument> {
        self.inner.shared.lock().await.doc.clone()
    }

    /// Most recent save failure, if the last save did not succeed.
    /// Autosave failures land here too; they are never silently dropped.
    pub async fn last_save_error(&self) -> Option<String> {
        self.inner.shared.lock().await.last_save_error.clone()
    }

    /// Open a remote file. Metadata goes first: unsupported formats are
    /// rejected without ever fetching content. The content read honors
    /// cancellation (via `close` or a newer `open`) and applies no state
    /// when cancelled.
    pub async fn open(&self, id: &RemoteFileId) -> SessionResult<()> {
        let (epoch, cancel) = {
            let mut shared = self.inner.shared.lock().await;
            cancel_pending(&mut shared);
            shared.epoch += 1;
            shared.state = SessionState::Loading;
            shared.doc = None;
            shared.last_save_error = None;
            let cancel = CancellationToken::new();
            shared.read_cancel = Some(cancel.clone());
            (shared.epoch, cancel)
        };

        let meta = match self.inner.storage.fetch_metadata(id).await {
            Ok(meta) => meta,
            Err(err) => {
                self.settle_failed_open(epoch, SessionState::Closed).await;
                return Err(err.into());
            }
        };
        if meta.is_dir() {
            self.settle_failed_open(epoch, SessionState::Closed).await;
            return Err(SessionError::NotAFile);
        }
        if !meta.is_supported_text() {
            self.settle_failed_open(epoch, SessionState::Rejected).await;
            return Err(SessionError::UnsupportedFormat(
                meta.mime_type.unwrap_or_else(|| "unknown".to_string()),
            ));
        }

        let text = match self.inner.storage.read_content(id, cancel).await {
            Ok(text) => text,
            Err(RemoteError::Cancelled) => return Err(SessionError::Cancelled),
            Err(err) => {
                self.settle_failed_open(epoch, SessionState::Closed).await;
                return Err(err.into());
            }
        };

        let mut shared = self.inner.shared.lock().await;
        if shared.epoch != epoch {
            // Someone closed or re-opened underneath us; drop the result.
            return Err(SessionError::Cancelled);
        }
        shared.doc = Some(OpenDocument {
            id: id.clone(),
            name: meta.name,
            mime_type: meta.mime_type,
            text,
            dirty: false,
            deleted: false,
        });
        shared.state = SessionState::Ready;
        shared.read_cancel = None;
        tracing::debug!(id = %id, "document opened");
        Ok(())
    }

    async fn settle_failed_open(&self, epoch: u64, state: SessionState) {
        let mut shared = self.inner.shared.lock().await;
        if shared.epoch == epoch {
            shared.state = state;
            shared.read_cancel = None;
        }
    }

    /// Replace the buffer and (re)arm the debounced autosave. Each edit
    /// resets the quiet period, so bursts coalesce into one write.
    pub async fn edit(&self, new_text: impl Into<String>) -> SessionResult<()> {
        let (epoch, token) = {
            let mut shared = self.inner.shared.lock().await;
            let epoch = shared.epoch;
            let doc = shared.doc.as_mut().ok_or(SessionError::NoDocument)?;
            doc.text = new_text.into();
            doc.dirty = true;
            let deleted = doc.deleted;
            if let Some(previous) = shared.debounce_cancel.take() {
                previous.cancel();
            }
            if deleted {
                // The buffer still takes edits; scheduling a save for a
                // gone file would only fail later.
                return Ok(());
            }
            let token = CancellationToken::new();
            shared.debounce_cancel = Some(token.clone());
            (epoch, token)
        };

        let inner = self.inner.clone();
        let debounce = self.inner.debounce;
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(debounce) => {
                    match save_epoch(&inner, epoch).await {
                        Ok(()) | Err(SessionError::Cancelled) => {}
                        Err(err) => tracing::warn!(error = %err, "autosave failed"),
                    }
                }
            }
        });
        Ok(())
    }

    /// Write the buffer out now. Refused without touching the network
    /// when the backing file is gone.
    pub async fn save(&self) -> SessionResult<()> {
        let epoch = self.inner.shared.lock().await.epoch;
        save_epoch(&self.inner, epoch).await
    }

    /// Close the session: cancels the pending debounce timer and any
    /// in-flight read.
    pub async fn close(&self) {
        let mut shared = self.inner.shared.lock().await;
        cancel_pending(&mut shared);
        shared.epoch += 1;
        shared.state = SessionState::Closed;
        shared.doc = None;
    }

    /// Mark the open document as gone. Further saves are refused.
    pub async fn mark_deleted(&self) {
        let mut shared = self.inner.shared.lock().await;
        if let Some(doc) = shared.doc.as_mut() {
            doc.deleted = true;
            shared.state = SessionState::Rejected;
        }
        if let Some(token) = shared.debounce_cancel.take() {
            token.cancel();
        }
    }

    /// React to a structural tree change: if the open document (or a
    /// path ancestor of it) was deleted, or renamed/moved away under a
    /// path-addressed provider, the session flips to deleted. Opaque
    /// Drive ids survive renames and moves, so those leave the session
    /// alone.
    pub async fn handle_tree_event(&self, event: &TreeEvent) {
        let affected = {
            let shared = self.inner.shared.lock().await;
            let Some(doc) = shared.doc.as_ref() else {
                return;
            };
            match event {
                TreeEvent::Deleted { ids } => {
                    ids.iter().any(|id| id.is_same_or_ancestor_of(&doc.id))
                }
                TreeEvent::Renamed { old, .. } | TreeEvent::Moved { old, .. } => {
                    matches!(doc.id, RemoteFileId::Path(_))
                        && old.is_same_or_ancestor_of(&doc.id)
                }
                TreeEvent::Created { .. } => false,
            }
        };
        if affected {
            tracing::info!("open document removed underneath the session");
            self.mark_deleted().await;
        }
    }
}

fn cancel_pending(shared: &mut Shared) {
    if let Some(token) = shared.read_cancel.take() {
        token.cancel();
    }
    if let Some(token) = shared.debounce_cancel.take() {
        token.cancel();
    }
}

/// The one save path, for both explicit saves and the autosave timer.
/// The gate serializes writes; the epoch check drops saves that belong
/// to a closed or replaced document.
async fn save_epoch(inner: &Arc<Inner>, epoch: u64) -> SessionResult<()> {
    let _gate = inner.save_gate.lock().await;

    let (id, text) = {
        let mut shared = inner.shared.lock().await;
        if shared.epoch != epoch {
            return Err(SessionError::Cancelled);
        }
        let doc = shared.doc.as_mut().ok_or(SessionError::NoDocument)?;
        if doc.deleted {
            shared.last_save_error = Some("document was deleted".to_string());
            return Err(SessionError::DocumentDeleted);
        }
        if !doc.dirty {
            return Ok(());
        }
        let snapshot = (doc.id.clone(), doc.text.clone());
        shared.state = SessionState::Saving;
        snapshot
    };

    let result = inner.storage.write_content(&id, &text).await;

    let mut shared = inner.shared.lock().await;
    if shared.epoch != epoch {
        return Err(SessionError::Cancelled);
    }
    match result {
        Ok(()) => {
            if let Some(doc) = shared.doc.as_mut() {
                // Edits that landed during the write keep the buffer dirty.
                if doc.text == text {
                    doc.dirty = false;
                }
            }
            shared.state = SessionState::Ready;
            shared.last_save_error = None;
            Ok(())
        }
        Err(err) => {
            // Buffer keeps the user's text; the failure is surfaced, not
            // swallowed.
            shared.state = SessionState::Ready;
            shared.last_save_error = Some(err.to_string());
            Err(err.into())
        }
    }
}
