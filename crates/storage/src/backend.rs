//! The `RemoteStorage` capability contract
//!
//! Everything above the adapters (tree cache, document sessions) talks to
//! cloud storage exclusively through this trait. The identifier sum type
//! passes through opaquely; only the issuing adapter inspects it.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::RemoteResult;
use crate::id::RemoteFileId;
use crate::node::{EntryKind, FileNode};

/// Uniform operation set over one provider's storage.
///
/// Error contract: `Auth` on a missing or rejected token, `NotFound` when
/// the entry vanished, `Containment` when a target would leave the
/// application sandbox (raised before any network call), `Conflict` on
/// naming collisions, `Transient` for retryable network/server failures.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Identifier of the sandbox root. May perform network round-trips on
    /// first use (Google resolves its app folder lazily).
    async fn root(&self) -> RemoteResult<RemoteFileId>;

    /// Direct children of a folder, in provider order. Pagination, where
    /// the provider has it, is drained completely before returning.
    async fn list_children(&self, folder: &RemoteFileId) -> RemoteResult<Vec<FileNode>>;

    /// Full text content of a file, decoded as UTF-8.
    ///
    /// Cancelling the token aborts the request; the caller receives
    /// `Cancelled` and must not apply any state.
    async fn read_content(
        &self,
        file: &RemoteFileId,
        cancel: CancellationToken,
    ) -> RemoteResult<String>;

    /// Overwrite a file's content. The file keeps its identity.
    async fn write_content(&self, file: &RemoteFileId, text: &str) -> RemoteResult<()>;

    /// Create a file or folder under `parent`, returning the new entry's
    /// identifier. `Conflict` when the name is already taken.
    async fn create_entry(
        &self,
        parent: &RemoteFileId,
        name: &str,
        kind: EntryKind,
    ) -> RemoteResult<RemoteFileId>;

    /// Delete a single entry. Directory cascade is NOT part of the
    /// contract: callers empty directories bottom-up first, so behavior
    /// stays uniform across providers that do and do not cascade.
    async fn delete_entry(&self, target: &RemoteFileId) -> RemoteResult<()>;

    /// Rename in place, returning the entry's identifier afterwards
    /// (path-addressed providers mint a new one; id-addressed providers
    /// keep it).
    async fn rename(&self, target: &RemoteFileId, new_name: &str) -> RemoteResult<RemoteFileId>;

    /// Re-parent an entry, returning its identifier afterwards. Moving an
    /// entry into itself or its own descendant is a no-op success; the
    /// tree layer rejects such moves before they get here.
    async fn move_entry(
        &self,
        target: &RemoteFileId,
        new_parent: &RemoteFileId,
    ) -> RemoteResult<RemoteFileId>;

    /// Metadata for a single entry, for display and for validating that
    /// an open document still exists.
    async fn fetch_metadata(&self, target: &RemoteFileId) -> RemoteResult<FileNode>;
}
