//! Google Drive adapter
//!
//! Id-addressed provider. Drive has no native path confinement, so the
//! sandbox is a dedicated application folder resolved (and created if
//! missing) on first use; every mutating operation walks parent pointers
//! and refuses targets whose ancestry does not terminate at that folder.
//! Content transfer goes through the dedicated upload endpoint, metadata
//! CRUD through the regular one.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::auth::TokenProvider;
use crate::backend::RemoteStorage;
use crate::error::{RemoteError, RemoteResult};
use crate::id::RemoteFileId;
use crate::node::{EntryKind, FileNode};

pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// Display name of the sandbox folder in the user's Drive.
const APP_FOLDER_NAME: &str = "Text Editor Files";

const LIST_FIELDS: &str =
    "files(id,name,mimeType,size,createdTime,modifiedTime,owners),nextPageToken";
const METADATA_FIELDS: &str = "id,name,mimeType,size,createdTime,modifiedTime,owners";

/// Ancestry walks give up past this depth; the app folder sits near the
/// top of a shallow tree, so anything deeper is already outside it.
const MAX_ANCESTRY_DEPTH: u32 = 32;

/// Google Drive storage adapter.
pub struct GoogleStorage {
    client: reqwest::Client,
    api_base: String,
    upload_base: String,
    tokens: Arc<dyn TokenProvider>,
    app_folder_name: String,
    /// Sandbox folder id, resolved once per adapter lifetime.
    app_folder: OnceCell<String>,
}

// ─────────────────────────────────────────────────────────────────────────
// Wire DTOs
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    mime_type: String,
    /// Drive serializes int64 fields as JSON strings.
    size: Option<String>,
    created_time: Option<String>,
    modified_time: Option<String>,
    owners: Option<Vec<DriveOwner>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveOwner {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveParents {
    #[serde(default)]
    parents: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
}

impl GoogleStorage {
    pub fn new(tokens: Arc<dyn TokenProvider>) -> Self {
        Self::with_base_urls(tokens, DRIVE_API_BASE, DRIVE_UPLOAD_BASE)
    }

    /// Point the adapter at different endpoints (test servers).
    pub fn with_base_urls(
        tokens: Arc<dyn TokenProvider>,
        api_base: impl Into<String>,
        upload_base: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            upload_base: upload_base.into().trim_end_matches('/').to_string(),
            tokens,
            app_folder_name: APP_FOLDER_NAME.to_string(),
            app_folder: OnceCell::new(),
        }
    }

    pub fn with_app_folder_name(mut self, name: impl Into<String>) -> Self {
        self.app_folder_name = name.into();
        self
    }

    fn auth_header(&self) -> RemoteResult<String> {
        let token = self
            .tokens
            .bearer()
            .ok_or_else(|| RemoteError::Auth("no Google OAuth token available".to_string()))?;
        Ok(format!("Bearer {}", token.expose_secret()))
    }

    /// Escape a value for interpolation into a Drive `q=` query string.
    fn escape_query(value: &str) -> String {
        value.replace('\\', "\\\\").replace('\'', "\\'")
    }

    fn drive_id<'a>(&self, id: &'a RemoteFileId) -> RemoteResult<&'a str> {
        match id {
            RemoteFileId::Drive(raw) => Ok(raw),
            RemoteFileId::Path(_) => Err(RemoteError::Containment(
                "identifier was issued by another provider".to_string(),
            )),
        }
    }

    async fn expect_success(
        resp: reqwest::Response,
        what: &str,
    ) -> RemoteResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            Err(RemoteError::from_status(status, what))
        }
    }

    /// Sandbox folder id, looked up by name + folder mimeType and created
    /// when absent. Memoized for the adapter's lifetime.
    async fn app_folder(&self) -> RemoteResult<String> {
        self.app_folder
            .get_or_try_init(|| async {
                let q = format!(
                    "name='{}' and mimeType='{FOLDER_MIME}' and trashed=false",
                    Self::escape_query(&self.app_folder_name)
                );
                let resp = self
                    .client
                    .get(format!("{}/files", self.api_base))
                    .header(AUTHORIZATION, self.auth_header()?)
                    .query(&[("q", q.as_str()), ("fields", "files(id,name)")])
                    .send()
                    .await?;
                let resp = Self::expect_success(resp, "look up app folder").await?;
                let list: DriveFileList = resp.json().await?;
                if let Some(found) = list.files.into_iter().next() {
                    return Ok(found.id);
                }

                tracing::info!(folder = %self.app_folder_name, "creating app folder");
                let resp = self
                    .client
                    .post(format!("{}/files", self.api_base))
                    .header(AUTHORIZATION, self.auth_header()?)
                    .json(&json!({
                        "name": self.app_folder_name,
                        "mimeType": FOLDER_MIME,
                    }))
                    .send()
                    .await?;
                let resp = Self::expect_success(resp, "create app folder").await?;
                let created: CreatedFile = resp.json().await?;
                Ok(created.id)
            })
            .await
            .cloned()
    }

    async fn fetch_parents(&self, id: &str) -> RemoteResult<Vec<String>> {
        let resp = self
            .client
            .get(format!("{}/files/{id}", self.api_base))
            .header(AUTHORIZATION, self.auth_header()?)
            .query(&[("fields", "parents")])
            .send()
            .await?;
        let resp = Self::expect_success(resp, "fetch parents").await?;
        let parents: DriveParents = resp.json().await?;
        Ok(parents.parents)
    }

    /// Whether `id`'s ancestry passes through `needle` before leaving the
    /// tree. Boxed for async recursion over the parent-pointer graph.
    fn ancestry_contains<'a>(
        &'a self,
        id: String,
        needle: &'a str,
        depth: u32,
    ) -> Pin<Box<dyn Future<Output = RemoteResult<bool>> + Send + 'a>> {
        Box::pin(async move {
            if depth == 0 {
                return Ok(false);
            }
            let parents = self.fetch_parents(&id).await?;
            if parents.iter().any(|p| p == needle) {
                return Ok(true);
            }
            for parent in parents {
                if self.ancestry_contains(parent, needle, depth - 1).await? {
                    return Ok(true);
                }
            }
            Ok(false)
        })
    }

    /// Containment check: the id must be the app folder itself or have an
    /// ancestry chain terminating there.
    async fn ensure_contained(&self, id: &str) -> RemoteResult<String> {
        let root = self.app_folder().await?;
        if id == root {
            return Ok(root);
        }
        if self
            .ancestry_contains(id.to_string(), &root, MAX_ANCESTRY_DEPTH)
            .await?
        {
            Ok(root)
        } else {
            Err(RemoteError::Containment(format!(
                "entry {id} is not inside the app folder"
            )))
        }
    }

    /// Live entries named `name` directly under `parent`.
    async fn find_by_name(&self, parent: &str, name: &str) -> RemoteResult<Vec<DriveFile>> {
        let q = format!(
            "name='{}' and '{}' in parents and trashed=false",
            Self::escape_query(name),
            Self::escape_query(parent)
        );
        let resp = self
            .client
            .get(format!("{}/files", self.api_base))
            .header(AUTHORIZATION, self.auth_header()?)
            .query(&[("q", q.as_str()), ("fields", "files(id,name,mimeType)")])
            .send()
            .await?;
        let resp = Self::expect_success(resp, "check destination name").await?;
        let list: DriveFileList = resp.json().await?;
        Ok(list.files)
    }

    fn node_from(file: DriveFile) -> FileNode {
        let kind = if file.mime_type == FOLDER_MIME {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        let owner = file
            .owners
            .and_then(|owners| owners.into_iter().next())
            .and_then(|o| o.display_name);
        FileNode {
            id: RemoteFileId::Drive(file.id),
            name: file.name,
            kind,
            mime_type: Some(file.mime_type),
            size: file.size.and_then(|s| s.parse().ok()),
            created: file.created_time,
            modified: file.modified_time,
            owner,
            children: None,
        }
    }

    fn validate_name(name: &str) -> RemoteResult<()> {
        if name.trim().is_empty() {
            return Err(RemoteError::Containment(
                "entry name may not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStorage for GoogleStorage {
    async fn root(&self) -> RemoteResult<RemoteFileId> {
        Ok(RemoteFileId::Drive(self.app_folder().await?))
    }

    async fn list_children(&self, folder: &RemoteFileId) -> RemoteResult<Vec<FileNode>> {
        let folder = self.drive_id(folder)?;
        let q = format!(
            "'{}' in parents and trashed = false",
            Self::escape_query(folder)
        );

        let mut children = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query: Vec<(&str, String)> = vec![
                ("q", q.clone()),
                ("fields", LIST_FIELDS.to_string()),
                ("pageSize", "100".to_string()),
            ];
            if let Some(token) = page_token.take() {
                query.push(("pageToken", token));
            }

            let resp = self
                .client
                .get(format!("{}/files", self.api_base))
                .header(AUTHORIZATION, self.auth_header()?)
                .query(&query)
                .send()
                .await?;
            let resp = Self::expect_success(resp, "list folder").await?;
            let list: DriveFileList = resp.json().await?;

            children.extend(list.files.into_iter().map(Self::node_from));
            match list.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        tracing::debug!(folder, count = children.len(), "listed folder");
        Ok(children)
    }

    async fn read_content(
        &self,
        file: &RemoteFileId,
        cancel: CancellationToken,
    ) -> RemoteResult<String> {
        let id = self.drive_id(file)?;
        let transfer = async {
            let resp = self
                .client
                .get(format!("{}/files/{id}", self.api_base))
                .header(AUTHORIZATION, self.auth_header()?)
                .query(&[("alt", "media")])
                .send()
                .await?;
            let status = resp.status();
            match status.as_u16() {
                // Drive answers 403 for content that cannot be downloaded
                // raw (native Docs formats and the like).
                403 => Err(RemoteError::UnsupportedFormat(format!(
                    "file {id} has no downloadable plain-text content"
                ))),
                _ => {
                    let resp = Self::expect_success(resp, "download content").await?;
                    Ok(resp.text().await?)
                }
            }
        };

        tokio::select! {
            () = cancel.cancelled() => Err(RemoteError::Cancelled),
            result = transfer => result,
        }
    }

    async fn write_content(&self, file: &RemoteFileId, text: &str) -> RemoteResult<()> {
        let id = self.drive_id(file)?;
        self.ensure_contained(id).await?;
        let resp = self
            .client
            .patch(format!("{}/files/{id}", self.upload_base))
            .header(AUTHORIZATION, self.auth_header()?)
            .header("Content-Type", "text/plain")
            .query(&[("uploadType", "media")])
            .body(text.to_string())
            .send()
            .await?;
        Self::expect_success(resp, "upload content").await?;
        Ok(())
    }

    async fn create_entry(
        &self,
        parent: &RemoteFileId,
        name: &str,
        kind: EntryKind,
    ) -> RemoteResult<RemoteFileId> {
        Self::validate_name(name)?;
        let parent = self.drive_id(parent)?;
        self.ensure_contained(parent).await?;

        // Drive happily stores duplicate names; surface the collision.
        if !self.find_by_name(parent, name).await?.is_empty() {
            return Err(RemoteError::Conflict(format!(
                "an entry named {name:?} already exists here"
            )));
        }

        let mime = match kind {
            EntryKind::Directory => FOLDER_MIME,
            EntryKind::File => "text/plain",
        };
        let resp = self
            .client
            .post(format!("{}/files", self.api_base))
            .header(AUTHORIZATION, self.auth_header()?)
            .json(&json!({
                "name": name,
                "mimeType": mime,
                "parents": [parent],
            }))
            .send()
            .await?;
        let resp = Self::expect_success(resp, "create entry").await?;
        let created: CreatedFile = resp.json().await?;
        Ok(RemoteFileId::Drive(created.id))
    }

    async fn delete_entry(&self, target: &RemoteFileId) -> RemoteResult<()> {
        let id = self.drive_id(target)?;
        let root = self.ensure_contained(id).await?;
        if id == root {
            return Err(RemoteError::Containment(
                "the app folder itself cannot be deleted".to_string(),
            ));
        }
        let resp = self
            .client
            .delete(format!("{}/files/{id}", self.api_base))
            .header(AUTHORIZATION, self.auth_header()?)
            .send()
            .await?;
        Self::expect_success(resp, "delete entry").await?;
        Ok(())
    }

    async fn rename(&self, target: &RemoteFileId, new_name: &str) -> RemoteResult<RemoteFileId> {
        Self::validate_name(new_name)?;
        let id = self.drive_id(target)?;
        let root = self.ensure_contained(id).await?;
        if id == root {
            return Err(RemoteError::Containment(
                "the app folder itself cannot be renamed".to_string(),
            ));
        }
        let resp = self
            .client
            .patch(format!("{}/files/{id}", self.api_base))
            .header(AUTHORIZATION, self.auth_header()?)
            .query(&[("fields", "id,name,mimeType")])
            .json(&json!({ "name": new_name }))
            .send()
            .await?;
        Self::expect_success(resp, "rename entry").await?;
        // Drive ids are stable across renames; children need no touch-up
        // because nothing here addresses entries by name segments.
        Ok(target.clone())
    }

    async fn move_entry(
        &self,
        target: &RemoteFileId,
        new_parent: &RemoteFileId,
    ) -> RemoteResult<RemoteFileId> {
        let id = self.drive_id(target)?;
        let parent = self.drive_id(new_parent)?;
        self.ensure_contained(id).await?;
        self.ensure_contained(parent).await?;

        // Moving into itself or a descendant: no-op.
        if id == parent
            || self
                .ancestry_contains(parent.to_string(), id, MAX_ANCESTRY_DEPTH)
                .await?
        {
            return Ok(target.clone());
        }

        let current = self.fetch_parents(id).await?;
        // Already where it should be; skip the redundant mutation.
        if current.iter().any(|p| p == parent) {
            return Ok(target.clone());
        }

        let remove = current.join(",");
        let resp = self
            .client
            .patch(format!("{}/files/{id}", self.api_base))
            .header(AUTHORIZATION, self.auth_header()?)
            .query(&[
                ("addParents", parent),
                ("removeParents", remove.as_str()),
                ("fields", "id,parents"),
            ])
            .json(&json!({}))
            .send()
            .await?;
        Self::expect_success(resp, "move entry").await?;
        Ok(target.clone())
    }

    async fn fetch_metadata(&self, target: &RemoteFileId) -> RemoteResult<FileNode> {
        let id = self.drive_id(target)?;
        let resp = self
            .client
            .get(format!("{}/files/{id}", self.api_base))
            .header(AUTHORIZATION, self.auth_header()?)
            .query(&[("fields", METADATA_FIELDS)])
            .send()
            .await?;
        let resp = Self::expect_success(resp, "fetch metadata").await?;
        let file: DriveFile = resp.json().await?;
        Ok(Self::node_from(file))
    }
}
