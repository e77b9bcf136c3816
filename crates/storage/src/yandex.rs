//! Yandex Disk adapter
//!
//! Path-addressed provider. All identifiers live in the application
//! sandbox (`app:/…`); every path is normalized into that namespace and
//! containment-checked before a single request goes out. Content transfer
//! is a two-step indirection through short-lived signed URLs, and slow
//! mutations come back as operation hrefs that are polled with a bounded
//! policy.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::auth::TokenProvider;
use crate::backend::RemoteStorage;
use crate::error::{RemoteError, RemoteResult};
use crate::id::RemoteFileId;
use crate::node::{EntryKind, FileNode};
use crate::poll::{PendingOperation, PollPolicy, PollStatus};

pub const YANDEX_API_BASE: &str = "https://cloud-api.yandex.net/v1/disk";

/// Page size for listing requests; pages are drained until the reported
/// total is reached.
const LIST_PAGE_SIZE: u64 = 200;

const METADATA_FIELDS: &str = "name,path,type,mime_type,size,created,modified";

/// Yandex Disk storage adapter.
pub struct YandexStorage {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
    poll: PollPolicy,
    /// Localized display prefixes of the application folder, as the
    /// provider renders them in returned paths. Stripped back to `app:/`
    /// during normalization.
    display_prefixes: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────
// Wire DTOs
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Resource {
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
    mime_type: Option<String>,
    size: Option<u64>,
    created: Option<String>,
    modified: Option<String>,
    #[serde(rename = "_embedded")]
    embedded: Option<Embedded>,
}

#[derive(Debug, Deserialize)]
struct Embedded {
    items: Vec<Resource>,
    total: u64,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OperationStatus {
    status: String,
}

impl YandexStorage {
    pub fn new(tokens: Arc<dyn TokenProvider>) -> Self {
        Self::with_base_url(tokens, YANDEX_API_BASE)
    }

    /// Point the adapter at a different API base (test servers).
    pub fn with_base_url(tokens: Arc<dyn TokenProvider>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
            poll: PollPolicy::default(),
            display_prefixes: vec![
                "disk:/Приложения/Cloudpad".to_string(),
                "disk:/Applications/Cloudpad".to_string(),
            ],
        }
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_display_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.display_prefixes = prefixes;
        self
    }

    /// Normalize any provider-issued or caller-supplied path into the
    /// canonical `app:/…` form. Idempotent. Paths that resolve outside
    /// the sandbox are rejected here, before any network traffic.
    pub fn normalize(&self, raw: &str) -> RemoteResult<String> {
        let raw = raw.trim();

        let tail = if let Some(rest) = raw.strip_prefix("app:/") {
            rest.to_string()
        } else if let Some(rest) = self.strip_display_prefix(raw) {
            rest
        } else if raw.starts_with("disk:") {
            return Err(RemoteError::Containment(format!(
                "path is outside the application folder: {raw}"
            )));
        } else {
            raw.trim_start_matches('/').to_string()
        };

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

    fn strip_display_prefix(&self, raw: &str) -> Option<String> {
        for prefix in &self.display_prefixes {
            let prefix = prefix.trim_end_matches('/');
            if raw == prefix {
                return Some(String::new());
            }
            if let Some(rest) = raw.strip_prefix(prefix) {
                if let Some(rest) = rest.strip_prefix('/') {
                    return Some(rest.to_string());
                }
            }
        }
        None
    }

    /// Resolve an identifier into a normalized sandbox path. A Drive id
    /// here is a cross-provider mixup: by definition it cannot name
    /// anything inside this adapter's sandbox.
    fn path_of(&self, id: &RemoteFileId) -> RemoteResult<String> {
        match id {
            RemoteFileId::Path(path) => self.normalize(path),
            RemoteFileId::Drive(_) => Err(RemoteError::Containment(
                "identifier was issued by another provider".to_string(),
            )),
        }
    }

    fn auth_header(&self) -> RemoteResult<String> {
        let token = self
            .tokens
            .bearer()
            .ok_or_else(|| RemoteError::Auth("no Yandex OAuth token available".to_string()))?;
        Ok(format!("OAuth {}", token.expose_secret()))
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{endpoint}", self.base_url)
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

    /// First step of the signed-URL indirection: ask the provider for a
    /// short-lived href. A non-success status or a missing href is a hard
    /// failure; the transfer step is never attempted after one.
    async fn fetch_signed_href(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
        what: &str,
    ) -> RemoteResult<String> {
        let resp = self
            .client
            .get(self.url(endpoint))
            .header(AUTHORIZATION, self.auth_header()?)
            .query(query)
            .send()
            .await?;
        let resp = Self::expect_success(resp, what).await?;
        let link: Link = resp.json().await?;
        link.href
            .ok_or_else(|| RemoteError::Transient(format!("{what}: response carried no href")))
    }

    async fn poll_operation(&self, op: PendingOperation) -> RemoteResult<()> {
        self.poll
            .run(|| {
                let href = op.href.clone();
                async move {
                    let resp = self
                        .client
                        .get(&href)
                        .header(AUTHORIZATION, self.auth_header()?)
                        .send()
                        .await?;
                    let resp = Self::expect_success(resp, "operation status").await?;
                    let status: OperationStatus = resp.json().await?;
                    Ok(match status.status.as_str() {
                        "success" => PollStatus::Success,
                        "failed" => PollStatus::Failed(format!("operation href {href}")),
                        _ => PollStatus::InProgress,
                    })
                }
            })
            .await
    }

    /// Accepted-but-pending responses (202 + href) resolve through the
    /// bounded poll; anything else must already be a success status.
    async fn resolve_maybe_pending(
        &self,
        resp: reqwest::Response,
        what: &str,
    ) -> RemoteResult<()> {
        if resp.status() == StatusCode::ACCEPTED {
            let link: Link = resp.json().await?;
            let href = link
                .href
                .ok_or_else(|| RemoteError::Transient(format!("{what}: 202 without href")))?;
            tracing::debug!(operation = what, "waiting for pending operation");
            self.poll_operation(PendingOperation { href }).await
        } else {
            Self::expect_success(resp, what).await.map(|_| ())
        }
    }

    /// Native move primitive; rename is a move within the same parent.
    async fn move_paths(&self, from: &str, to: &str, what: &str) -> RemoteResult<()> {
        let resp = self
            .client
            .post(self.url("/resources/move"))
            .header(AUTHORIZATION, self.auth_header()?)
            .query(&[("from", from), ("path", to), ("overwrite", "false")])
            .send()
            .await?;
        self.resolve_maybe_pending(resp, what).await
    }

    fn node_from(&self, resource: Resource) -> RemoteResult<FileNode> {
        let path = self.normalize(&resource.path)?;
        let kind = if resource.kind == "dir" {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        Ok(FileNode {
            id: RemoteFileId::Path(path),
            name: resource.name,
            kind,
            mime_type: resource.mime_type,
            size: resource.size,
            created: resource.created,
            modified: resource.modified,
            owner: None,
            children: None,
        })
    }

    fn validate_name(name: &str) -> RemoteResult<()> {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(RemoteError::Containment(format!(
                "invalid entry name: {name:?}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStorage for YandexStorage {
    async fn root(&self) -> RemoteResult<RemoteFileId> {
        Ok(RemoteFileId::Path("app:/".to_string()))
    }

    async fn list_children(&self, folder: &RemoteFileId) -> RemoteResult<Vec<FileNode>> {
        let path = self.path_of(folder)?;
        let mut children = Vec::new();
        let mut offset: u64 = 0;

        loop {
            let limit = LIST_PAGE_SIZE.to_string();
            let offset_s = offset.to_string();
            let resp = self
                .client
                .get(self.url("/resources"))
                .header(AUTHORIZATION, self.auth_header()?)
                .query(&[
                    ("path", path.as_str()),
                    ("limit", limit.as_str()),
                    ("offset", offset_s.as_str()),
                ])
                .send()
                .await?;
            let resp = Self::expect_success(resp, "list folder").await?;
            let resource: Resource = resp.json().await?;
            let embedded = resource.embedded.ok_or_else(|| {
                RemoteError::NotFound(format!("{path} is not a folder"))
            })?;

            let total = embedded.total;
            let page_len = embedded.items.len() as u64;
            for item in embedded.items {
                children.push(self.node_from(item)?);
            }
            offset += page_len;
            if offset >= total || page_len == 0 {
                break;
            }
        }

        tracing::debug!(folder = %path, count = children.len(), "listed folder");
        Ok(children)
    }

    async fn read_content(
        &self,
        file: &RemoteFileId,
        cancel: CancellationToken,
    ) -> RemoteResult<String> {
        let path = self.path_of(file)?;
        let transfer = async {
            let href = self
                .fetch_signed_href(
                    "/resources/download",
                    &[("path", path.as_str())],
                    "request download link",
                )
                .await?;
            let resp = self.client.get(&href).send().await?;
            let resp = Self::expect_success(resp, "download content").await?;
            let bytes = resp.bytes().await?;
            String::from_utf8(bytes.to_vec()).map_err(|_| {
                RemoteError::UnsupportedFormat(format!("{path} is not UTF-8 text"))
            })
        };

        tokio::select! {
            () = cancel.cancelled() => Err(RemoteError::Cancelled),
            result = transfer => result,
        }
    }

    async fn write_content(&self, file: &RemoteFileId, text: &str) -> RemoteResult<()> {
        let path = self.path_of(file)?;
        let href = self
            .fetch_signed_href(
                "/resources/upload",
                &[("path", path.as_str()), ("overwrite", "true")],
                "request upload link",
            )
            .await?;
        let resp = self
            .client
            .put(&href)
            .header("Content-Type", "text/plain")
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
        let parent_path = self.path_of(parent)?;
        let path = self.normalize(&format!("{parent_path}/{name}"))?;

        match kind {
            EntryKind::Directory => {
                let resp = self
                    .client
                    .put(self.url("/resources"))
                    .header(AUTHORIZATION, self.auth_header()?)
                    .query(&[("path", path.as_str())])
                    .send()
                    .await?;
                Self::expect_success(resp, "create folder").await?;
            }
            EntryKind::File => {
                // overwrite=false makes the provider surface collisions as 409
                let href = self
                    .fetch_signed_href(
                        "/resources/upload",
                        &[("path", path.as_str()), ("overwrite", "false")],
                        "create file",
                    )
                    .await?;
                let resp = self
                    .client
                    .put(&href)
                    .header("Content-Type", "text/plain")
                    .body(String::new())
                    .send()
                    .await?;
                Self::expect_success(resp, "create file").await?;
            }
        }

        Ok(RemoteFileId::Path(path))
    }

    async fn delete_entry(&self, target: &RemoteFileId) -> RemoteResult<()> {
        let path = self.path_of(target)?;
        let resp = self
            .client
            .delete(self.url("/resources"))
            .header(AUTHORIZATION, self.auth_header()?)
            .query(&[("path", path.as_str()), ("permanently", "true")])
            .send()
            .await?;
        self.resolve_maybe_pending(resp, "delete entry").await
    }

    async fn rename(&self, target: &RemoteFileId, new_name: &str) -> RemoteResult<RemoteFileId> {
        Self::validate_name(new_name)?;
        let path = self.path_of(target)?;
        let tail = path.strip_prefix("app:/").unwrap_or_default();
        let parent_path = match tail.rsplit_once('/') {
            Some((head, _)) => format!("app:/{head}"),
            None if !tail.is_empty() => "app:/".to_string(),
            None => {
                return Err(RemoteError::Containment(
                    "the sandbox root cannot be renamed".to_string(),
                ))
            }
        };
        let new_path = self.normalize(&format!("{parent_path}/{new_name}"))?;
        self.move_paths(&path, &new_path, "rename entry").await?;
        Ok(RemoteFileId::Path(new_path))
    }

    async fn move_entry(
        &self,
        target: &RemoteFileId,
        new_parent: &RemoteFileId,
    ) -> RemoteResult<RemoteFileId> {
        let from = self.path_of(target)?;
        let parent_path = self.path_of(new_parent)?;
        let from_id = RemoteFileId::Path(from.clone());
        let parent_id = RemoteFileId::Path(parent_path.clone());

        // Moving a folder into itself or its own descendant: no-op.
        if from_id.is_same_or_ancestor_of(&parent_id) {
            return Ok(from_id);
        }

        let name = from_id.name().ok_or_else(|| {
            RemoteError::Containment("the sandbox root cannot be moved".to_string())
        })?;
        let to = self.normalize(&format!("{parent_path}/{name}"))?;
        self.move_paths(&from, &to, "move entry").await?;
        Ok(RemoteFileId::Path(to))
    }

    async fn fetch_metadata(&self, target: &RemoteFileId) -> RemoteResult<FileNode> {
        let path = self.path_of(target)?;
        let resp = self
            .client
            .get(self.url("/resources"))
            .header(AUTHORIZATION, self.auth_header()?)
            .query(&[("path", path.as_str()), ("fields", METADATA_FIELDS)])
            .send()
            .await?;
        let resp = Self::expect_success(resp, "fetch metadata").await?;
        let resource: Resource = resp.json().await?;
        self.node_from(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{NoTokens, StaticTokens};

    fn adapter() -> YandexStorage {
        YandexStorage::new(Arc::new(StaticTokens::new("token")))
    }

    #[test]
    fn normalization_is_idempotent() {
        let yandex = adapter();
        let once = yandex.normalize("disk:/Приложения/Cloudpad/notes/a.txt").unwrap();
        assert_eq!(once, "app:/notes/a.txt");
        assert_eq!(yandex.normalize(&once).unwrap(), once);
    }

    #[test]
    fn relative_paths_land_under_the_sandbox() {
        let yandex = adapter();
        assert_eq!(yandex.normalize("/notes/a.txt").unwrap(), "app:/notes/a.txt");
        assert_eq!(yandex.normalize("notes//b.txt").unwrap(), "app:/notes/b.txt");
        assert_eq!(yandex.normalize("").unwrap(), "app:/");
    }

    #[test]
    fn dot_segments_collapse_without_escaping() {
        let yandex = adapter();
        assert_eq!(
            yandex.normalize("app:/a/./b/../c.txt").unwrap(),
            "app:/a/c.txt"
        );
        assert!(matches!(
            yandex.normalize("app:/../outside"),
            Err(RemoteError::Containment(_))
        ));
        assert!(matches!(
            yandex.normalize("../outside"),
            Err(RemoteError::Containment(_))
        ));
    }

    #[test]
    fn foreign_disk_paths_are_rejected() {
        let yandex = adapter();
        assert!(matches!(
            yandex.normalize("disk:/Documents/secret.txt"),
            Err(RemoteError::Containment(_))
        ));
    }

    #[test]
    fn foreign_ids_are_rejected() {
        let yandex = adapter();
        let drive = RemoteFileId::Drive("abc".to_string());
        assert!(matches!(
            yandex.path_of(&drive),
            Err(RemoteError::Containment(_))
        ));
    }

    #[tokio::test]
    async fn self_move_is_a_no_op_without_network() {
        // The guard fires before any request; no server is running here.
        let yandex = adapter();
        let dir = RemoteFileId::Path("app:/a".to_string());
        let descendant = RemoteFileId::Path("app:/a/b/c".to_string());

        let result = yandex.move_entry(&dir, &descendant).await.unwrap();
        assert_eq!(result, dir);
    }

    #[tokio::test]
    async fn missing_token_fails_before_any_request() {
        let yandex = YandexStorage::new(Arc::new(NoTokens));
        let file = RemoteFileId::Path("app:/a.txt".to_string());
        assert!(matches!(
            yandex.delete_entry(&file).await,
            Err(RemoteError::Auth(_))
        ));
    }

    #[tokio::test]
    async fn slash_in_entry_name_is_rejected() {
        let yandex = adapter();
        let parent = RemoteFileId::Path("app:/".to_string());
        assert!(matches!(
            yandex
                .create_entry(&parent, "a/b", EntryKind::File)
                .await,
            Err(RemoteError::Containment(_))
        ));
    }
}
