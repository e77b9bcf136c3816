//! File tree entries and the plain-text format policy

use once_cell::sync::Lazy;
use std::collections::HashSet;

use crate::id::RemoteFileId;

/// Mime types the editor treats as editable plain text.
static PLAIN_TEXT_MIMES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from(["text/plain", "text/x-plain", "application/text"])
});

/// Whether a mime type names an editable plain-text document.
pub fn is_plain_text_mime(mime: &str) -> bool {
    let essence = mime.split(';').next().unwrap_or(mime).trim();
    PLAIN_TEXT_MIMES.contains(essence)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One entry in the remote hierarchy.
///
/// `children` is `None` for a directory that has never been listed, which
/// is distinct from `Some(vec![])` for a directory known to be empty.
/// File nodes never carry children.
#[derive(Debug, Clone, PartialEq)]
pub struct FileNode {
    pub id: RemoteFileId,
    pub name: String,
    pub kind: EntryKind,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
    pub created: Option<String>,
    pub modified: Option<String>,
    /// Owner display name; only Google Drive reports one.
    pub owner: Option<String>,
    pub children: Option<Vec<FileNode>>,
}

impl FileNode {
    pub fn file(id: RemoteFileId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: EntryKind::File,
            mime_type: None,
            size: None,
            created: None,
            modified: None,
            owner: None,
            children: None,
        }
    }

    pub fn directory(id: RemoteFileId, name: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Directory,
            ..Self::file(id, name)
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Whether the entry is a document the editor can open: plain-text
    /// mime type, with a `.txt` extension fallback for providers that do
    /// not report one.
    pub fn is_supported_text(&self) -> bool {
        if self.is_dir() {
            return false;
        }
        match self.mime_type.as_deref() {
            Some(mime) => is_plain_text_mime(mime),
            None => self.name.to_lowercase().ends_with(".txt"),
        }
    }
}
