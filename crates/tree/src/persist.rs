//! Persisted expanded-folder set
//!
//! Remembers which folders the user had open so they can be re-expanded
//! on the next session. Purely a convenience: the set is advisory and is
//! reconciled against live cache state, never trusted as truth about the
//! remote tree.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use cloudpad_storage::RemoteFileId;

use crate::cache::{FolderTreeCache, NodeState};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ExpandedFolders {
    folders: HashSet<RemoteFileId>,
}

impl ExpandedFolders {
    /// Default location under the per-user data directory.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cloudpad")
            .join("expanded.json")
    }

    /// Load the persisted set; a missing or unreadable file is an empty
    /// set, not an error.
    pub fn load(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        std::fs::write(path, json)
    }

    pub fn mark_expanded(&mut self, id: RemoteFileId) {
        self.folders.insert(id);
    }

    pub fn mark_collapsed(&mut self, id: &RemoteFileId) {
        self.folders.remove(id);
    }

    pub fn contains(&self, id: &RemoteFileId) -> bool {
        self.folders.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteFileId> {
        self.folders.iter()
    }

    /// Reconcile against the live cache: the folders worth re-expanding
    /// are those not already populated or being fetched.
    pub async fn to_restore(&self, cache: &FolderTreeCache) -> Vec<RemoteFileId> {
        let mut restore = Vec::new();
        for id in &self.folders {
            match cache.node_state(id).await {
                NodeState::Unfetched | NodeState::Stale => restore.push(id.clone()),
                NodeState::Loading | NodeState::Populated => {}
            }
        }
        restore
    }
}
