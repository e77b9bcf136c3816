//! Filtered tree views
//!
//! A pure transform over a snapshot: nothing here mutates the cache, and
//! the result is recomputed whenever the query or the supported-only
//! toggle changes. Directories survive only if they match themselves or
//! still contain a matching descendant.

use cloudpad_storage::FileNode;

/// Search query plus format toggle, both as the UI hands them over.
#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    /// Case-insensitive substring match on entry names. Empty matches
    /// everything.
    pub query: String,
    /// Keep only documents the editor can open.
    pub supported_only: bool,
}

impl FilterOptions {
    pub fn with_query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            supported_only: false,
        }
    }

    fn matches_name(&self, name: &str) -> bool {
        self.query.is_empty() || name.to_lowercase().contains(&self.query.to_lowercase())
    }
}

/// Filter a forest of nodes, pruning directories that end up empty and
/// do not match the query themselves.
pub fn filter_nodes(nodes: &[FileNode], options: &FilterOptions) -> Vec<FileNode> {
    nodes
        .iter()
        .filter_map(|node| filter_node(node, options))
        .collect()
}

fn filter_node(node: &FileNode, options: &FilterOptions) -> Option<FileNode> {
    if node.is_dir() {
        let kept = filter_nodes(node.children.as_deref().unwrap_or_default(), options);
        if !kept.is_empty() || options.matches_name(&node.name) {
            let mut dir = node.clone();
            dir.children = Some(kept);
            return Some(dir);
        }
        return None;
    }

    if options.matches_name(&node.name) && (!options.supported_only || node.is_supported_text()) {
        return Some(node.clone());
    }
    None
}
