//! Folder-tree state for cloudpad
//!
//! Keeps a lazily populated, invalidation-aware model of the remote
//! hierarchy and exposes filtered views of it. All remote traffic goes
//! through the `RemoteStorage` contract; this crate decides when to
//! fetch, what to keep, and what to throw away.

pub mod cache;
pub mod filter;
pub mod persist;

pub use cache::{FolderTreeCache, NodeState, TreeError, TreeEvent, TreeResult};
pub use filter::{filter_nodes, FilterOptions};
pub use persist::ExpandedFolders;
