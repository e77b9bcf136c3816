//! Document sessions for cloudpad
//!
//! Orchestrates "open remote file → edit buffer → debounced autosave →
//! close" on top of the `RemoteStorage` contract, and guards against
//! writes to files that were deleted or renamed away while open.

pub mod document;
pub mod watch;

pub use document::{DocumentSession, OpenDocument, SessionError, SessionResult, SessionState};
pub use watch::spawn_tree_watcher;
