//! Remote storage layer for cloudpad
//!
//! One `RemoteStorage` capability contract, two provider adapters:
//! Yandex Disk (path-addressed) and Google Drive (id-addressed).

pub mod auth;
pub mod backend;
pub mod error;
pub mod google;
pub mod id;
pub mod memory;
pub mod node;
pub mod poll;
pub mod yandex;

pub use auth::{StaticTokens, TokenProvider};
pub use backend::RemoteStorage;
pub use error::{RemoteError, RemoteResult};
pub use google::GoogleStorage;
pub use id::RemoteFileId;
pub use memory::MemoryStorage;
pub use node::{EntryKind, FileNode};
pub use poll::{PendingOperation, PollPolicy, PollStatus};
pub use yandex::YandexStorage;
