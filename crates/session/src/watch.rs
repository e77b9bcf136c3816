//! Tree-event wiring
//!
//! Connects a session to the tree cache's change broadcast so that
//! deleting or renaming the open document (or any folder above it) is
//! noticed without polling.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use cloudpad_tree::TreeEvent;

use crate::document::DocumentSession;

/// Forward tree events into the session until the sender goes away.
pub fn spawn_tree_watcher(
    session: DocumentSession,
    mut events: broadcast::Receiver<TreeEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => session.handle_tree_event(&event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "tree event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
