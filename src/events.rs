//! UI state observer
//!
//! Components publish [`SyncEvent`]s on a broadcast channel; any number of
//! listeners (a UI, the CLI progress bars, tests) subscribe and react. A
//! publish with no subscribers is not an error.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::BError;
use crate::session_manager::SessionState;

const EVENT_CAPACITY: usize = 256;

/// Screens the UI can be on, as far as this layer cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    #[default]
    Login,
    Browser,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    SessionChanged { state: SessionState, username: Option<String> },
    /// A fresh listing for `path` was stored in the cache.
    FolderChanged { path: String },
    /// The listing for `path` was marked stale.
    FolderInvalidated { path: String },
    UploadProgress { id: u64, name: String, bytes_done: u64, total_bytes: u64 },
    UploadFinished { id: u64, name: String },
    Error { error: BError },
    Navigate { screen: Screen },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
