//! Client-side sync layer: durable offline queue, local cache, and the
//! transport seam. Single-threaded cooperative; the embedding UI drives
//! [`queue::SyncQueue::pump`] from its event loop.

pub mod cache;
pub mod journal;
pub mod queue;
pub mod transport;

use std::fmt;

/// Connection lifecycle as the queue sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Notifications surfaced to the embedding UI.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Connected,
    Disconnected,
    /// Local materialised state changed (remote event, snapshot, or merge).
    StateChanged,
    /// A concurrent edit was reconciled; the cache already reflects it.
    ConflictResolved { shape_id: Option<uuid::Uuid> },
    PeerJoined { user_id: uuid::Uuid, username: Option<String> },
    PeerLeft { user_id: uuid::Uuid },
    PeerCursor { user_id: uuid::Uuid, x: f64, y: f64 },
    /// Batch re-sync finished and the pending queue was cleared.
    Resynced,
    ServerError { message: String },
}

#[derive(Debug)]
pub enum SyncError {
    Storage(std::io::Error),
    Serialization(serde_json::Error),
    Transport(String),
    NotConnected,
    InvalidEvent(String),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Storage(e) => write!(f, "Storage error: {}", e),
            SyncError::Serialization(e) => write!(f, "Serialization error: {}", e),
            SyncError::Transport(msg) => write!(f, "Transport error: {}", msg),
            SyncError::NotConnected => write!(f, "Not connected"),
            SyncError::InvalidEvent(msg) => write!(f, "Invalid event: {}", msg),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Storage(err)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err)
    }
}
