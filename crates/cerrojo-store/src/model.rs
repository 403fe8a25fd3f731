//! Store model types: sessions, nodes, and deletion watches

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

/// Identity of a client session
pub type SessionId = String;

/// Session lifecycle as seen by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Session established
    Connected,
    /// Connection interrupted; the session may still be alive on the store
    Suspended,
    /// Session expired; all of its ephemeral nodes are gone
    Lost,
    /// Connection restored after a suspension, session intact
    Reconnected,
}

impl SessionState {
    /// Whether calls can currently reach the store
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Reconnected)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Connected => "CONNECTED",
            SessionState::Suspended => "SUSPENDED",
            SessionState::Lost => "LOST",
            SessionState::Reconnected => "RECONNECTED",
        };
        f.write_str(name)
    }
}

/// Snapshot of a single node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub path: String,
    /// Store-assigned sequence for sequential nodes
    pub sequence: Option<u64>,
    /// Owning session for ephemeral nodes
    pub ephemeral_owner: Option<SessionId>,
    pub created_at: DateTime<Utc>,
    pub data: Bytes,
    pub num_children: usize,
}

/// Notification delivered by a [`DeletionWatch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// The watched node was removed (explicit delete or session expiry)
    NodeDeleted { path: String },
    /// The registration was discarded before the node went away,
    /// e.g. because the watching session ended
    WatchRemoved { path: String },
}

impl WatchEvent {
    pub fn path(&self) -> &str {
        match self {
            WatchEvent::NodeDeleted { path } | WatchEvent::WatchRemoved { path } => path,
        }
    }
}

/// One-shot subscription on the deletion of a node.
///
/// Resolves exactly once. Dropping it cancels the registration; the store
/// prunes cancelled registrations lazily.
#[derive(Debug)]
pub struct DeletionWatch {
    path: String,
    rx: oneshot::Receiver<()>,
}

impl DeletionWatch {
    pub(crate) fn new(path: String, rx: oneshot::Receiver<()>) -> Self {
        Self { path, rx }
    }

    /// Path of the watched node, as seen by the registering client
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Future for DeletionWatch {
    type Output = WatchEvent;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let path = self.path.clone();
        Pin::new(&mut self.rx).poll(cx).map(|result| match result {
            Ok(()) => WatchEvent::NodeDeleted { path },
            Err(_) => WatchEvent::WatchRemoved { path },
        })
    }
}
