//! In-process coordination store
//!
//! `MemoryCoordinator` plays the role of the coordination service: it owns the
//! node tree and the session table. Each `MemorySession` is one client session
//! bound to it. The coordinator also exposes fault injection (connection loss,
//! suspension, session expiry) so lock recipes can be exercised without an
//! external service.

mod session;
mod tree;

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::model::{SessionId, SessionState};
use crate::paths;

use self::tree::Tree;

pub use self::session::{MemorySession, StoreClientConfig};

/// Shared in-memory coordination store
#[derive(Clone, Default)]
pub struct MemoryCoordinator {
    tree: Arc<Mutex<Tree>>,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session
    pub fn connect(&self, config: StoreClientConfig) -> MemorySession {
        let session_id: SessionId = uuid::Uuid::new_v4().to_string();
        let events = self.tree.lock().open_session(&session_id);
        info!(session = %session_id, namespace = ?config.namespace, "Session established");
        MemorySession::new(self.tree.clone(), session_id, events, config)
    }

    /// Expire a session as the service would after its timeout: its
    /// ephemeral nodes are removed and its clients observe `Lost`.
    ///
    /// Returns the number of ephemeral nodes removed.
    pub fn expire_session(&self, session_id: &str) -> usize {
        let removed = self.tree.lock().end_session(session_id, true);
        info!(session = %session_id, removed, "Session expired");
        removed
    }

    /// Simulate a connection interruption; calls fail until reconnected
    pub fn suspend_session(&self, session_id: &str) -> bool {
        self.tree
            .lock()
            .set_session_state(session_id, SessionState::Suspended)
    }

    pub fn reconnect_session(&self, session_id: &str) -> bool {
        self.tree
            .lock()
            .set_session_state(session_id, SessionState::Reconnected)
    }

    /// Make the next `count` calls of a session fail with connection loss
    pub fn inject_connection_failures(&self, session_id: &str, count: u32) -> bool {
        self.tree.lock().inject_failures(session_id, count)
    }

    pub fn session_state(&self, session_id: &str) -> SessionState {
        self.tree.lock().session_state(session_id)
    }

    /// Children of an absolute store path (ignores namespaces), empty if absent
    pub fn children_of(&self, path: &str) -> Vec<String> {
        self.tree.lock().children(path).unwrap_or_default()
    }

    pub fn exists(&self, path: &str) -> bool {
        paths::validate_path(path).is_ok() && self.tree.lock().contains(path)
    }

    /// Number of nodes in the tree, root included
    pub fn node_count(&self) -> usize {
        self.tree.lock().node_count()
    }

    pub fn watch_count(&self, path: &str) -> usize {
        self.tree.lock().watch_count(path)
    }
}
