//! Coordination store capability consumed by lock recipes

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::model::{DeletionWatch, NodeInfo, SessionState};

/// Client view of a hierarchical coordination store bound to one session.
///
/// Implementations are shared as `Arc<dyn CoordinationStore>`; every handle
/// represents exactly one session, and ephemeral nodes it creates live as
/// long as that session.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Identity of the session this handle is bound to
    fn session_id(&self) -> &str;

    /// Current session state (local, no round-trip)
    fn session_state(&self) -> SessionState;

    /// Subscribe to session state transitions
    fn session_events(&self) -> broadcast::Receiver<SessionState>;

    /// Create an ephemeral node named `prefix` + store-assigned sequence under
    /// `parent`, creating missing parents as persistent nodes.
    ///
    /// Returns the full path of the created node. Sequence assignment is
    /// atomic with respect to every other creation under `parent`.
    async fn create_ephemeral_sequential(
        &self,
        parent: &str,
        prefix: &str,
        data: Bytes,
    ) -> Result<String>;

    /// Child names of `path`, ordered by sequence number
    async fn get_children(&self, path: &str) -> Result<Vec<String>>;

    async fn get_node(&self, path: &str) -> Result<NodeInfo>;

    /// Delete a leaf node. Fails with `NodeNotFound` if it is already gone.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Register a one-shot watch on the deletion of `path`.
    ///
    /// Fails with `NodeNotFound` when the node no longer exists at
    /// registration time, so callers never wait on a node that is gone.
    async fn watch_deletion(&self, path: &str) -> Result<DeletionWatch>;
}
