//! Client session bound to a `MemoryCoordinator`

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::error::{Result, StoreError};
use crate::model::{DeletionWatch, NodeInfo, SessionId, SessionState};
use crate::paths;
use crate::store::CoordinationStore;

use super::tree::Tree;

/// Client-side options for a store session
#[derive(Clone, Debug, Default)]
pub struct StoreClientConfig {
    /// Namespace every path of the session is rooted under (e.g. "itheima")
    pub namespace: Option<String>,
}

impl StoreClientConfig {
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        let trimmed = namespace.trim().trim_matches('/');
        self.namespace = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
        self
    }
}

/// One client session of the in-memory store.
///
/// The session stays alive until [`MemorySession::close`] is called or the
/// coordinator expires it; dropping the handle alone leaves its ephemeral
/// nodes in place, like a client that vanished without closing.
pub struct MemorySession {
    tree: Arc<Mutex<Tree>>,
    session_id: SessionId,
    events: broadcast::Sender<SessionState>,
    /// Absolute namespace root, e.g. "/itheima"
    root: Option<String>,
}

impl MemorySession {
    pub(crate) fn new(
        tree: Arc<Mutex<Tree>>,
        session_id: SessionId,
        events: broadcast::Sender<SessionState>,
        config: StoreClientConfig,
    ) -> Self {
        Self {
            tree,
            session_id,
            events,
            root: config.namespace.map(|ns| format!("/{}", ns)),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.root.as_deref().map(|root| &root[1..])
    }

    /// Close the session cleanly; its ephemeral nodes are removed.
    pub fn close(&self) {
        let mut tree = self.tree.lock();
        let removed = tree.end_session(&self.session_id, false);
        tree.remove_session(&self.session_id);
        info!(session = %self.session_id, removed, "Session closed");
    }

    fn to_store_path(&self, path: &str) -> Result<String> {
        paths::validate_path(path)?;
        let full = match &self.root {
            None => path.to_string(),
            Some(root) if path == "/" => root.clone(),
            Some(root) => format!("{}{}", root, path),
        };
        paths::validate_path(&full)?;
        Ok(full)
    }

    fn from_store_path(&self, full: &str) -> String {
        match &self.root {
            Some(root) => match full.strip_prefix(root.as_str()) {
                Some("") => "/".to_string(),
                Some(rest) => rest.to_string(),
                None => full.to_string(),
            },
            None => full.to_string(),
        }
    }
}

#[async_trait]
impl CoordinationStore for MemorySession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn session_state(&self) -> SessionState {
        self.tree.lock().session_state(&self.session_id)
    }

    fn session_events(&self) -> broadcast::Receiver<SessionState> {
        self.events.subscribe()
    }

    async fn create_ephemeral_sequential(
        &self,
        parent: &str,
        prefix: &str,
        data: Bytes,
    ) -> Result<String> {
        if prefix.contains('/') {
            return Err(StoreError::InvalidPath(format!("{}/{}", parent, prefix)));
        }
        let full_parent = self.to_store_path(parent)?;

        let created = {
            let mut tree = self.tree.lock();
            tree.check_session(&self.session_id)?;
            tree.create_ephemeral_sequential(&self.session_id, &full_parent, prefix, data)?
        };

        debug!(session = %self.session_id, node = %created, "Created ephemeral sequential node");
        Ok(self.from_store_path(&created))
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        let full = self.to_store_path(path)?;
        let mut tree = self.tree.lock();
        tree.check_session(&self.session_id)?;
        tree.children(&full)
    }

    async fn get_node(&self, path: &str) -> Result<NodeInfo> {
        let full = self.to_store_path(path)?;
        let mut info = {
            let mut tree = self.tree.lock();
            tree.check_session(&self.session_id)?;
            tree.node_info(&full)?
        };
        info.path = path.to_string();
        Ok(info)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.to_store_path(path)?;
        {
            let mut tree = self.tree.lock();
            tree.check_session(&self.session_id)?;
            tree.delete(&full)?;
        }
        debug!(session = %self.session_id, node = %full, "Deleted node");
        Ok(())
    }

    async fn watch_deletion(&self, path: &str) -> Result<DeletionWatch> {
        let full = self.to_store_path(path)?;
        let rx = {
            let mut tree = self.tree.lock();
            tree.check_session(&self.session_id)?;
            tree.register_watch(&self.session_id, &full)?
        };
        trace!(session = %self.session_id, node = %full, "Registered deletion watch");
        Ok(DeletionWatch::new(path.to_string(), rx))
    }
}
