//! Contender node that has not been granted the lock yet
//!
//! The node is removed when the attempt fails or when the acquiring future is
//! dropped before the lock is granted. Removal that cannot finish right away
//! continues on a background task so the caller is never held past its
//! deadline.

use std::sync::Arc;

use cerrojo_common::RetryPolicy;
use cerrojo_store::{CoordinationStore, StoreError};
use tracing::{debug, warn};

use crate::retry::{RetryFailure, with_retry};

pub(crate) struct PendingNode {
    store: Arc<dyn CoordinationStore>,
    /// `None` once granted or removed
    path: Option<String>,
    cleanup_policy: RetryPolicy,
}

impl PendingNode {
    pub(crate) fn new(
        store: Arc<dyn CoordinationStore>,
        path: String,
        cleanup_policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            path: Some(path),
            cleanup_policy,
        }
    }

    pub(crate) fn path(&self) -> &str {
        self.path.as_deref().unwrap_or_default()
    }

    /// The lock was granted; the node now belongs to the holder.
    pub(crate) fn disarm(mut self) -> String {
        self.path.take().unwrap_or_default()
    }

    /// Try one delete; connection failures hand the node to a background task.
    pub(crate) async fn abandon(mut self) {
        let Some(path) = self.path.clone() else {
            return;
        };

        let result = self.store.delete(&path).await;
        self.path = None;

        match result {
            Ok(()) | Err(StoreError::NodeNotFound(_) | StoreError::SessionExpired(_)) => {
                debug!(node = %path, "Removed abandoned contender node")
            }
            Err(e) if e.is_retryable() => {
                debug!(node = %path, "Deferring contender node removal: {}", e);
                spawn_cleanup(self.store.clone(), path, self.cleanup_policy);
            }
            Err(e) => warn!(node = %path, "Failed to remove abandoned contender node: {}", e),
        }
    }
}

impl Drop for PendingNode {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            debug!(node = %path, "Acquire cancelled, removing contender node");
            spawn_cleanup(self.store.clone(), path, self.cleanup_policy);
        }
    }
}

fn spawn_cleanup(store: Arc<dyn CoordinationStore>, path: String, policy: RetryPolicy) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!(node = %path, "No runtime to remove contender node; it remains until the session ends");
        return;
    };

    runtime.spawn(async move {
        let result = with_retry(&policy, None, "delete", || store.delete(&path)).await;
        match result {
            Ok(())
            | Err(RetryFailure {
                error: StoreError::NodeNotFound(_) | StoreError::SessionExpired(_),
                ..
            }) => debug!(node = %path, "Removed abandoned contender node"),
            Err(failure) => warn!(
                node = %path,
                attempts = failure.attempts,
                "Failed to remove abandoned contender node: {}",
                failure.error
            ),
        }
    });
}
