//! Shared helpers for the Cerrojo scenario tests
//!
//! An `Ensemble` stands in for one coordination service; every `Client` is a
//! separate session on it, as separate processes would have.

use std::sync::Arc;
use std::time::Duration;

use cerrojo_lock::{DistributedMutex, MutexOptions};
use cerrojo_store::{CoordinationStore, MemoryCoordinator, MemorySession, StoreClientConfig};

/// Namespace used by the ticket scenarios
pub const TICKET_NAMESPACE: &str = "itheima";

#[derive(Clone, Default)]
pub struct Ensemble {
    pub coordinator: MemoryCoordinator,
}

impl Ensemble {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(&self) -> Client {
        self.client_with(StoreClientConfig::default())
    }

    pub fn namespaced_client(&self, namespace: &str) -> Client {
        self.client_with(StoreClientConfig::default().with_namespace(namespace))
    }

    fn client_with(&self, config: StoreClientConfig) -> Client {
        Client {
            session: Arc::new(self.coordinator.connect(config)),
        }
    }

    /// Poll until `path` has `count` children or `limit` elapses
    pub async fn wait_for_children(&self, path: &str, count: usize, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if self.coordinator.children_of(path).len() == count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// One client session
#[derive(Clone)]
pub struct Client {
    pub session: Arc<MemorySession>,
}

impl Client {
    pub fn store(&self) -> Arc<dyn CoordinationStore> {
        self.session.clone()
    }

    pub fn session_id(&self) -> String {
        self.session.session_id().to_string()
    }

    pub fn mutex(&self, lock_path: &str) -> DistributedMutex {
        self.mutex_with(MutexOptions::new(lock_path))
    }

    /// Panics on an invalid lock path
    pub fn mutex_with(&self, options: MutexOptions) -> DistributedMutex {
        match DistributedMutex::new(self.store(), options) {
            Ok(mutex) => mutex,
            Err(e) => panic!("invalid mutex options: {}", e),
        }
    }
}
