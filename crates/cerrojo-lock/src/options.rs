//! Mutex options

use std::time::Duration;

use cerrojo_common::{
    Configuration, DEFAULT_ACQUIRE_TIMEOUT_MS, DEFAULT_LOCK_PATH, LOCK_NODE_PREFIX, RetryPolicy,
};

/// Retries granted to a guaranteed release before it gives up
pub const DEFAULT_GUARANTEED_RETRIES: u32 = 10;

/// Options for a [`crate::DistributedMutex`]
#[derive(Clone, Debug)]
pub struct MutexOptions {
    /// Path all contenders of this mutex register under
    pub lock_path: String,
    /// Name prefix of contender nodes
    pub node_prefix: String,
    /// Timeout used by `acquire_default`
    pub acquire_timeout: Duration,
    /// Backoff for transient store failures
    pub retry_policy: RetryPolicy,
    /// Keep retrying the node delete on release until the store confirms it
    pub guaranteed_release: bool,
    /// Retry ceiling for a guaranteed release
    pub guaranteed_retries: u32,
}

impl Default for MutexOptions {
    fn default() -> Self {
        Self {
            lock_path: DEFAULT_LOCK_PATH.to_string(),
            node_prefix: LOCK_NODE_PREFIX.to_string(),
            acquire_timeout: Duration::from_millis(DEFAULT_ACQUIRE_TIMEOUT_MS),
            retry_policy: RetryPolicy::default(),
            guaranteed_release: false,
            guaranteed_retries: DEFAULT_GUARANTEED_RETRIES,
        }
    }
}

impl MutexOptions {
    pub fn new(lock_path: &str) -> Self {
        Self {
            lock_path: lock_path.to_string(),
            ..Default::default()
        }
    }

    pub fn from_configuration(configuration: &Configuration) -> Self {
        Self {
            lock_path: configuration.lock_path(),
            acquire_timeout: configuration.acquire_timeout(),
            retry_policy: configuration.retry_policy(),
            guaranteed_release: configuration.guaranteed_release(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn guaranteed(mut self) -> Self {
        self.guaranteed_release = true;
        self
    }

    /// Backoff used when deleting the contender node on release
    pub(crate) fn release_policy(&self) -> RetryPolicy {
        if self.guaranteed_release {
            RetryPolicy {
                max_retries: self.guaranteed_retries,
                ..self.retry_policy
            }
        } else {
            self.retry_policy
        }
    }
}
