//! Re-entrant distributed mutex over ephemeral sequential nodes
//!
//! Acquisition:
//! 1. create an ephemeral sequential node under the lock path
//! 2. list the children; the lowest sequence holds the lock
//! 3. otherwise watch the node directly ahead and wait for its deletion,
//!    session loss, or the deadline, whichever comes first
//! 4. on wake-up list again (several predecessors may have vanished at once)
//!
//! A failed acquisition always deletes the node it created.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cerrojo_store::{CoordinationStore, DeletionWatch, SessionState, StoreError, paths};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::driver::{self, LockPosition};
use crate::error::{LockError, Result};
use crate::metrics;
use crate::options::MutexOptions;
use crate::pending::PendingNode;
use crate::retry::{RetryFailure, with_retry};

/// Local hold state of one mutex instance
#[derive(Default)]
struct LockData {
    hold_count: u32,
    node: Option<String>,
    held_since: Option<DateTime<Utc>>,
}

/// A contender registered under a lock path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub node: String,
    pub sequence: u64,
    pub session_id: Option<String>,
    /// `host:pid` of the process that registered the node
    pub identity: String,
    pub created_at: DateTime<Utc>,
    /// Lowest sequence, i.e. the current holder
    pub is_holder: bool,
}

enum WaitOutcome {
    Recheck,
    TimedOut,
}

/// Distributed mutex shared by every process that uses the same lock path.
///
/// Re-entrancy is per instance: while an instance holds the lock, further
/// acquires on it only bump the hold count. Independent contenders must use
/// independent instances.
pub struct DistributedMutex {
    store: Arc<dyn CoordinationStore>,
    options: MutexOptions,
    identity: Bytes,
    state: Mutex<LockData>,
    /// Serializes first acquisitions so an instance never owns two nodes
    acquire_gate: tokio::sync::Mutex<()>,
}

impl DistributedMutex {
    pub fn new(store: Arc<dyn CoordinationStore>, options: MutexOptions) -> Result<Self> {
        paths::validate_path(&options.lock_path)?;
        if options.node_prefix.is_empty() || options.node_prefix.contains('/') {
            return Err(StoreError::InvalidPath(paths::join(
                &options.lock_path,
                &options.node_prefix,
            ))
            .into());
        }

        Ok(Self {
            store,
            options,
            identity: Bytes::from(participant_identity()),
            state: Mutex::new(LockData::default()),
            acquire_gate: tokio::sync::Mutex::new(()),
        })
    }

    pub fn with_path(store: Arc<dyn CoordinationStore>, lock_path: &str) -> Result<Self> {
        Self::new(store, MutexOptions::new(lock_path))
    }

    pub fn lock_path(&self) -> &str {
        &self.options.lock_path
    }

    pub fn options(&self) -> &MutexOptions {
        &self.options
    }

    /// Whether this instance holds the lock (local state only)
    pub fn is_acquired(&self) -> bool {
        self.state.lock().hold_count > 0
    }

    pub fn hold_count(&self) -> u32 {
        self.state.lock().hold_count
    }

    /// Contender node owned while holding
    pub fn current_node(&self) -> Option<String> {
        self.state.lock().node.clone()
    }

    pub fn held_since(&self) -> Option<DateTime<Utc>> {
        self.state.lock().held_since
    }

    // ========================================================================
    // Acquire
    // ========================================================================

    /// Acquire the lock, waiting at most `timeout`.
    ///
    /// Fails with [`LockError::AcquireTimeout`] when the lock stays contended
    /// or the store stays unreachable beyond the retry policy.
    pub async fn acquire(&self, timeout: Duration) -> Result<()> {
        if self.try_acquire(timeout).await? {
            Ok(())
        } else {
            Err(LockError::AcquireTimeout {
                path: self.options.lock_path.clone(),
                waited: timeout,
            })
        }
    }

    /// Acquire with the configured default timeout
    pub async fn acquire_default(&self) -> Result<()> {
        self.acquire(self.options.acquire_timeout).await
    }

    /// Acquire without a deadline
    pub async fn acquire_forever(&self) -> Result<()> {
        if self.acquire_until(None).await? {
            Ok(())
        } else {
            Err(LockError::IllegalState(format!(
                "unbounded acquire of '{}' returned without the lock",
                self.options.lock_path
            )))
        }
    }

    /// Like [`acquire`](Self::acquire), but reports a contention timeout as `Ok(false)`
    pub async fn try_acquire(&self, timeout: Duration) -> Result<bool> {
        self.acquire_until(Instant::now().checked_add(timeout)).await
    }

    async fn acquire_until(&self, deadline: Option<Instant>) -> Result<bool> {
        if self.reenter() {
            return Ok(true);
        }

        let _gate = match deadline {
            Some(deadline) => {
                match tokio::time::timeout_at(deadline, self.acquire_gate.lock()).await {
                    Ok(gate) => gate,
                    Err(_) => {
                        metrics::record_timeout(&self.options.lock_path);
                        return Ok(false);
                    }
                }
            }
            None => self.acquire_gate.lock().await,
        };
        if self.reenter() {
            return Ok(true);
        }

        let started = Instant::now();
        let Some(node) = self.attempt_lock(deadline, started).await? else {
            metrics::record_timeout(&self.options.lock_path);
            info!(
                path = %self.options.lock_path,
                waited_ms = started.elapsed().as_millis() as u64,
                "Timed out waiting for lock"
            );
            return Ok(false);
        };

        {
            let mut data = self.state.lock();
            data.hold_count = 1;
            data.node = Some(node.clone());
            data.held_since = Some(Utc::now());
        }

        metrics::record_acquired(&self.options.lock_path, started.elapsed());
        info!(
            path = %self.options.lock_path,
            node = %node,
            session = %self.store.session_id(),
            "Lock acquired"
        );
        Ok(true)
    }

    /// Bump the hold count if this instance already holds the lock
    fn reenter(&self) -> bool {
        let mut data = self.state.lock();
        if data.hold_count > 0 {
            data.hold_count += 1;
            trace!(path = %self.options.lock_path, hold_count = data.hold_count, "Re-entered lock");
            true
        } else {
            false
        }
    }

    /// Register a contender node and wait for it to become the lowest.
    ///
    /// Returns the node on success, `None` on timeout. The node is deleted
    /// on every path that does not return it, including cancellation.
    async fn attempt_lock(&self, deadline: Option<Instant>, started: Instant) -> Result<Option<String>> {
        // Subscribe first so a loss during creation is not missed
        let mut events = self.store.session_events();

        let node = match with_retry(&self.options.retry_policy, deadline, "create", || {
            self.store.create_ephemeral_sequential(
                &self.options.lock_path,
                &self.options.node_prefix,
                self.identity.clone(),
            )
        })
        .await
        {
            Ok(node) => node,
            Err(failure) => return Err(self.create_failure(failure, started)),
        };
        debug!(path = %self.options.lock_path, node = %node, "Registered contender");
        let pending = PendingNode::new(self.store.clone(), node, self.options.release_policy());

        let outcome = self
            .wait_for_lock(pending.path(), deadline, started, &mut events)
            .await;
        match outcome {
            Ok(true) => Ok(Some(pending.disarm())),
            Ok(false) => {
                pending.abandon().await;
                Ok(None)
            }
            Err(e) => {
                if matches!(e, LockError::SessionLost { .. }) {
                    metrics::record_session_lost(&self.options.lock_path);
                }
                pending.abandon().await;
                Err(e)
            }
        }
    }

    async fn wait_for_lock(
        &self,
        node: &str,
        deadline: Option<Instant>,
        started: Instant,
        events: &mut broadcast::Receiver<SessionState>,
    ) -> Result<bool> {
        let lock_path = self.options.lock_path.as_str();
        let own_name = paths::node_name(node);

        loop {
            let children = match with_retry(&self.options.retry_policy, deadline, "get_children", || {
                self.store.get_children(lock_path)
            })
            .await
            {
                Ok(children) => children,
                Err(failure) => return Err(self.wait_failure(failure, started)),
            };

            let predecessor = match driver::evaluate(&children, own_name, &self.options.node_prefix) {
                LockPosition::Acquired => return Ok(true),
                LockPosition::Missing => {
                    warn!(path = %lock_path, node = %node, "Contender node vanished while waiting");
                    return Err(self.session_lost());
                }
                LockPosition::Waiting { predecessor } => paths::join(lock_path, &predecessor),
            };

            let watch = match with_retry(&self.options.retry_policy, deadline, "watch_deletion", || {
                self.store.watch_deletion(&predecessor)
            })
            .await
            {
                Ok(watch) => watch,
                // Predecessor left between listing and watching
                Err(RetryFailure {
                    error: StoreError::NodeNotFound(_),
                    ..
                }) => continue,
                Err(failure) => return Err(self.wait_failure(failure, started)),
            };

            debug!(node = %node, predecessor = %predecessor, "Waiting for predecessor");
            match self.await_watch(watch, deadline, events).await? {
                WaitOutcome::Recheck => continue,
                WaitOutcome::TimedOut => return Ok(false),
            }
        }
    }

    /// The single blocking point: predecessor deletion, session loss, or deadline
    async fn await_watch(
        &self,
        mut watch: DeletionWatch,
        deadline: Option<Instant>,
        events: &mut broadcast::Receiver<SessionState>,
    ) -> Result<WaitOutcome> {
        let timer = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(timer);

        let mut events_open = true;
        loop {
            tokio::select! {
                event = &mut watch => {
                    trace!(?event, "Predecessor watch fired");
                    return Ok(WaitOutcome::Recheck);
                }
                state = events.recv(), if events_open => match state {
                    Ok(SessionState::Lost) => {
                        warn!(path = %self.options.lock_path, "Session lost while waiting for lock");
                        return Err(self.session_lost());
                    }
                    Ok(SessionState::Reconnected) => return Ok(WaitOutcome::Recheck),
                    Ok(state) => debug!(%state, "Session state changed while waiting"),
                    Err(RecvError::Lagged(_)) => return Ok(WaitOutcome::Recheck),
                    Err(RecvError::Closed) => events_open = false,
                },
                _ = &mut timer => return Ok(WaitOutcome::TimedOut),
            }
        }
    }

    fn session_lost(&self) -> LockError {
        LockError::SessionLost {
            path: self.options.lock_path.clone(),
        }
    }

    fn create_failure(&self, failure: RetryFailure, started: Instant) -> LockError {
        match failure.error {
            StoreError::SessionExpired(session) => LockError::SessionExpired(session),
            error if error.is_retryable() => self.retries_exhausted(error, failure.attempts, started),
            error => LockError::Store(error),
        }
    }

    /// Failures after the node exists: a vanished lock path or an expired
    /// session both mean the node is gone.
    fn wait_failure(&self, failure: RetryFailure, started: Instant) -> LockError {
        match failure.error {
            StoreError::SessionExpired(_) | StoreError::NodeNotFound(_) => self.session_lost(),
            error if error.is_retryable() => self.retries_exhausted(error, failure.attempts, started),
            error => LockError::Store(error),
        }
    }

    fn retries_exhausted(&self, error: StoreError, attempts: u32, started: Instant) -> LockError {
        warn!(
            path = %self.options.lock_path,
            attempts,
            "Giving up on lock after connection failures: {}",
            error
        );
        LockError::AcquireTimeout {
            path: self.options.lock_path.clone(),
            waited: started.elapsed(),
        }
    }

    // ========================================================================
    // Release
    // ========================================================================

    /// Release one hold; the contender node is deleted when the count reaches zero.
    pub async fn release(&self) -> Result<()> {
        let node = {
            let mut data = self.state.lock();
            if data.hold_count == 0 {
                return Err(LockError::IllegalState(format!(
                    "lock '{}' is not held",
                    self.options.lock_path
                )));
            }
            data.hold_count -= 1;
            if data.hold_count > 0 {
                return Ok(());
            }
            data.held_since = None;
            data.node.take()
        };

        let Some(node) = node else {
            return Err(LockError::IllegalState(format!(
                "lock '{}' has no contender node",
                self.options.lock_path
            )));
        };

        metrics::record_released(&self.options.lock_path);
        self.delete_node(&node).await
    }

    async fn delete_node(&self, node: &str) -> Result<()> {
        let result = with_retry(&self.options.release_policy(), None, "delete", || {
            self.store.delete(node)
        })
        .await;

        match result {
            Ok(()) => {
                info!(path = %self.options.lock_path, node = %node, "Lock released");
                Ok(())
            }
            Err(RetryFailure {
                error: StoreError::NodeNotFound(_),
                ..
            }) => {
                info!(node = %node, "Lock node already removed, treating as released");
                Ok(())
            }
            Err(RetryFailure {
                error: StoreError::SessionExpired(session),
                ..
            }) => {
                warn!(node = %node, session = %session, "Session expired before release, node reaped by store");
                Ok(())
            }
            Err(failure) if failure.error.is_retryable() => {
                if self.options.guaranteed_release {
                    Err(LockError::ReleaseFailed {
                        node: node.to_string(),
                        attempts: failure.attempts,
                        message: failure.error.to_string(),
                    })
                } else {
                    Err(LockError::ConnectionLoss {
                        operation: "release",
                        attempts: failure.attempts,
                        message: failure.error.to_string(),
                    })
                }
            }
            Err(failure) => Err(LockError::Store(failure.error)),
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Run `operation` while holding the lock; the lock is released afterwards.
    pub async fn with_lock<F, T>(&self, timeout: Duration, operation: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        self.acquire(timeout).await?;
        let result = operation.await;
        self.release().await?;
        Ok(result)
    }

    /// Contenders currently registered under the lock path, holder first
    pub async fn participant_nodes(&self) -> Result<Vec<Participant>> {
        let policy = &self.options.retry_policy;
        let lock_path = self.options.lock_path.as_str();

        let children = match with_retry(policy, None, "get_children", || {
            self.store.get_children(lock_path)
        })
        .await
        {
            Ok(children) => children,
            Err(RetryFailure {
                error: StoreError::NodeNotFound(_),
                ..
            }) => return Ok(Vec::new()),
            Err(failure) => return Err(query_failure("participant_nodes", failure)),
        };

        let mut participants = Vec::new();
        for name in driver::sorted_contenders(&children, &self.options.node_prefix) {
            let node = paths::join(lock_path, &name);
            let info = match with_retry(policy, None, "get_node", || self.store.get_node(&node)).await {
                Ok(info) => info,
                Err(RetryFailure {
                    error: StoreError::NodeNotFound(_),
                    ..
                }) => continue,
                Err(failure) => return Err(query_failure("participant_nodes", failure)),
            };

            participants.push(Participant {
                sequence: info.sequence.or_else(|| paths::sequence_of(&name)).unwrap_or_default(),
                session_id: info.ephemeral_owner,
                identity: String::from_utf8_lossy(&info.data).to_string(),
                created_at: info.created_at,
                is_holder: participants.is_empty(),
                node,
            });
        }
        Ok(participants)
    }
}

impl Drop for DistributedMutex {
    fn drop(&mut self) {
        let data = self.state.get_mut();
        if data.hold_count > 0 {
            warn!(
                path = %self.options.lock_path,
                node = ?data.node,
                "Mutex dropped while held; node remains until the session ends"
            );
        }
    }
}

fn query_failure(operation: &'static str, failure: RetryFailure) -> LockError {
    match failure.error {
        StoreError::SessionExpired(session) => LockError::SessionExpired(session),
        error if error.is_retryable() => LockError::ConnectionLoss {
            operation,
            attempts: failure.attempts,
            message: error.to_string(),
        },
        error => LockError::Store(error),
    }
}

fn participant_identity() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "cerrojo-client".to_string());
    format!("{}:{}", host, std::process::id())
}
