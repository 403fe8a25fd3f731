//! Session state listener trait and forwarding task

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::model::SessionState;
use crate::store::CoordinationStore;

/// Trait for receiving session state transitions.
///
/// Implement this to observe connection loss and recovery, e.g. for logging.
pub trait SessionStateListener: Send + Sync + 'static {
    /// Called for every transition of the watched session.
    fn state_changed(&self, session_id: &str, state: SessionState);
}

/// A simple listener that invokes a closure.
pub struct FnSessionStateListener<F>
where
    F: Fn(&str, SessionState) + Send + Sync + 'static,
{
    f: F,
}

impl<F> FnSessionStateListener<F>
where
    F: Fn(&str, SessionState) + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> SessionStateListener for FnSessionStateListener<F>
where
    F: Fn(&str, SessionState) + Send + Sync + 'static,
{
    fn state_changed(&self, session_id: &str, state: SessionState) {
        (self.f)(session_id, state);
    }
}

/// Forward the store's session transitions to `listener` until the session
/// is lost or its event channel closes.
pub fn spawn_session_listener(
    store: &dyn CoordinationStore,
    listener: Arc<dyn SessionStateListener>,
) -> JoinHandle<()> {
    let session_id = store.session_id().to_string();
    let mut events = store.session_events();

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(state) => {
                    listener.state_changed(&session_id, state);
                    if state == SessionState::Lost {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(session = %session_id, skipped, "Session listener lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!(session = %session_id, "Session listener stopped");
    })
}
