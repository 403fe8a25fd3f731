//! Node tree, session table and watch registry of the in-memory store
//!
//! Every operation runs under the single coordinator mutex, so sequence
//! assignment, ephemeral cleanup and watch delivery are atomic with respect
//! to each other.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, oneshot};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::model::{NodeInfo, SessionId, SessionState};
use crate::paths;

const SESSION_EVENT_CAPACITY: usize = 16;

pub(crate) struct Node {
    data: Bytes,
    ephemeral_owner: Option<SessionId>,
    sequence: Option<u64>,
    created_at: DateTime<Utc>,
    /// Next sequence handed out to a sequential child
    next_child_sequence: u64,
}

impl Node {
    fn persistent() -> Self {
        Self {
            data: Bytes::new(),
            ephemeral_owner: None,
            sequence: None,
            created_at: Utc::now(),
            next_child_sequence: 0,
        }
    }
}

pub(crate) struct SessionEntry {
    state: SessionState,
    events: broadcast::Sender<SessionState>,
    /// Calls that will fail with a connection error before any succeeds
    pending_failures: u32,
    ephemerals: BTreeSet<String>,
}

struct WatchEntry {
    session: SessionId,
    tx: oneshot::Sender<()>,
}

pub(crate) struct Tree {
    nodes: BTreeMap<String, Node>,
    sessions: HashMap<SessionId, SessionEntry>,
    watches: HashMap<String, Vec<WatchEntry>>,
}

impl Default for Tree {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::persistent());
        Self {
            nodes,
            sessions: HashMap::new(),
            watches: HashMap::new(),
        }
    }
}

impl Tree {
    // ========================================================================
    // Sessions
    // ========================================================================

    pub fn open_session(&mut self, session_id: &str) -> broadcast::Sender<SessionState> {
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        self.sessions.insert(
            session_id.to_string(),
            SessionEntry {
                state: SessionState::Connected,
                events: events.clone(),
                pending_failures: 0,
                ephemerals: BTreeSet::new(),
            },
        );
        events
    }

    /// State of a session; closed sessions report `Lost`
    pub fn session_state(&self, session_id: &str) -> SessionState {
        self.sessions
            .get(session_id)
            .map(|s| s.state)
            .unwrap_or(SessionState::Lost)
    }

    /// Gate every client call: expired or closed sessions are rejected,
    /// suspended sessions and injected failures surface as connection loss.
    pub fn check_session(&mut self, session_id: &str) -> Result<()> {
        let entry = match self.sessions.get_mut(session_id) {
            Some(entry) if entry.state != SessionState::Lost => entry,
            _ => return Err(StoreError::SessionExpired(session_id.to_string())),
        };

        if entry.state == SessionState::Suspended {
            return Err(StoreError::Connection(format!(
                "session '{}' is suspended",
                session_id
            )));
        }
        if entry.pending_failures > 0 {
            entry.pending_failures -= 1;
            return Err(StoreError::Connection("injected connection loss".to_string()));
        }
        Ok(())
    }

    pub fn set_session_state(&mut self, session_id: &str, state: SessionState) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(entry) if entry.state != SessionState::Lost => {
                entry.state = state;
                let _ = entry.events.send(state);
                true
            }
            _ => false,
        }
    }

    pub fn inject_failures(&mut self, session_id: &str, count: u32) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(entry) => {
                entry.pending_failures = entry.pending_failures.saturating_add(count);
                true
            }
            None => false,
        }
    }

    /// End a session: remove its ephemeral nodes (firing their watches) and
    /// drop its own watch registrations. `notify` broadcasts `Lost`.
    pub fn end_session(&mut self, session_id: &str, notify: bool) -> usize {
        let Some(entry) = self.sessions.get_mut(session_id) else {
            return 0;
        };
        if entry.state == SessionState::Lost {
            return 0;
        }

        entry.state = SessionState::Lost;
        let ephemerals = std::mem::take(&mut entry.ephemerals);
        if notify {
            let _ = entry.events.send(SessionState::Lost);
        }

        let mut removed = 0;
        for path in &ephemerals {
            if self.nodes.remove(path).is_some() {
                removed += 1;
                self.fire_watches(path);
            }
        }

        for registrations in self.watches.values_mut() {
            registrations.retain(|w| w.session != session_id);
        }
        self.watches.retain(|_, registrations| !registrations.is_empty());

        debug!(session = %session_id, removed, "Session ended");
        removed
    }

    pub fn remove_session(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    pub fn create_ephemeral_sequential(
        &mut self,
        session_id: &str,
        parent: &str,
        prefix: &str,
        data: Bytes,
    ) -> Result<String> {
        self.ensure_path(parent);

        let Some(parent_node) = self.nodes.get_mut(parent) else {
            return Err(StoreError::NodeNotFound(parent.to_string()));
        };
        if parent_node.ephemeral_owner.is_some() {
            return Err(StoreError::InvalidPath(format!(
                "ephemeral node '{}' cannot have children",
                parent
            )));
        }
        let sequence = parent_node.next_child_sequence;
        parent_node.next_child_sequence += 1;

        let path = paths::join(parent, &paths::sequential_name(prefix, sequence));
        self.nodes.insert(
            path.clone(),
            Node {
                data,
                ephemeral_owner: Some(session_id.to_string()),
                sequence: Some(sequence),
                created_at: Utc::now(),
                next_child_sequence: 0,
            },
        );
        if let Some(entry) = self.sessions.get_mut(session_id) {
            entry.ephemerals.insert(path.clone());
        }

        Ok(path)
    }

    /// Create `path` and its ancestors as persistent nodes where missing
    pub fn ensure_path(&mut self, path: &str) {
        for ancestor in paths::ancestors(path)
            .into_iter()
            .chain(std::iter::once(path))
        {
            if !self.nodes.contains_key(ancestor) {
                self.nodes.insert(ancestor.to_string(), Node::persistent());
            }
        }
    }

    pub fn children(&self, path: &str) -> Result<Vec<String>> {
        if !self.nodes.contains_key(path) {
            return Err(StoreError::NodeNotFound(path.to_string()));
        }

        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        let mut names: Vec<String> = self
            .nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect();
        paths::sort_by_sequence(&mut names);
        Ok(names)
    }

    pub fn node_info(&self, path: &str) -> Result<NodeInfo> {
        let node = self
            .nodes
            .get(path)
            .ok_or_else(|| StoreError::NodeNotFound(path.to_string()))?;
        let num_children = self.children(path).map(|c| c.len()).unwrap_or(0);
        Ok(NodeInfo {
            path: path.to_string(),
            sequence: node.sequence,
            ephemeral_owner: node.ephemeral_owner.clone(),
            created_at: node.created_at,
            data: node.data.clone(),
            num_children,
        })
    }

    pub fn delete(&mut self, path: &str) -> Result<()> {
        if path == "/" {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        if !self.nodes.contains_key(path) {
            return Err(StoreError::NodeNotFound(path.to_string()));
        }
        if !self.children(path)?.is_empty() {
            return Err(StoreError::NotEmpty(path.to_string()));
        }

        if let Some(node) = self.nodes.remove(path)
            && let Some(owner) = node.ephemeral_owner
            && let Some(entry) = self.sessions.get_mut(&owner)
        {
            entry.ephemerals.remove(path);
        }
        self.fire_watches(path);
        Ok(())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    // ========================================================================
    // Watches
    // ========================================================================

    pub fn register_watch(&mut self, session_id: &str, path: &str) -> Result<oneshot::Receiver<()>> {
        if !self.nodes.contains_key(path) {
            return Err(StoreError::NodeNotFound(path.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        let registrations = self.watches.entry(path.to_string()).or_default();
        registrations.retain(|w| !w.tx.is_closed());
        registrations.push(WatchEntry {
            session: session_id.to_string(),
            tx,
        });
        Ok(rx)
    }

    pub fn watch_count(&self, path: &str) -> usize {
        self.watches
            .get(path)
            .map(|registrations| registrations.iter().filter(|w| !w.tx.is_closed()).count())
            .unwrap_or(0)
    }

    fn fire_watches(&mut self, path: &str) {
        if let Some(registrations) = self.watches.remove(path) {
            for watch in registrations {
                let _ = watch.tx.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequences_are_per_parent() {
        let mut tree = Tree::default();
        tree.open_session("s1");

        let a0 = tree.create_ephemeral_sequential("s1", "/a", "lock-", Bytes::new()).unwrap();
        let a1 = tree.create_ephemeral_sequential("s1", "/a", "lock-", Bytes::new()).unwrap();
        let b0 = tree.create_ephemeral_sequential("s1", "/b", "lock-", Bytes::new()).unwrap();

        assert_eq!(a0, "/a/lock-0000000000");
        assert_eq!(a1, "/a/lock-0000000001");
        assert_eq!(b0, "/b/lock-0000000000");
    }

    #[test]
    fn test_sequence_not_reused_after_delete() {
        let mut tree = Tree::default();
        tree.open_session("s1");

        let first = tree.create_ephemeral_sequential("s1", "/a", "n-", Bytes::new()).unwrap();
        tree.delete(&first).unwrap();
        let second = tree.create_ephemeral_sequential("s1", "/a", "n-", Bytes::new()).unwrap();

        assert_eq!(second, "/a/n-0000000001");
    }

    #[test]
    fn test_children_are_direct_and_sorted() {
        let mut tree = Tree::default();
        tree.open_session("s1");
        tree.ensure_path("/a/nested/deep");
        tree.create_ephemeral_sequential("s1", "/a", "lock-", Bytes::new()).unwrap();
        tree.create_ephemeral_sequential("s1", "/a", "lock-", Bytes::new()).unwrap();

        let children = tree.children("/a").unwrap();
        assert_eq!(children, vec!["lock-0000000000", "lock-0000000001", "nested"]);
        assert_eq!(tree.children("/").unwrap(), vec!["a"]);
        assert!(matches!(tree.children("/missing"), Err(StoreError::NodeNotFound(_))));
    }

    #[test]
    fn test_delete_rules() {
        let mut tree = Tree::default();
        tree.open_session("s1");
        let node = tree.create_ephemeral_sequential("s1", "/a", "lock-", Bytes::new()).unwrap();

        assert!(matches!(tree.delete("/a"), Err(StoreError::NotEmpty(_))));
        assert!(matches!(tree.delete("/"), Err(StoreError::InvalidPath(_))));
        tree.delete(&node).unwrap();
        assert!(matches!(tree.delete(&node), Err(StoreError::NodeNotFound(_))));
        tree.delete("/a").unwrap();
    }

    #[test]
    fn test_end_session_removes_ephemerals_and_fires_watches() {
        let mut tree = Tree::default();
        let events = tree.open_session("owner");
        tree.open_session("watcher");
        let mut rx_events = events.subscribe();

        let node = tree.create_ephemeral_sequential("owner", "/a", "lock-", Bytes::new()).unwrap();
        let mut watch = tree.register_watch("watcher", &node).unwrap();

        assert_eq!(tree.end_session("owner", true), 1);
        assert!(!tree.contains(&node));
        assert!(watch.try_recv().is_ok());
        assert_eq!(rx_events.try_recv().unwrap(), SessionState::Lost);
        assert!(matches!(tree.check_session("owner"), Err(StoreError::SessionExpired(_))));

        // Ending twice is a no-op
        assert_eq!(tree.end_session("owner", true), 0);
    }

    #[test]
    fn test_end_session_drops_own_watches() {
        let mut tree = Tree::default();
        tree.open_session("owner");
        tree.open_session("watcher");

        let node = tree.create_ephemeral_sequential("owner", "/a", "lock-", Bytes::new()).unwrap();
        let mut watch = tree.register_watch("watcher", &node).unwrap();
        tree.end_session("watcher", false);

        assert_eq!(tree.watch_count(&node), 0);
        assert!(matches!(
            watch.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[test]
    fn test_injected_failures_and_suspension() {
        let mut tree = Tree::default();
        tree.open_session("s1");
        tree.inject_failures("s1", 2);

        assert!(matches!(tree.check_session("s1"), Err(StoreError::Connection(_))));
        assert!(matches!(tree.check_session("s1"), Err(StoreError::Connection(_))));
        assert!(tree.check_session("s1").is_ok());

        tree.set_session_state("s1", SessionState::Suspended);
        assert!(matches!(tree.check_session("s1"), Err(StoreError::Connection(_))));
        tree.set_session_state("s1", SessionState::Reconnected);
        assert!(tree.check_session("s1").is_ok());
    }

    #[test]
    fn test_closed_watch_registrations_are_pruned() {
        let mut tree = Tree::default();
        tree.open_session("s1");
        let node = tree.create_ephemeral_sequential("s1", "/a", "lock-", Bytes::new()).unwrap();

        let first = tree.register_watch("s1", &node).unwrap();
        drop(first);
        let _second = tree.register_watch("s1", &node).unwrap();

        assert_eq!(tree.watch_count(&node), 1);
        assert_eq!(tree.watches.get(&node).map(|w| w.len()), Some(1));
    }
}
