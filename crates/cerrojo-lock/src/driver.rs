//! Contender ordering for the sequential-node lock
//!
//! Pure functions over a child listing: they decide whether the caller holds
//! the lock and, if not, which node it must wait on.

use cerrojo_store::paths;

/// Where a contender stands in the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockPosition {
    /// Own node has the smallest sequence
    Acquired,
    /// Another contender is ahead; wait for `predecessor` to go away
    Waiting { predecessor: String },
    /// Own node is not among the children (session expired or node removed)
    Missing,
}

/// Contender names among `children`, ordered by sequence
pub fn sorted_contenders(children: &[String], prefix: &str) -> Vec<String> {
    let mut contenders: Vec<String> = children
        .iter()
        .filter(|name| name.starts_with(prefix) && paths::sequence_of(name).is_some())
        .cloned()
        .collect();
    paths::sort_by_sequence(&mut contenders);
    contenders
}

/// Position of `own_name` among the contenders in `children`
pub fn evaluate(children: &[String], own_name: &str, prefix: &str) -> LockPosition {
    let contenders = sorted_contenders(children, prefix);
    match contenders.iter().position(|name| name == own_name) {
        None => LockPosition::Missing,
        Some(0) => LockPosition::Acquired,
        Some(index) => LockPosition::Waiting {
            predecessor: contenders[index - 1].clone(),
        },
    }
}
