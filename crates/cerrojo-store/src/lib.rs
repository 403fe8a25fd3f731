//! Cerrojo Store - coordination store client capability
//!
//! This crate provides:
//! - `CoordinationStore`: the async capability a lock recipe consumes
//!   (ephemeral sequential nodes, child listing, deletion watches, session state)
//! - Path helpers for hierarchical node names and sequence suffixes
//! - Session state listeners for the embedding application
//! - `MemoryCoordinator`: an in-process store with sessions and fault injection

pub mod error;
pub mod listener;
pub mod memory;
pub mod model;
pub mod paths;
pub mod store;

pub use error::{Result, StoreError};
pub use listener::{FnSessionStateListener, SessionStateListener, spawn_session_listener};
pub use memory::{MemoryCoordinator, MemorySession, StoreClientConfig};
pub use model::{DeletionWatch, NodeInfo, SessionId, SessionState, WatchEvent};
pub use store::CoordinationStore;
