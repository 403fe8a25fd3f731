//! Cerrojo Lock - distributed mutex on a coordination store
//!
//! Contenders register ephemeral sequential nodes under a shared lock path.
//! The contender with the lowest sequence holds the lock; every other
//! contender watches the node directly ahead of it, so a release wakes
//! exactly one waiter.

pub mod driver;
pub mod error;
pub mod metrics;
pub mod mutex;
pub mod options;
mod pending;
mod retry;

pub use error::{LockError, Result};
pub use mutex::{DistributedMutex, Participant};
pub use options::MutexOptions;
