//! Cerrojo Common - Shared configuration and retry policy
//!
//! This crate provides the foundational types used across all Cerrojo components:
//! - `Configuration`: layered configuration (file, environment, overrides)
//! - `RetryPolicy`: bounded exponential backoff for transient store failures
//! - Default values for the lock recipe

pub mod config;
pub mod retry;

// Re-exports for convenience
pub use self::config::{ConfigError, Configuration};
pub use self::retry::RetryPolicy;

/// Default lock path shared by contenders
pub const DEFAULT_LOCK_PATH: &str = "/lock";

/// Default acquire timeout in milliseconds
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 3000;

/// Name prefix for contender nodes created under a lock path
pub const LOCK_NODE_PREFIX: &str = "lock-";

/// Default configuration file location
pub const DEFAULT_CONFIG_FILE: &str = "conf/cerrojo.yml";
