//! Configuration management for Cerrojo
//!
//! Values are layered (lowest precedence first): the optional config file,
//! `CERROJO_*` environment variables, then explicit overrides. Every getter
//! falls back to a built-in default so an empty configuration is valid.
//!
//! Environment variables use `_` after the prefix and `__` between key
//! segments, e.g. `CERROJO_LOCK__ACQUIRE_TIMEOUT_MS=500` sets
//! `lock.acquire_timeout_ms`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};

use crate::retry::RetryPolicy;
use crate::{DEFAULT_ACQUIRE_TIMEOUT_MS, DEFAULT_CONFIG_FILE, DEFAULT_LOCK_PATH};

pub const LOCK_PATH: &str = "lock.path";
pub const LOCK_ACQUIRE_TIMEOUT_MS: &str = "lock.acquire_timeout_ms";
pub const LOCK_GUARANTEED_RELEASE: &str = "lock.guaranteed_release";
pub const CLIENT_NAMESPACE: &str = "client.namespace";
pub const RETRY_INITIAL_DELAY_MS: &str = "retry.initial_delay_ms";
pub const RETRY_MAX_DELAY_MS: &str = "retry.max_delay_ms";
pub const RETRY_MAX_RETRIES: &str = "retry.max_retries";
pub const LOG_LEVEL: &str = "log.level";
pub const LOG_DIR: &str = "log.dir";

/// Errors raised while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("config file '{0}' not found")]
    FileNotFound(PathBuf),
}

/// Application configuration wrapper
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Load configuration from `file` (or the default location when absent),
    /// the environment, and the given overrides.
    ///
    /// An explicitly named file must exist; the default file is optional.
    pub fn load(file: Option<&Path>, overrides: Vec<(String, String)>) -> Result<Self, ConfigError> {
        let file_source = match file {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::FileNotFound(path.to_path_buf()));
                }
                File::from(path).required(true)
            }
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let mut builder = Config::builder().add_source(file_source).add_source(
            Environment::with_prefix("cerrojo")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        for (key, value) in overrides {
            builder = builder.set_override(key, value)?;
        }

        Ok(Self {
            config: builder.build()?,
        })
    }

    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    // ========================================================================
    // Lock Configuration
    // ========================================================================

    pub fn lock_path(&self) -> String {
        self.config
            .get_string(LOCK_PATH)
            .unwrap_or(DEFAULT_LOCK_PATH.to_string())
    }

    pub fn acquire_timeout(&self) -> Duration {
        let ms = self
            .config
            .get_int(LOCK_ACQUIRE_TIMEOUT_MS)
            .map(|v| v.max(0) as u64)
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_MS);
        Duration::from_millis(ms)
    }

    pub fn guaranteed_release(&self) -> bool {
        self.config.get_bool(LOCK_GUARANTEED_RELEASE).unwrap_or(false)
    }

    // ========================================================================
    // Client Configuration
    // ========================================================================

    pub fn namespace(&self) -> Option<String> {
        self.config
            .get_string(CLIENT_NAMESPACE)
            .ok()
            .filter(|ns| !ns.trim().is_empty())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        let initial_delay = self
            .config
            .get_int(RETRY_INITIAL_DELAY_MS)
            .map(|v| Duration::from_millis(v.max(0) as u64))
            .unwrap_or(defaults.initial_delay);
        let max_delay = self
            .config
            .get_int(RETRY_MAX_DELAY_MS)
            .map(|v| Duration::from_millis(v.max(0) as u64))
            .unwrap_or(defaults.max_delay);
        let max_retries = self
            .config
            .get_int(RETRY_MAX_RETRIES)
            .map(|v| v.max(0) as u32)
            .unwrap_or(defaults.max_retries);

        RetryPolicy {
            initial_delay,
            max_delay,
            max_retries,
        }
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    pub fn log_level(&self) -> String {
        self.config
            .get_string(LOG_LEVEL)
            .unwrap_or("info".to_string())
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        self.config.get_string(LOG_DIR).ok().map(PathBuf::from)
    }
}
