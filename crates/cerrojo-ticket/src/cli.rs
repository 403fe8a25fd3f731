//! Command line arguments

use std::path::PathBuf;
use std::time::Duration;

use cerrojo_common::config::{
    CLIENT_NAMESPACE, LOCK_ACQUIRE_TIMEOUT_MS, LOCK_GUARANTEED_RELEASE, LOCK_PATH, LOG_DIR,
    LOG_LEVEL,
};
use clap::Parser;

use crate::seller::SalePlan;

/// Command line arguments for the ticket demo
#[derive(Debug, Parser)]
#[command(
    name = "cerrojo-ticket",
    version,
    about = "Sell one ticket stock from several windows under a distributed lock"
)]
pub struct Cli {
    /// Number of sale windows
    #[arg(short = 'w', long = "windows", default_value_t = 2)]
    pub windows: usize,

    /// Initial ticket stock
    #[arg(short = 't', long = "tickets", default_value_t = 10)]
    pub tickets: u32,

    #[arg(long = "lock-path")]
    pub lock_path: Option<String>,

    /// Acquire timeout per sale attempt
    #[arg(long = "timeout-ms")]
    pub timeout_ms: Option<u64>,

    #[arg(short = 'n', long = "namespace")]
    pub namespace: Option<String>,

    /// Configuration file (default: conf/cerrojo.yml when present)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Retry the node delete on release until the store confirms it
    #[arg(long = "guaranteed")]
    pub guaranteed: bool,

    /// Expire the first window's session once this many tickets are sold
    #[arg(long = "expire-after", value_name = "SOLD")]
    pub expire_after: Option<u32>,

    /// Pause between sales of one window
    #[arg(long = "sale-delay-ms", default_value_t = 100)]
    pub sale_delay_ms: u64,

    #[arg(long = "log-level")]
    pub log_level: Option<String>,

    #[arg(long = "log-dir")]
    pub log_dir: Option<PathBuf>,

    /// Print the summary as JSON
    #[arg(long = "json")]
    pub json: bool,
}

impl Cli {
    /// Configuration overrides taken from the flags that were given
    pub fn overrides(&self) -> Vec<(String, String)> {
        let mut overrides = Vec::new();
        if let Some(path) = &self.lock_path {
            overrides.push((LOCK_PATH.to_string(), path.clone()));
        }
        if let Some(ms) = self.timeout_ms {
            overrides.push((LOCK_ACQUIRE_TIMEOUT_MS.to_string(), ms.to_string()));
        }
        if let Some(namespace) = &self.namespace {
            overrides.push((CLIENT_NAMESPACE.to_string(), namespace.clone()));
        }
        if self.guaranteed {
            overrides.push((LOCK_GUARANTEED_RELEASE.to_string(), "true".to_string()));
        }
        if let Some(level) = &self.log_level {
            overrides.push((LOG_LEVEL.to_string(), level.clone()));
        }
        if let Some(dir) = &self.log_dir {
            overrides.push((LOG_DIR.to_string(), dir.display().to_string()));
        }
        overrides
    }

    pub fn sale_plan(&self) -> SalePlan {
        SalePlan {
            windows: self.windows.max(1),
            tickets: self.tickets,
            sale_delay: Duration::from_millis(self.sale_delay_ms),
            expire_after: self.expire_after,
        }
    }
}
