//! Logging bootstrap for the demo binary
//!
//! Console output always; a daily rolling `cerrojo.log` when a log directory
//! is configured. `RUST_LOG` takes precedence over the configured level.

use std::path::PathBuf;

use cerrojo_common::Configuration;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

const LOG_FILE_NAME: &str = "cerrojo.log";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory for the rolling log file; `None` disables file logging
    pub log_dir: Option<PathBuf>,
    pub console_output: bool,
    pub level: Level,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            console_output: true,
            level: Level::INFO,
        }
    }
}

impl LoggingConfig {
    pub fn from_configuration(configuration: &Configuration) -> Self {
        Self {
            log_dir: configuration.log_dir(),
            console_output: true,
            level: configuration.log_level().parse().unwrap_or(Level::INFO),
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.level.to_string()))
    }
}

/// Keeps the non-blocking file writer alive; buffered output is flushed on drop.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console_output {
        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_filter(config.filter());
        layers.push(Box::new(console_layer));
    }

    let mut file_guard = None;
    if let Some(log_dir) = &config.log_dir {
        std::fs::create_dir_all(log_dir)?;
        let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_NAME);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);

        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_filter(config.filter());
        layers.push(Box::new(file_layer));
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    if let Some(log_dir) = &config.log_dir {
        tracing::info!(log_dir = %log_dir.display(), "File logging initialized");
    }

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_configuration() {
        let configuration = Configuration::load(
            None,
            vec![
                ("log.level".to_string(), "debug".to_string()),
                ("log.dir".to_string(), "/tmp/cerrojo-logs".to_string()),
            ],
        )
        .unwrap();

        let config = LoggingConfig::from_configuration(&configuration);
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.log_dir, Some(PathBuf::from("/tmp/cerrojo-logs")));
    }

    #[test]
    fn test_unknown_level_falls_back_to_info() {
        let configuration =
            Configuration::load(None, vec![("log.level".to_string(), "loud".to_string())])
                .unwrap();
        let config = LoggingConfig::from_configuration(&configuration);
        assert_eq!(config.level, Level::INFO);
        assert!(config.log_dir.is_none());
    }
}
