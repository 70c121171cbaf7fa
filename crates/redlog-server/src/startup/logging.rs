//! Logging bootstrap
//!
//! | Output        | Contents                                   |
//! |---------------|--------------------------------------------|
//! | stderr        | every event at the configured level         |
//! | `redlog.log`  | every event at the configured level         |
//! | `audit.log`   | audit events only (`redlog::audit` target) |
//!
//! stdout is left to command output. Files rotate daily and are written
//! only when file logging is enabled.

use std::path::PathBuf;

use redlog_core::audit::AUDIT_TARGET;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

pub const ROOT_LOG_FILE: &str = "redlog.log";

pub const AUDIT_LOG_FILE: &str = "audit.log";

/// Logging configuration for the process
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Base log directory (default: `~/redlog/logs`)
    pub log_dir: PathBuf,
    pub console_output: bool,
    pub console_level: Level,
    pub file_logging: bool,
    pub file_level: Level,
}

fn default_log_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(format!("{}/redlog/logs", home))
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            console_output: true,
            console_level: Level::INFO,
            file_logging: false,
            file_level: Level::INFO,
        }
    }
}

impl LoggingConfig {
    /// Create from application configuration. Unknown levels fall back to INFO.
    pub fn from_config(
        log_dir: Option<String>,
        console_output: bool,
        file_logging: bool,
        level: String,
    ) -> Self {
        let level = level.parse().unwrap_or(Level::INFO);
        Self {
            log_dir: log_dir.map(PathBuf::from).unwrap_or_else(default_log_dir),
            console_output,
            console_level: level,
            file_logging,
            file_level: level,
        }
    }
}

/// Keeps the non-blocking file writers alive; buffered output is flushed on drop
pub struct LoggingGuard {
    _file_guards: Vec<WorkerGuard>,
}

/// Install the global subscriber.
///
/// `RUST_LOG`, when set, replaces the configured level for the console and
/// root file. The audit file always records every audit event.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    if config.file_logging {
        std::fs::create_dir_all(&config.log_dir)?;
    }

    let mut guards: Vec<WorkerGuard> = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console_output {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.console_level.to_string()));
        let console_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(filter);
        layers.push(Box::new(console_layer));
    }

    if config.file_logging {
        let root_appender =
            RollingFileAppender::new(Rotation::DAILY, &config.log_dir, ROOT_LOG_FILE);
        let (root_nb, root_guard) = tracing_appender::non_blocking(root_appender);
        guards.push(root_guard);

        let root_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.file_level.to_string()));
        let root_layer = fmt::layer()
            .with_writer(root_nb)
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_filter(root_filter);
        layers.push(Box::new(root_layer));

        let audit_appender =
            RollingFileAppender::new(Rotation::DAILY, &config.log_dir, AUDIT_LOG_FILE);
        let (audit_nb, audit_guard) = tracing_appender::non_blocking(audit_appender);
        guards.push(audit_guard);

        let audit_layer = fmt::layer()
            .with_writer(audit_nb)
            .with_target(false)
            .with_ansi(false)
            .with_filter(Targets::new().with_target(AUDIT_TARGET, LevelFilter::INFO));
        layers.push(Box::new(audit_layer));
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    if config.file_logging {
        tracing::info!(
            log_dir = %config.log_dir.display(),
            "File logging initialized: {} + {}",
            ROOT_LOG_FILE,
            AUDIT_LOG_FILE
        );
    }

    Ok(LoggingGuard {
        _file_guards: guards,
    })
}
