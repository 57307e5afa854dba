//! Logging configuration and initialization
//!
//! This module provides centralized logging setup using the `tracing`
//! ecosystem. It supports both human-readable and JSON output formats,
//! configurable via environment variables or programmatically.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Standard tracing filter (e.g., "info", "debug,opforge=trace")
//! - `OPFORGE_LOG_LEVEL`: Simple log level (error, warn, info, debug, trace)
//! - `OPFORGE_LOG_FORMAT`: Output format ("human" or "json")

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Global flag to track if tracing has been initialized
static TRACING_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Environment variable for log level override
const LOG_LEVEL_ENV: &str = "OPFORGE_LOG_LEVEL";

/// Environment variable for log format (json/human)
const LOG_FORMAT_ENV: &str = "OPFORGE_LOG_FORMAT";

/// Errors that can occur during logging initialization
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Invalid log level string provided
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    /// Invalid log format string provided
    #[error("invalid log format: {0}")]
    InvalidLogFormat(String),
}

/// Log level enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level (default)
    #[default]
    Info,
    /// Debug level
    Debug,
    /// Trace level
    Trace,
}

impl LogLevel {
    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    /// Convert to EnvFilter string
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Log format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable output (default)
    #[default]
    Human,
    /// JSON structured output
    Json,
}

impl LogFormat {
    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "human" | "pretty" | "console" => Some(LogFormat::Human),
            "json" | "structured" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Log level to use
    pub level: LogLevel,
    /// Output format
    pub format: LogFormat,
    /// Whether to include file/line in logs
    pub with_file_info: bool,
}

impl LoggingConfig {
    /// Create a new default logging configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the log level
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Set the log format
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable file/line information
    pub fn with_file_info(mut self, with_file_info: bool) -> Self {
        self.with_file_info = with_file_info;
        self
    }
}

/// Initialize logging with default configuration.
///
/// Uses the `OPFORGE_LOG_LEVEL` and `OPFORGE_LOG_FORMAT` environment
/// variables if set, otherwise defaults to `info` level and human-readable
/// format. `RUST_LOG` takes precedence over both.
///
/// This function is idempotent - calling it multiple times will only
/// initialize the subscriber once.
pub fn init_logging_default() {
    init_logging_from_env().ok();
}

/// Initialize logging from environment variables.
///
/// This function is idempotent.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    TRACING_INITIALIZED.get_or_init(|| {
        let level = std::env::var(LOG_LEVEL_ENV)
            .ok()
            .and_then(|s| LogLevel::parse(&s))
            .unwrap_or_default();

        let format = std::env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|s| LogFormat::parse(&s))
            .unwrap_or_default();

        let config = LoggingConfig::new().with_level(level).with_format(format);

        // Ignore errors during initialization
        let _ = init_with_config_internal(&config);
    });
    Ok(())
}

/// Initialize logging with a custom configuration.
///
/// This function is idempotent.
pub fn init_with_config(config: &LoggingConfig) {
    TRACING_INITIALIZED.get_or_init(|| {
        let _ = init_with_config_internal(config);
    });
}

/// Internal initialization that can return errors
fn init_with_config_internal(config: &LoggingConfig) -> Result<(), LoggingError> {
    let env_filter = build_env_filter(config.level)?;

    match config.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_target(false)
                .with_file(config.with_file_info)
                .with_line_number(config.with_file_info);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer)
                .init();
        }
        LogFormat::Human => {
            let layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(config.with_file_info)
                .with_line_number(config.with_file_info);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer)
                .init();
        }
    }

    Ok(())
}

/// Build the environment filter for log level.
/// Tries RUST_LOG first (standard tracing convention), then OPFORGE_LOG_LEVEL.
fn build_env_filter(default_level: LogLevel) -> Result<EnvFilter, LoggingError> {
    if let Ok(rust_log) = std::env::var("RUST_LOG") {
        return EnvFilter::try_new(rust_log)
            .map_err(|e| LoggingError::InvalidLogLevel(e.to_string()));
    }

    if let Ok(opforge_level) = std::env::var(LOG_LEVEL_ENV) {
        if let Some(level) = LogLevel::parse(&opforge_level) {
            return Ok(EnvFilter::new(level.as_filter_str()));
        }
    }

    Ok(EnvFilter::new(default_level.as_filter_str()))
}

/// Check if tracing has been initialized
pub fn is_initialized() -> bool {
    TRACING_INITIALIZED.get().is_some()
}
