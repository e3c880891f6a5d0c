//! Logging configuration.
//!
//! Supports configuration via:
//! - The `[log]` table of `appsnap.toml`
//! - Environment variables (APPSNAP_LOG, RUST_LOG, APPSNAP_LOG_FORMAT)
//! - Explicit overrides from the embedding program

use appsnap_config::LogSettings;
use serde::{Deserialize, Serialize};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable console format (default).
    #[default]
    Human,
    /// Machine-parseable JSON lines.
    Jsonl,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" | "pretty" => Ok(LogFormat::Human),
            "jsonl" | "json" => Ok(LogFormat::Jsonl),
            _ => Err(format!("unknown log format: {}", s)),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Human => write!(f, "human"),
            LogFormat::Jsonl => write!(f, "jsonl"),
        }
    }
}

/// Log level filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    /// Notices such as skipped data roots (default).
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "off" => Ok(LogLevel::Off),
            _ => Err(format!("unknown log level: {}", s)),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
            LogLevel::Off => write!(f, "off"),
        }
    }
}

impl From<LogLevel> for tracing_subscriber::filter::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
            LogLevel::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
            LogLevel::Info => tracing_subscriber::filter::LevelFilter::INFO,
            LogLevel::Warn => tracing_subscriber::filter::LevelFilter::WARN,
            LogLevel::Error => tracing_subscriber::filter::LevelFilter::ERROR,
            LogLevel::Off => tracing_subscriber::filter::LevelFilter::OFF,
        }
    }
}

pub(crate) const ENV_LOG: &str = "APPSNAP_LOG";
pub(crate) const ENV_LOG_FORMAT: &str = "APPSNAP_LOG_FORMAT";
const ENV_RUST_LOG: &str = "RUST_LOG";

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// Whether to include timestamps in human output.
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            format: LogFormat::Human,
            level: LogLevel::Info,
            timestamps: true,
        }
    }
}

impl LogConfig {
    /// Start from the `[log]` table of a validated configuration.
    ///
    /// Unparseable values are ignored; the config crate rejects them earlier.
    pub fn from_settings(settings: &LogSettings) -> Self {
        let mut config = LogConfig::default();
        if let Some(level) = settings.level.as_deref().and_then(|l| l.parse().ok()) {
            config.level = level;
        }
        if let Some(format) = settings.format.as_deref().and_then(|f| f.parse().ok()) {
            config.format = format;
        }
        config
    }

    /// Create config from the process environment and explicit overrides.
    pub fn from_env(cli_level: Option<LogLevel>, cli_format: Option<LogFormat>) -> Self {
        LogConfig::default().overlay_env(cli_level, cli_format, |k| std::env::var(k).ok())
    }

    /// Apply environment variables, then explicit overrides, on top of `self`.
    pub fn overlay_env<E>(mut self, cli_level: Option<LogLevel>, cli_format: Option<LogFormat>, env: E) -> Self
    where
        E: Fn(&str) -> Option<String>,
    {
        // APPSNAP_LOG takes precedence over RUST_LOG
        if let Some(val) = env(ENV_LOG) {
            if let Ok(level) = val.parse::<LogLevel>() {
                self.level = level;
            }
        } else if let Some(val) = env(ENV_RUST_LOG) {
            if val.contains("trace") {
                self.level = LogLevel::Trace;
            } else if val.contains("debug") {
                self.level = LogLevel::Debug;
            } else if val.contains("warn") {
                self.level = LogLevel::Warn;
            } else if val.contains("error") {
                self.level = LogLevel::Error;
            }
        }

        if let Some(val) = env(ENV_LOG_FORMAT) {
            if let Ok(format) = val.parse::<LogFormat>() {
                self.format = format;
            }
        }

        if let Some(level) = cli_level {
            self.level = level;
        }
        if let Some(format) = cli_format {
            self.format = format;
        }
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }
}
