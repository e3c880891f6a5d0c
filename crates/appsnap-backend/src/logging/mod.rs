//! Structured logging setup.
//!
//! The backend only emits `tracing` events; an embedding program calls
//! [`init_logging`] once to route them to stderr as human-readable lines or
//! JSON lines.

pub mod config;

pub use config::{LogConfig, LogFormat, LogLevel};

use std::io::IsTerminal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Default filter directive for a level.
fn default_directive(level: LogLevel) -> String {
    format!("appsnap_backend={},appsnap_config={}", level, level)
}

/// Install the global subscriber.
///
/// `RUST_LOG` directives win over `config.level` when set. Returns `false`
/// if a subscriber was already installed.
pub fn init_logging(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config.level)));

    match config.format {
        LogFormat::Human => {
            let use_ansi = std::io::stderr().is_terminal();
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(use_ansi);

            if config.timestamps {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer)
                    .try_init()
                    .is_ok()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer.without_time())
                    .try_init()
                    .is_ok()
            }
        }
        LogFormat::Jsonl => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(false),
            )
            .try_init()
            .is_ok(),
    }
}

/// Initialize logging from the environment alone.
pub fn init_default_logging() -> bool {
    init_logging(&LogConfig::from_env(None, None))
}
