//! appsnap configuration loading and validation.
//!
//! This crate provides:
//! - `BackendConfig`, the typed `appsnap.toml` file
//! - Config resolution (CLI → env → XDG → system → defaults)
//! - Semantic validation with field-named errors
//! - `DataLayout`, the on-disk locations of snapshots and application data

pub mod config;
pub mod layout;
pub mod resolve;
pub mod validate;

pub use config::{BackendConfig, LogSettings, DEFAULT_DIR_BATCH_SIZE};
pub use layout::DataLayout;
pub use resolve::{resolve_config, resolve_config_with, ConfigPath, ConfigSource};
pub use validate::{ValidationError, ValidationResult};

/// Name of the configuration file looked up in config directories.
pub const CONFIG_FILENAME: &str = "appsnap.toml";
