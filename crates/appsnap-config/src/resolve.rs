//! Configuration resolution and path discovery.
//!
//! Resolution order: CLI argument → environment variables → XDG path → system path → defaults.

use crate::CONFIG_FILENAME;
use std::path::{Path, PathBuf};

/// Discovered configuration file path.
#[derive(Debug, Clone, Default)]
pub struct ConfigPath {
    /// Path to appsnap.toml (or None if not found).
    pub path: Option<PathBuf>,

    /// Where the path came from (for diagnostics).
    pub source: ConfigSource,
}

/// Where a configuration file was found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicitly provided via CLI argument.
    CliArgument,

    /// Set via environment variable.
    Environment,

    /// Found in XDG config directory.
    XdgConfig,

    /// Found in /etc/appsnap/.
    SystemConfig,

    /// Using built-in defaults.
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::XdgConfig => write!(f, "XDG config"),
            ConfigSource::SystemConfig => write!(f, "system config"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// Environment variable names.
pub(crate) const ENV_CONFIG_PATH: &str = "APPSNAP_CONFIG";
pub(crate) const ENV_CONFIG_DIR: &str = "APPSNAP_CONFIG_DIR";
pub(crate) const ENV_ROOT: &str = "APPSNAP_ROOT";

/// Application name for XDG directories.
const APP_NAME: &str = "appsnap";

/// Resolve the configuration path using the process environment.
pub fn resolve_config(cli_path: Option<&Path>) -> ConfigPath {
    resolve_config_with(cli_path, |key| std::env::var(key).ok())
}

/// Resolve the configuration path with an explicit environment lookup.
///
/// Resolution order:
/// 1. Explicit CLI path (if it exists)
/// 2. `APPSNAP_CONFIG` environment variable
/// 3. `APPSNAP_CONFIG_DIR` environment variable + appsnap.toml
/// 4. XDG config directory (~/.config/appsnap/)
/// 5. System config (/etc/appsnap/)
/// 6. Built-in defaults (None)
pub fn resolve_config_with<E>(cli_path: Option<&Path>, env: E) -> ConfigPath
where
    E: Fn(&str) -> Option<String>,
{
    if let Some(path) = cli_path {
        if path.exists() {
            return found(path.to_path_buf(), ConfigSource::CliArgument);
        }
    }

    if let Some(env_path) = env(ENV_CONFIG_PATH) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return found(path, ConfigSource::Environment);
        }
    }

    if let Some(config_dir) = env(ENV_CONFIG_DIR) {
        let path = PathBuf::from(config_dir).join(CONFIG_FILENAME);
        if path.exists() {
            return found(path, ConfigSource::Environment);
        }
    }

    if let Some(dir) = xdg_config_dir() {
        let path = dir.join(CONFIG_FILENAME);
        if path.exists() {
            return found(path, ConfigSource::XdgConfig);
        }
    }

    let system_path = system_config_dir().join(CONFIG_FILENAME);
    if system_path.exists() {
        return found(system_path, ConfigSource::SystemConfig);
    }

    ConfigPath::default()
}

fn found(path: PathBuf, source: ConfigSource) -> ConfigPath {
    ConfigPath {
        path: Some(path),
        source,
    }
}

/// Get the XDG config directory for appsnap.
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Get the system config directory.
pub fn system_config_dir() -> PathBuf {
    PathBuf::from("/etc").join(APP_NAME)
}
