//! Typed `appsnap.toml` configuration.

use crate::resolve::{resolve_config_with, ConfigSource, ENV_ROOT};
use crate::validate::{validate_config, ValidationError, ValidationResult};
use crate::DataLayout;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default number of directory entries read per batch when scanning.
pub const DEFAULT_DIR_BATCH_SIZE: usize = 100;

/// Logging settings as written in the config file.
///
/// Kept as strings here; the backend's logging module parses them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSettings {
    pub level: Option<String>,
    pub format: Option<String>,
}

/// Snapshot backend configuration.
///
/// ```toml
/// root_dir = "/"
/// snapshots_dir = "/var/lib/appsnap/snapshots"
/// tar_program = "tar"
/// dir_batch_size = 100
///
/// [log]
/// level = "info"
/// format = "human"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendConfig {
    /// Root all data and snapshot paths are relative to.
    pub root_dir: PathBuf,

    /// Override for the snapshot directory (absolute).
    pub snapshots_dir: Option<PathBuf>,

    /// Archiver invoked to produce and consume entry streams.
    pub tar_program: String,

    /// Directory entries read per batch while scanning.
    pub dir_batch_size: usize,

    pub log: LogSettings,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("/"),
            snapshots_dir: None,
            tar_program: "tar".to_string(),
            dir_batch_size: DEFAULT_DIR_BATCH_SIZE,
            log: LogSettings::default(),
        }
    }
}

impl BackendConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> ValidationResult<Self> {
        let config: BackendConfig =
            toml::from_str(s).map_err(|e| ValidationError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file.
    pub fn load(path: &Path) -> ValidationResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ValidationError::IoError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Resolve, load, and validate using the process environment.
    pub fn resolve(cli_path: Option<&Path>) -> ValidationResult<(Self, ConfigSource)> {
        Self::resolve_with(cli_path, |key| std::env::var(key).ok())
    }

    /// Resolve, load, and validate with an explicit environment lookup.
    ///
    /// `APPSNAP_ROOT` overrides `root_dir` from the file.
    pub fn resolve_with<E>(cli_path: Option<&Path>, env: E) -> ValidationResult<(Self, ConfigSource)>
    where
        E: Fn(&str) -> Option<String>,
    {
        let resolved = resolve_config_with(cli_path, &env);
        let mut config = match resolved.path {
            Some(ref path) => Self::load(path)?,
            None => Self::default(),
        };

        if let Some(root) = env(ENV_ROOT) {
            config.root_dir = PathBuf::from(root);
            config.validate()?;
        }

        debug!(
            source = %resolved.source,
            root = %config.root_dir.display(),
            "configuration resolved"
        );
        Ok((config, resolved.source))
    }

    pub fn validate(&self) -> ValidationResult<()> {
        validate_config(self)
    }

    /// The filesystem layout described by this configuration.
    pub fn layout(&self) -> DataLayout {
        let layout = DataLayout::new(&self.root_dir);
        match self.snapshots_dir {
            Some(ref dir) => layout.with_snapshots_dir(dir),
            None => layout,
        }
    }
}
