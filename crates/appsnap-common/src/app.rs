//! Installed application description.

use crate::{Epoch, Revision};
use serde::{Deserialize, Serialize};

/// What the snapshot backend needs to know about an installed application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    /// Instance name (e.g. `hello-snap` or `hello-snap_foo` for parallel installs).
    pub instance_name: String,

    /// Publisher-assigned application identifier; empty for local installs.
    #[serde(default)]
    pub app_id: String,

    pub version: String,

    pub revision: Revision,

    #[serde(default)]
    pub epoch: Epoch,
}

impl AppInfo {
    pub fn new(instance_name: impl Into<String>, revision: Revision) -> Self {
        Self {
            instance_name: instance_name.into(),
            app_id: String::new(),
            version: String::new(),
            revision,
            epoch: Epoch::default(),
        }
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_epoch(mut self, epoch: Epoch) -> Self {
        self.epoch = epoch;
        self
    }
}
