//! Filesystem layout of snapshot archives and application data.
//!
//! Every location is computed relative to a root directory so the whole
//! tree can be relocated (tests use a scratch directory as the root).
//!
//! ```text
//! <root>/var/lib/appsnap/snapshots/       snapshot archives (flat)
//! <root>/var/snap/<instance>/<revision>/  system data
//! <root>/var/snap/<instance>/common/      system common data
//! <home>/snap/<instance>/<revision>/      user data
//! <home>/snap/<instance>/common/          user common data
//! ```

use std::path::{Path, PathBuf};

const SNAPSHOTS_SUBDIR: &str = "var/lib/appsnap/snapshots";
const SYSTEM_DATA_SUBDIR: &str = "var/snap";
const USER_DATA_SUBDIR: &str = "snap";
const COMMON_DIR: &str = "common";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
    snapshots_dir: PathBuf,
}

impl Default for DataLayout {
    fn default() -> Self {
        DataLayout::new("/")
    }
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let snapshots_dir = root.join(SNAPSHOTS_SUBDIR);
        Self {
            root,
            snapshots_dir,
        }
    }

    /// Override where snapshot archives live.
    pub fn with_snapshots_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshots_dir = dir.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshots_dir(&self) -> &Path {
        &self.snapshots_dir
    }

    /// Directory holding every home directory (`<root>/home`).
    pub fn home_root(&self) -> PathBuf {
        self.root.join("home")
    }

    /// Home directory of the superuser (`<root>/root`).
    pub fn root_home(&self) -> PathBuf {
        self.root.join("root")
    }

    /// `<root>/var/snap/<instance>`: parent of the system data and common dirs.
    pub fn system_base_dir(&self, instance: &str) -> PathBuf {
        self.root.join(SYSTEM_DATA_SUBDIR).join(instance)
    }

    pub fn system_data_dir(&self, instance: &str, revision: &str) -> PathBuf {
        self.system_base_dir(instance).join(revision)
    }

    pub fn system_common_dir(&self, instance: &str) -> PathBuf {
        self.system_base_dir(instance).join(COMMON_DIR)
    }

    /// `<home>/snap/<instance>`: parent of a user's data and common dirs.
    pub fn user_base_dir(home: &Path, instance: &str) -> PathBuf {
        home.join(USER_DATA_SUBDIR).join(instance)
    }

    pub fn user_data_dir(home: &Path, instance: &str, revision: &str) -> PathBuf {
        Self::user_base_dir(home, instance).join(revision)
    }

    pub fn user_common_dir(home: &Path, instance: &str) -> PathBuf {
        Self::user_base_dir(home, instance).join(COMMON_DIR)
    }

    /// `<home>/snap`, whose presence marks a home as holding application data.
    pub fn user_apps_dir(home: &Path) -> PathBuf {
        home.join(USER_DATA_SUBDIR)
    }

    /// Name of the shared, revision-independent data directory.
    pub fn common_dir_name() -> &'static str {
        COMMON_DIR
    }
}
