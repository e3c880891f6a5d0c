//! Estimating how much data a snapshot would capture.

use crate::backend::Backend;
use crate::error::Result;
use appsnap_common::AppInfo;
use appsnap_config::DataLayout;
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

impl Backend {
    /// Total size of the non-directory entries a snapshot of `app` would archive.
    ///
    /// Covers the system data and common directories plus those of each
    /// user in `usernames` (all users when empty). Missing directories
    /// count as empty.
    pub fn estimate_snapshot_size(&self, app: &AppInfo, usernames: &[String]) -> Result<u64> {
        let rev = app.revision.to_string();
        let instance = &app.instance_name;

        let mut total = dir_size(&self.layout.system_data_dir(instance, &rev))?;
        total += dir_size(&self.layout.system_common_dir(instance))?;

        for user in self.users.users_for_usernames(usernames)? {
            total += dir_size(&DataLayout::user_data_dir(&user.home_dir, instance, &rev))?;
            total += dir_size(&DataLayout::user_common_dir(&user.home_dir, instance))?;
        }

        debug!(snap = %instance, bytes = total, "estimated snapshot size");
        Ok(total)
    }
}

/// Sum of the sizes of every non-directory entry under `dir`.
///
/// Symlinks are not followed; each counts as the length of its own target path.
fn dir_size(dir: &Path) -> Result<u64> {
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Ok(0),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    }

    let mut total = 0;
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_dir() {
            total += entry.metadata().map_err(io::Error::from)?.len();
        }
    }
    Ok(total)
}
