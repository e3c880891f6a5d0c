//! The snapshot backend and its collaborators.

use crate::privilege::PrivilegeResolver;
use crate::users::{SystemUsers, UserLookup};
use appsnap_config::{BackendConfig, DataLayout, DEFAULT_DIR_BATCH_SIZE};
use chrono::{DateTime, Utc};
use std::fmt;
use std::fs::DirBuilder;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::sync::Arc;

/// Source of the current time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Saves, scans, restores, and exports snapshot archives.
///
/// Every location comes from the [`DataLayout`]; users, privilege decisions,
/// and the clock are injected so the whole backend can run against a
/// scratch root.
#[derive(Clone)]
pub struct Backend {
    pub(crate) layout: DataLayout,
    pub(crate) users: Arc<dyn UserLookup>,
    pub(crate) privilege: PrivilegeResolver,
    pub(crate) dir_batch_size: usize,
    pub(crate) clock: Clock,
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("layout", &self.layout)
            .field("privilege", &self.privilege)
            .field("dir_batch_size", &self.dir_batch_size)
            .finish_non_exhaustive()
    }
}

impl Backend {
    /// Backend over `layout` using system users and the real clock.
    pub fn new(layout: DataLayout) -> Self {
        Self {
            users: Arc::new(SystemUsers::new(layout.clone())),
            layout,
            privilege: PrivilegeResolver::default(),
            dir_batch_size: DEFAULT_DIR_BATCH_SIZE,
            clock: Arc::new(Utc::now),
        }
    }

    /// Backend described by a validated configuration.
    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(config.layout())
            .with_privilege_resolver(
                PrivilegeResolver::default().with_tar_program(&config.tar_program),
            )
            .with_dir_batch_size(config.dir_batch_size)
    }

    pub fn with_user_lookup(mut self, users: impl UserLookup + 'static) -> Self {
        self.users = Arc::new(users);
        self
    }

    pub fn with_privilege_resolver(mut self, privilege: PrivilegeResolver) -> Self {
        self.privilege = privilege;
        self
    }

    /// Directory entries read per batch while scanning (at least 1).
    pub fn with_dir_batch_size(mut self, n: usize) -> Self {
        self.dir_batch_size = n.max(1);
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    pub fn privilege(&self) -> &PrivilegeResolver {
        &self.privilege
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Create the snapshot directory (mode 0700) if it is missing.
    pub(crate) fn ensure_snapshots_dir(&self) -> io::Result<()> {
        DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(self.layout.snapshots_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn test_from_config() {
        let config = BackendConfig {
            root_dir: "/srv/root".into(),
            tar_program: "/usr/bin/gtar".to_string(),
            dir_batch_size: 5,
            ..Default::default()
        };
        let backend = Backend::from_config(&config);
        assert_eq!(
            backend.layout().snapshots_dir(),
            std::path::Path::new("/srv/root/var/lib/appsnap/snapshots")
        );
        assert_eq!(backend.privilege().tar_program(), "/usr/bin/gtar");
        assert_eq!(backend.dir_batch_size, 5);
    }

    #[test]
    fn test_batch_size_floor() {
        let backend = Backend::new(DataLayout::default()).with_dir_batch_size(0);
        assert_eq!(backend.dir_batch_size, 1);
    }

    #[test]
    fn test_injected_clock() {
        let fixed = Utc.with_ymd_and_hms(2001, 2, 3, 4, 5, 6).unwrap();
        let backend = Backend::new(DataLayout::default()).with_clock(move || fixed);
        assert_eq!(backend.now(), fixed);
    }

    #[test]
    fn test_snapshots_dir_created_private() {
        let dir = TempDir::new().unwrap();
        let backend = Backend::new(DataLayout::new(dir.path()));
        backend.ensure_snapshots_dir().unwrap();
        let mode = std::fs::metadata(backend.layout().snapshots_dir())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
