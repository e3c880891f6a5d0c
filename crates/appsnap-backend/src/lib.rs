//! Snapshot backend for application data.
//!
//! This crate saves an application's system and per-user data directories
//! into integrity-protected archives, and later verifies, lists, restores,
//! exports, and imports them.
//!
//! # Archive Format
//!
//! Each snapshot is a ZIP file named `<set-id>_<snap>_<version>_<revision>.zip`
//! in the snapshots directory, containing:
//! - `archive.tgz`: system data of the application (optional)
//! - `user/<name>.tgz`: data of one user (optional, repeated)
//! - `meta.json`: the [`Snapshot`] description with the SHA3-384 of every entry
//! - `meta.sha3_384`: SHA3-384 of `meta.json`
//!
//! Snapshots sharing a set ID form a [`SnapshotSet`].
//!
//! # Example
//!
//! ```no_run
//! use appsnap_backend::{Backend, SaveFlags, SetIdSource};
//! use appsnap_common::{AppInfo, CancelToken, Revision, SetId};
//! use appsnap_config::DataLayout;
//!
//! let backend = Backend::new(DataLayout::new("/"));
//! let ctx = CancelToken::new();
//! let app = AppInfo::new("hello-snap", Revision(42));
//!
//! // Capture the data of every user
//! let snapshot = backend
//!     .save(&ctx, SetId(1), &app, None, &[], SaveFlags::default())
//!     .unwrap();
//!
//! // Verify and list
//! for set in backend.list(&ctx, SetId(0), &[]).unwrap() {
//!     println!("{} has {} snapshots", set.id, set.snapshots.len());
//! }
//! # let _ = snapshot;
//! ```

pub mod backend;
pub mod error;
pub mod estimate;
pub mod export;
pub mod filename;
pub mod import;
pub mod logging;
pub mod metadata;
pub mod privilege;
mod process;
pub mod reader;
pub mod restore;
pub mod scan;
pub mod stream;
pub mod users;
pub mod writer;

pub use backend::{Backend, Clock};
pub use error::{Result, SnapshotError};
pub use export::{ExportMetadata, SnapshotExport, EXPORT_FORMAT, EXPORT_METADATA_NAME};
pub use metadata::{
    AppConfig, Snapshot, SnapshotSet, ARCHIVE_NAME, HASH_HEX_LEN, METADATA_HASH_NAME,
    METADATA_NAME,
};
pub use privilege::{DirectTar, PrivilegeResolver, TarInvoker, WrappedTar};
pub use reader::{OpenError, Reader, SetIdSource};
pub use restore::RestoreState;
pub use scan::{NameBatches, ReadDirBatches};
pub use stream::{sha3_384_hex, EntryDigest};
pub use users::{SystemUsers, UserEntry, UserLookup};
pub use writer::SaveFlags;
