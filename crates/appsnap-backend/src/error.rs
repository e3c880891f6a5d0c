//! Error types for snapshot operations.

use appsnap_common::{Cancelled, SetId};
use thiserror::Error;

/// Errors that can occur during snapshot operations.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// ZIP container error
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The operation's cancel token fired.
    #[error("context canceled")]
    Cancelled,

    /// An entry's content does not hash to the value recorded in metadata.
    #[error("snapshot entry {entry:?} expected hash ({expected:.7}…) does not match actual ({actual:.7}…)")]
    Integrity {
        entry: String,
        expected: String,
        actual: String,
    },

    /// The snapshot directory exists but cannot be listed.
    #[error("cannot open snapshots directory: {0}")]
    OpenSnapshotsDir(#[source] std::io::Error),

    /// The archiver reported errors on stderr.
    #[error("cannot {action}: {first}{}", and_more(.more))]
    Tar {
        action: &'static str,
        first: String,
        more: usize,
    },

    /// The archiver failed without saying why.
    #[error("tar failed: {0}")]
    TarStatus(String),

    /// Missing required member in a snapshot archive
    #[error("missing required file: {0}")]
    MissingFile(String),

    /// Archive opened but failed validation; the reason is also recorded on the reader.
    #[error("{0}")]
    Broken(String),

    /// Save was asked to record a snapshot that could never be listed or opened.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(&'static str),

    /// Corrupted snapshot metadata
    #[error("corrupted metadata: {0}")]
    CorruptedMetadata(String),

    /// Reader has already been closed or was never backed by a file.
    #[error("snapshot reader has no open file")]
    Detached,

    #[error("no snapshot data found for {0}")]
    NoSnapshotData(SetId),

    #[error("unexpected file type for {0:?}")]
    UnexpectedFileType(String),

    #[error("cannot look up user {username:?}: {source}")]
    UserLookup {
        username: String,
        #[source]
        source: std::io::Error,
    },

    /// Export stream is malformed or incomplete.
    #[error("invalid export: {0}")]
    InvalidExport(String),

    /// Streamed export length disagrees with the precomputed size.
    #[error("export size changed: expected {expected} bytes, wrote {actual}")]
    ExportSizeMismatch { expected: u64, actual: u64 },
}

fn and_more(more: &usize) -> String {
    if *more > 0 {
        format!(" (and {} more)", more)
    } else {
        String::new()
    }
}

impl From<Cancelled> for SnapshotError {
    fn from(_: Cancelled) -> Self {
        SnapshotError::Cancelled
    }
}

impl SnapshotError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SnapshotError::Cancelled)
    }
}

/// Result type alias for snapshot operations.
pub type Result<T> = std::result::Result<T, SnapshotError>;
