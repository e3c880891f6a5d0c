//! Snapshot reader for opening and verifying archives.
//!
//! Opening parses and validates `meta.json` against its sidecar hash.
//! Entry data is only read on [`Reader::check`] and [`Reader::restore`],
//! and every entry is re-hashed before anything is extracted from it.
//!
//! [`Reader::restore`]: crate::Reader::restore

use crate::error::{Result, SnapshotError};
use crate::filename;
use crate::metadata::{classify_entry, entry_selected, Snapshot, HASH_HEX_LEN, METADATA_HASH_NAME, METADATA_NAME};
use crate::stream::{copy_with_cancel, EntryDigest};
use appsnap_common::{CancelToken, SetId};
use std::fs::File;
use std::io::{self, Read};
use std::os::unix::io::IntoRawFd;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;

/// Upper bound on `meta.json`; anything larger is treated as corrupt.
const MAX_METADATA_LEN: u64 = 16 * 1024 * 1024;

/// Where an opened archive's set ID comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SetIdSource {
    /// Trust the embedded metadata.
    #[default]
    Metadata,
    /// Use the leading number of the filename, if it decodes.
    Filename,
    /// Force a value.
    Explicit(SetId),
}

/// Failure to open an archive.
///
/// When the metadata parsed but failed validation, `reader` still holds the
/// archive with [`Snapshot::broken`] set, so callers can inspect it.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct OpenError {
    pub source: SnapshotError,
    pub reader: Option<Box<Reader>>,
}

impl OpenError {
    fn bare(source: impl Into<SnapshotError>) -> Self {
        Self {
            source: source.into(),
            reader: None,
        }
    }
}

/// An open snapshot archive.
#[derive(Debug)]
pub struct Reader {
    pub(crate) snapshot: Snapshot,
    path: PathBuf,
    file: Option<File>,
}

impl Reader {
    /// Open an archive and validate its metadata.
    pub fn open(path: &Path, source: SetIdSource) -> std::result::Result<Self, OpenError> {
        let file = File::open(path).map_err(OpenError::bare)?;
        let (mut snapshot, broken) = read_metadata(&file).map_err(OpenError::bare)?;

        match source {
            SetIdSource::Metadata => {}
            SetIdSource::Filename => {
                if let Some(id) = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(filename::quick_decode)
                {
                    snapshot.set_id = id;
                }
            }
            SetIdSource::Explicit(id) => snapshot.set_id = id,
        }

        let mut reader = Reader {
            snapshot,
            path: path.to_path_buf(),
            file: Some(file),
        };

        if let Some(reason) = broken {
            debug!(path = %path.display(), reason = %reason, "snapshot is broken");
            reader.snapshot.broken = Some(reason.clone());
            return Err(OpenError {
                source: SnapshotError::Broken(reason),
                reader: Some(Box::new(reader)),
            });
        }

        Ok(reader)
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn into_snapshot(self) -> Snapshot {
        self.snapshot
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether validation failed at open time.
    pub fn is_broken(&self) -> bool {
        self.snapshot.broken.is_some()
    }

    /// Re-hash the selected entries against the metadata.
    ///
    /// `usernames` limits which user entries are checked; empty means all.
    pub fn check(&self, ctx: &CancelToken, usernames: &[String]) -> Result<()> {
        let mut archive = self.archive()?;
        for (entry, expected) in &self.snapshot.sha3_384 {
            if !entry_selected(classify_entry(entry), usernames) {
                continue;
            }
            ctx.check()?;
            verify_entry(&mut archive, ctx, entry, expected)?;
        }
        Ok(())
    }

    /// A second handle on the underlying file.
    pub(crate) fn duplicate_file(&self) -> Result<File> {
        Ok(self.file()?.try_clone()?)
    }

    pub(crate) fn archive(&self) -> Result<ZipArchive<&File>> {
        Ok(ZipArchive::new(self.file()?)?)
    }

    fn file(&self) -> Result<&File> {
        self.file.as_ref().ok_or(SnapshotError::Detached)
    }

    /// Release the file, reporting any error from closing it.
    pub fn close(mut self) -> io::Result<()> {
        match self.file.take() {
            None => Ok(()),
            Some(file) => {
                let fd = file.into_raw_fd();
                // SAFETY: `fd` was just released by `into_raw_fd` and is closed exactly once.
                if unsafe { libc::close(fd) } == 0 {
                    Ok(())
                } else {
                    Err(io::Error::last_os_error())
                }
            }
        }
    }
}

/// Parse metadata; the second value is why the archive is broken, if it is.
fn read_metadata(file: &File) -> Result<(Snapshot, Option<String>)> {
    let mut archive = ZipArchive::new(file)?;

    let (bytes, declared) = {
        let member = archive
            .by_name(METADATA_NAME)
            .map_err(|_| SnapshotError::MissingFile(METADATA_NAME.to_string()))?;
        let declared = member.size();
        let mut bytes = Vec::new();
        member.take(MAX_METADATA_LEN).read_to_end(&mut bytes)?;
        (bytes, declared)
    };
    let snapshot: Snapshot = serde_json::from_slice(&bytes)?;

    if !snapshot.is_valid() {
        return Ok((snapshot, Some("invalid snapshot".to_string())));
    }
    if declared != bytes.len() as u64 {
        return Ok((
            snapshot,
            Some(format!(
                "declared metadata size ({}) does not match actual ({})",
                declared,
                bytes.len()
            )),
        ));
    }

    let expected = match read_metadata_hash(&mut archive) {
        Ok(hash) => hash,
        Err(e) => return Ok((snapshot, Some(e.to_string()))),
    };
    let mut digest = EntryDigest::new();
    digest.update(&bytes);
    let actual = digest.finish_hex();
    if actual != expected {
        return Ok((
            snapshot,
            Some(format!(
                "metadata hash mismatch (expected {:.7}…, actual {:.7}…)",
                expected, actual
            )),
        ));
    }

    Ok((snapshot, None))
}

fn read_metadata_hash(archive: &mut ZipArchive<&File>) -> Result<String> {
    let member = archive
        .by_name(METADATA_HASH_NAME)
        .map_err(|_| SnapshotError::MissingFile(METADATA_HASH_NAME.to_string()))?;
    let mut text = String::new();
    member.take(HASH_HEX_LEN as u64 * 2).read_to_string(&mut text)?;
    Ok(text.trim().to_string())
}

/// Stream an entry's stored bytes through SHA3-384 and compare.
pub(crate) fn verify_entry(
    archive: &mut ZipArchive<&File>,
    ctx: &CancelToken,
    entry: &str,
    expected: &str,
) -> Result<()> {
    let mut digest = EntryDigest::new();
    with_raw_entry(archive, entry, |member| copy_with_cancel(ctx, member, &mut digest))?;
    let actual = digest.finish_hex();
    if actual != expected {
        return Err(SnapshotError::Integrity {
            entry: entry.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Run `f` over an entry's bytes as stored, without the container's own checks.
pub(crate) fn with_raw_entry<T, F>(archive: &mut ZipArchive<&File>, entry: &str, f: F) -> Result<T>
where
    F: FnOnce(&mut dyn Read) -> Result<T>,
{
    let index = archive
        .index_for_name(entry)
        .ok_or_else(|| SnapshotError::MissingFile(entry.to_string()))?;
    let mut member = archive.by_index_raw(index)?;
    f(&mut member)
}
