//! Importing an exported snapshot set under a new set ID.

use crate::backend::Backend;
use crate::error::{Result, SnapshotError};
use crate::export::{ExportMetadata, EXPORT_FORMAT, EXPORT_METADATA_NAME};
use crate::filename;
use crate::reader::{Reader, SetIdSource};
use crate::stream::copy_with_cancel;
use appsnap_common::{CancelToken, SetId};
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// Largest `export.json` accepted.
const MAX_EXPORT_METADATA_LEN: u64 = 1024 * 1024;

impl Backend {
    /// Unpack an export stream into the snapshot directory as set `set_id`.
    ///
    /// Every archive is staged and validated before any is published; on
    /// error nothing is left behind. Returns the imported snap names.
    pub fn import<R: Read>(&self, ctx: &CancelToken, set_id: SetId, reader: R) -> Result<Vec<String>> {
        ctx.check()?;
        if !set_id.is_set() {
            return Err(SnapshotError::InvalidExport("set ID must be positive".to_string()));
        }
        self.ensure_snapshots_dir()?;
        let dir = self.layout.snapshots_dir();

        let mut archive = tar::Archive::new(reader);
        let mut metadata: Option<ExportMetadata> = None;
        let mut staged: Vec<(NamedTempFile, String)> = Vec::new();

        for entry in archive.entries()? {
            ctx.check()?;
            let mut entry = entry?;
            let name = entry.path()?.to_string_lossy().into_owned();

            if name == EXPORT_METADATA_NAME {
                let mut bytes = Vec::new();
                (&mut entry)
                    .take(MAX_EXPORT_METADATA_LEN)
                    .read_to_end(&mut bytes)?;
                let meta: ExportMetadata = serde_json::from_slice(&bytes)?;
                if meta.format != EXPORT_FORMAT {
                    return Err(SnapshotError::InvalidExport(format!(
                        "unsupported format {}",
                        meta.format
                    )));
                }
                metadata = Some(meta);
                continue;
            }

            let meta = metadata.as_ref().ok_or_else(|| {
                SnapshotError::InvalidExport(format!("{} must come first", EXPORT_METADATA_NAME))
            })?;
            if !meta.files.contains(&name) {
                return Err(SnapshotError::InvalidExport(format!("unexpected entry {:?}", name)));
            }
            let rest = match (filename::quick_decode(&name), name.split_once('_')) {
                // Archives only ever land directly in the snapshot directory.
                (Some(_), Some((_, rest))) if !name.contains('/') => rest,
                _ => {
                    return Err(SnapshotError::InvalidExport(format!(
                        "not a snapshot archive: {:?}",
                        name
                    )))
                }
            };

            let mut tmp = tempfile::Builder::new()
                .prefix(".appsnap-import-")
                .suffix(".tmp")
                .tempfile_in(dir)?;
            copy_with_cancel(ctx, &mut entry, tmp.as_file_mut())?;
            staged.push((tmp, format!("{}_{}", set_id, rest)));
        }

        let meta = metadata.ok_or_else(|| {
            SnapshotError::InvalidExport(format!("missing {}", EXPORT_METADATA_NAME))
        })?;
        if staged.len() != meta.files.len() {
            return Err(SnapshotError::InvalidExport(format!(
                "expected {} archives, found {}",
                meta.files.len(),
                staged.len()
            )));
        }

        let mut names = Vec::with_capacity(staged.len());
        for (tmp, _) in &staged {
            tmp.as_file().sync_all()?;
            let reader = Reader::open(tmp.path(), SetIdSource::Explicit(set_id)).map_err(|e| e.source)?;
            names.push(reader.snapshot().snap.clone());
            reader.close()?;
        }

        ctx.check()?;
        let mut published: Vec<PathBuf> = Vec::with_capacity(staged.len());
        for (tmp, target_name) in staged {
            let target = dir.join(&target_name);
            if let Err(e) = tmp.persist_noclobber(&target) {
                for path in &published {
                    if let Err(undo) = fs::remove_file(path) {
                        warn!(path = %path.display(), error = %undo, "cannot remove partially imported archive");
                    }
                }
                return Err(e.error.into());
            }
            published.push(target);
        }

        info!(set_id = %set_id, archives = names.len(), "Snapshot set imported");
        Ok(names)
    }
}
