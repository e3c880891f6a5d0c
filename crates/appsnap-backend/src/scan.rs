//! Scanning the snapshot directory.

use crate::backend::Backend;
use crate::error::{Result, SnapshotError};
use crate::filename;
use crate::metadata::SnapshotSet;
use crate::reader::{Reader, SetIdSource};
use appsnap_common::{CancelToken, SetId};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use tracing::warn;

/// Produces directory entry names a batch at a time.
pub trait NameBatches {
    /// The next batch of names, or `None` once exhausted.
    fn next_batch(&mut self) -> io::Result<Option<Vec<String>>>;
}

/// [`NameBatches`] over a real directory.
///
/// Names that are not valid UTF-8 cannot be snapshot archives and are dropped.
pub struct ReadDirBatches {
    entries: fs::ReadDir,
    batch_size: usize,
}

impl ReadDirBatches {
    pub fn new(entries: fs::ReadDir, batch_size: usize) -> Self {
        Self {
            entries,
            batch_size: batch_size.max(1),
        }
    }
}

impl NameBatches for ReadDirBatches {
    fn next_batch(&mut self) -> io::Result<Option<Vec<String>>> {
        let mut names = Vec::with_capacity(self.batch_size);
        let mut seen = 0;
        for entry in self.entries.by_ref().take(self.batch_size) {
            seen += 1;
            if let Ok(name) = entry?.file_name().into_string() {
                names.push(name);
            }
        }
        Ok((seen > 0).then_some(names))
    }
}

/// Something handed to a scan callback that must be released afterwards.
pub(crate) trait ScanHandle {
    fn close(self) -> io::Result<()>;
}

impl ScanHandle for Reader {
    fn close(self) -> io::Result<()> {
        Reader::close(self)
    }
}

/// Outcome of opening one candidate file during a scan.
pub(crate) enum Opened<H> {
    Ok(H),
    /// Opened but failed validation; still handed to the callback.
    Broken(H),
    Failed(SnapshotError),
}

/// Walk `batches`, open every name that looks like an archive, and call `f`.
///
/// Open failures without a handle are logged and skipped. Errors from `f`
/// and from closing a handle end the scan.
pub(crate) fn scan<B, H, O, F>(
    ctx: &CancelToken,
    dir: &Path,
    batches: &mut B,
    mut open: O,
    mut f: F,
) -> Result<()>
where
    B: NameBatches + ?Sized,
    H: ScanHandle,
    O: FnMut(&Path) -> Opened<H>,
    F: FnMut(&H) -> Result<()>,
{
    loop {
        ctx.check()?;
        let names = match batches.next_batch()? {
            Some(names) => names,
            None => return Ok(()),
        };

        for name in names {
            if filename::quick_decode(&name).is_none() {
                continue;
            }
            let handle = match open(&dir.join(&name)) {
                Opened::Ok(h) | Opened::Broken(h) => h,
                Opened::Failed(e) => {
                    warn!("Cannot open snapshot {:?}: {}.", name, e);
                    continue;
                }
            };
            let result = f(&handle);
            let closed = handle.close();
            result?;
            closed?;
        }
    }
}

impl Backend {
    /// Call `f` for every archive in the snapshot directory.
    ///
    /// Set IDs are taken from filenames. Archives that fail validation are
    /// still passed to `f` with [`Snapshot::broken`] set.
    ///
    /// [`Snapshot::broken`]: crate::Snapshot::broken
    pub fn iter<F>(&self, ctx: &CancelToken, f: F) -> Result<()>
    where
        F: FnMut(&Reader) -> Result<()>,
    {
        self.iter_with_source(ctx, SetIdSource::Filename, f)
    }

    /// Like [`iter`](Backend::iter) with an explicit set ID policy.
    pub fn iter_with_source<F>(&self, ctx: &CancelToken, source: SetIdSource, f: F) -> Result<()>
    where
        F: FnMut(&Reader) -> Result<()>,
    {
        ctx.check()?;
        let dir = self.layout.snapshots_dir();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(SnapshotError::OpenSnapshotsDir(e)),
        };
        let mut batches = ReadDirBatches::new(entries, self.dir_batch_size);
        scan(ctx, dir, &mut batches, |path| open_for_scan(path, source), f)
    }

    /// Snapshot sets in ascending ID order, each sorted by snap name.
    ///
    /// A zero `set_id` or empty `snap_names` does not filter.
    pub fn list(&self, ctx: &CancelToken, set_id: SetId, snap_names: &[String]) -> Result<Vec<SnapshotSet>> {
        let mut sets: BTreeMap<SetId, Vec<crate::Snapshot>> = BTreeMap::new();
        self.iter(ctx, |reader| {
            let snap = reader.snapshot();
            if set_id.is_set() && snap.set_id != set_id {
                return Ok(());
            }
            if !snap_names.is_empty() && !snap_names.iter().any(|n| *n == snap.snap) {
                return Ok(());
            }
            sets.entry(snap.set_id).or_default().push(snap.clone());
            Ok(())
        })?;

        Ok(sets
            .into_iter()
            .map(|(id, mut snapshots)| {
                snapshots.sort_by(|a, b| a.snap.cmp(&b.snap));
                SnapshotSet { id, snapshots }
            })
            .collect())
    }

    /// Highest set ID present in the snapshot directory, or 0 if none.
    pub fn last_snapshot_set_id(&self) -> Result<SetId> {
        let entries = match fs::read_dir(self.layout.snapshots_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SetId(0)),
            Err(e) => return Err(SnapshotError::OpenSnapshotsDir(e)),
        };
        let mut batches = ReadDirBatches::new(entries, self.dir_batch_size);
        let mut last = SetId(0);
        while let Some(names) = batches.next_batch()? {
            for name in names {
                if let Some(id) = filename::quick_decode(&name) {
                    last = last.max(id);
                }
            }
        }
        Ok(last)
    }
}

fn open_for_scan(path: &Path, source: SetIdSource) -> Opened<Reader> {
    match Reader::open(path, source) {
        Ok(reader) => Opened::Ok(reader),
        Err(e) => match e.reader {
            Some(reader) => Opened::Broken(*reader),
            None => Opened::Failed(e.source),
        },
    }
}
