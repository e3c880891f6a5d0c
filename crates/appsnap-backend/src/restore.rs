//! Restoring snapshot entries into place.
//!
//! Each data root is extracted into a `.snapshot*` scratch directory next to
//! its final location, then its `<revision>` and `common` directories are
//! renamed into place. Whatever was there before is renamed aside first and
//! tracked in [`RestoreState`] until the caller cleans it up or reverts.

use crate::backend::Backend;
use crate::error::{Result, SnapshotError};
use crate::metadata::{classify_entry, entry_selected, EntryKind};
use crate::process::{StreamEnd, TarProcess};
use crate::reader::{verify_entry, with_raw_entry, Reader};
use crate::stream::copy_with_cancel;
use appsnap_common::{CancelToken, Revision};
use appsnap_config::DataLayout;
use std::ffi::OsString;
use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const EXTRACT_ACTION: &str = "extract archive";

#[derive(Debug, Clone, PartialEq, Eq)]
struct MovedDir {
    backup: PathBuf,
    original: PathBuf,
}

/// What a restore changed on disk.
///
/// Dropping the state runs [`cleanup`](RestoreState::cleanup).
#[derive(Debug, Default)]
pub struct RestoreState {
    created: Vec<PathBuf>,
    moved: Vec<MovedDir>,
    done: bool,
}

impl RestoreState {
    /// Directories put in place by the restore.
    pub fn created(&self) -> &[PathBuf] {
        &self.created
    }

    /// Backups of directories the restore replaced.
    pub fn backups(&self) -> Vec<&Path> {
        self.moved.iter().map(|m| m.backup.as_path()).collect()
    }

    /// Delete the backups. Runs at most once.
    pub fn cleanup(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        for moved in &self.moved {
            if let Err(e) = fs::remove_dir_all(&moved.backup) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %moved.backup.display(), error = %e, "cannot remove restore backup");
                }
            }
        }
    }

    /// Undo the restore: remove what it created and move the backups back.
    pub fn revert(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        for dir in self.created.iter().rev() {
            if let Err(e) = fs::remove_dir_all(dir) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %dir.display(), error = %e, "cannot remove restored directory");
                }
            }
        }
        for moved in self.moved.iter().rev() {
            if let Err(e) = fs::rename(&moved.backup, &moved.original) {
                warn!(
                    backup = %moved.backup.display(),
                    original = %moved.original.display(),
                    error = %e,
                    "cannot move backup back"
                );
            }
        }
    }
}

impl Drop for RestoreState {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl Reader {
    /// Extract the selected entries over the live data directories.
    ///
    /// The revision directory is restored as `target_revision`, or as the
    /// archive's own revision when that is unset. `usernames` limits which
    /// users are restored; empty means all. Entries that cannot be restored
    /// for a reason outside the archive (unknown entry, unknown user) are
    /// reported through `progress` and skipped.
    ///
    /// Roots are restored one at a time. A failure leaves earlier roots
    /// restored; their backups are dropped with the returned error.
    pub fn restore(
        &self,
        backend: &Backend,
        ctx: &CancelToken,
        target_revision: Revision,
        usernames: &[String],
        progress: &mut dyn FnMut(&str),
    ) -> Result<RestoreState> {
        let mut state = RestoreState::default();
        let mut archive = self.archive()?;

        let rev_dir = self.snapshot.revision.to_string();
        let target_rev_dir = if target_revision.is_unset() {
            rev_dir.clone()
        } else {
            target_revision.to_string()
        };
        let instance = &self.snapshot.snap;

        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();

        for name in &names {
            let kind = classify_entry(name);
            let (base, owner) = match kind {
                EntryKind::Metadata => continue,
                EntryKind::Unknown => {
                    progress(&format!("Skipping restore of unknown entry {:?}.", name));
                    continue;
                }
                _ if !entry_selected(kind, usernames) => continue,
                EntryKind::System => (backend.layout.system_base_dir(instance), None),
                EntryKind::User(username) => match backend.users.lookup(username) {
                    Ok(Some(user)) => {
                        let owner = backend.privilege.is_elevated().then_some((user.uid, user.gid));
                        (DataLayout::user_base_dir(&user.home_dir, instance), owner)
                    }
                    Ok(None) => {
                        progress(&format!(
                            "Skipping restore of user {:?}: user does not exist.",
                            username
                        ));
                        continue;
                    }
                    Err(e) => {
                        progress(&format!("Skipping restore of user {:?}: {}.", username, e));
                        continue;
                    }
                },
            };

            let expected = self.snapshot.sha3_384.get(name).ok_or_else(|| {
                SnapshotError::CorruptedMetadata(format!("no hash recorded for entry {:?}", name))
            })?;

            ctx.check()?;
            verify_entry(&mut archive, ctx, name, expected)?;

            mkdir_all_chown(&base, owner)?;
            let scratch = tempfile::Builder::new()
                .prefix(".snapshot")
                .tempdir_in(&base)?;
            if let Some((uid, gid)) = owner {
                std::os::unix::fs::chown(scratch.path(), Some(uid), Some(gid))?;
            }

            let username = match kind {
                EntryKind::User(u) => Some(u),
                _ => None,
            };
            ctx.check()?;
            self.extract(backend, ctx, &mut archive, name, username, scratch.path())?;

            let stamp = backup_stamp(backend);
            for (dir, target_dir) in [
                (DataLayout::common_dir_name(), DataLayout::common_dir_name()),
                (rev_dir.as_str(), target_rev_dir.as_str()),
            ] {
                let source = scratch.path().join(dir);
                if !fs::symlink_metadata(&source).map(|m| m.is_dir()).unwrap_or(false) {
                    continue;
                }
                move_into_place(&mut state, &source, &base.join(target_dir), &stamp)?;
            }

            debug!(entry = %name, base = %base.display(), "restored data root");
        }

        Ok(state)
    }

    fn extract(
        &self,
        backend: &Backend,
        ctx: &CancelToken,
        archive: &mut zip::ZipArchive<&std::fs::File>,
        entry: &str,
        username: Option<&str>,
        into: &Path,
    ) -> Result<()> {
        let mut args: Vec<OsString> = [
            "--extract",
            "--preserve-permissions",
            "--preserve-order",
            "--gunzip",
            "--directory",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        args.push(into.as_os_str().to_os_string());

        let cmd = backend.privilege.tar_as_user(username, args);
        let mut proc = TarProcess::spawn(cmd, StreamEnd::Stdin)?;
        let copied = {
            let mut stdin = proc.take_stdin().ok_or_else(|| {
                io::Error::new(io::ErrorKind::BrokenPipe, "archiver stdin unavailable")
            })?;
            with_raw_entry(archive, entry, |member| copy_with_cancel(ctx, member, &mut stdin))
        };

        match copied {
            Ok(_) => proc.finish(EXTRACT_ACTION),
            // The archiver quit early; its own complaint is the useful one.
            Err(SnapshotError::Io(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                proc.finish(EXTRACT_ACTION)?;
                Err(SnapshotError::Io(e))
            }
            Err(e) => Err(e),
        }
    }
}

/// Rename `source` to `target`, setting any existing `target` aside first.
fn move_into_place(state: &mut RestoreState, source: &Path, target: &Path, stamp: &str) -> Result<()> {
    let backup = match fs::symlink_metadata(target) {
        Ok(_) => {
            let backup = backup_path(target, stamp);
            fs::rename(target, &backup)?;
            Some(backup)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    if let Err(e) = fs::rename(source, target) {
        if let Some(ref backup) = backup {
            if let Err(undo) = fs::rename(backup, target) {
                warn!(
                    backup = %backup.display(),
                    target = %target.display(),
                    error = %undo,
                    "cannot move backup back after failed restore"
                );
            }
        }
        return Err(e.into());
    }

    if let Some(backup) = backup {
        state.moved.push(MovedDir {
            backup,
            original: target.to_path_buf(),
        });
    }
    state.created.push(target.to_path_buf());
    Ok(())
}

fn backup_stamp(backend: &Backend) -> String {
    let nanos = backend.now().timestamp_nanos_opt().unwrap_or_default();
    format!("{:x}", nanos)
}

/// `<target>.~<stamp>~`, with a counter if that name is taken.
fn backup_path(target: &Path, stamp: &str) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut candidate = target.with_file_name(format!("{}.~{}~", name, stamp));
    let mut n = 1;
    while fs::symlink_metadata(&candidate).is_ok() {
        candidate = target.with_file_name(format!("{}.~{}.{}~", name, stamp, n));
        n += 1;
    }
    candidate
}

/// Create `path` and any missing parents (mode 0755), giving new ones to `owner`.
fn mkdir_all_chown(path: &Path, owner: Option<(u32, u32)>) -> io::Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        mkdir_all_chown(parent, owner)?;
    }
    match DirBuilder::new().mode(0o755).create(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => return Ok(()),
        Err(e) => return Err(e),
    }
    if let Some((uid, gid)) = owner {
        std::os::unix::fs::chown(path, Some(uid), Some(gid))?;
    }
    Ok(())
}
