//! Snapshot writer.
//!
//! Creates one ZIP archive per application: a gzipped tar per data root,
//! then `meta.json` and its hash. The archive is built in a temporary file
//! inside the snapshot directory and renamed into place only once complete.

use crate::backend::Backend;
use crate::error::{Result, SnapshotError};
use crate::filename;
use crate::metadata::{user_entry_name, AppConfig, Snapshot, ARCHIVE_NAME, METADATA_HASH_NAME, METADATA_NAME};
use crate::process::{StreamEnd, TarProcess};
use crate::stream::{sha3_384_hex, EntryDigest, COPY_CHUNK};
use appsnap_common::{AppInfo, CancelToken, SetId};
use appsnap_config::DataLayout;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::{debug, info};
use zip::write::{FileOptions, ZipWriter};
use zip::CompressionMethod;

/// Options for [`Backend::save`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveFlags {
    /// Mark the snapshot as taken automatically.
    pub auto: bool,
}

type ArchiveZip<'a> = ZipWriter<&'a File>;

impl Backend {
    /// Capture an application's system and user data into a new archive.
    ///
    /// `usernames` limits which users are captured; empty means all users.
    /// On error or cancellation nothing is left in the snapshot directory.
    pub fn save(
        &self,
        ctx: &CancelToken,
        set_id: SetId,
        app: &AppInfo,
        conf: Option<&AppConfig>,
        usernames: &[String],
        flags: SaveFlags,
    ) -> Result<Snapshot> {
        ctx.check()?;

        let mut snapshot = Snapshot::new(set_id, app, self.now());
        snapshot.conf = conf.cloned();
        snapshot.auto = flags.auto;
        if let Some(problem) = snapshot.invalid_field() {
            return Err(SnapshotError::InvalidSnapshot(problem));
        }

        self.ensure_snapshots_dir()?;
        let dir = self.layout.snapshots_dir();
        let target = filename::filename(dir, &snapshot);

        let tmp = tempfile::Builder::new()
            .prefix(".appsnap-")
            .suffix(".tmp")
            .tempfile_in(dir)?;

        {
            let mut zip = ZipWriter::new(tmp.as_file());
            let rev = app.revision.to_string();

            self.add_dir_to_zip(
                ctx,
                &mut snapshot,
                &mut zip,
                None,
                ARCHIVE_NAME,
                &self.layout.system_base_dir(&app.instance_name),
                &rev,
            )?;

            for user in self.users.users_for_usernames(usernames)? {
                self.add_dir_to_zip(
                    ctx,
                    &mut snapshot,
                    &mut zip,
                    Some(&user.username),
                    &user_entry_name(&user.username),
                    &DataLayout::user_base_dir(&user.home_dir, &app.instance_name),
                    &rev,
                )?;
            }

            let meta = serde_json::to_vec(&snapshot)?;
            let options: FileOptions<'_, ()> = FileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .unix_permissions(0o600);

            zip.start_file(METADATA_NAME, options)?;
            zip.write_all(&meta)?;

            zip.start_file(METADATA_HASH_NAME, options)?;
            writeln!(zip, "{}", sha3_384_hex(&meta))?;

            zip.finish()?;
        }

        ctx.check()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| e.error)?;

        info!(
            path = %target.display(),
            set_id = %snapshot.set_id,
            snap = %snapshot.snap,
            entries = snapshot.sha3_384.len(),
            bytes = snapshot.size,
            "Snapshot saved"
        );

        Ok(snapshot)
    }

    /// Archive `<base>/<rev>` and `<base>/common` into the entry `entry`.
    #[allow(clippy::too_many_arguments)]
    fn add_dir_to_zip(
        &self,
        ctx: &CancelToken,
        snapshot: &mut Snapshot,
        zip: &mut ArchiveZip<'_>,
        username: Option<&str>,
        entry: &str,
        base: &Path,
        rev: &str,
    ) -> Result<()> {
        match fs::metadata(base) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                info!(
                    "Not saving directories under {} in snapshot #{} of {:?} as it is not a directory.",
                    base.display(),
                    snapshot.set_id,
                    snapshot.snap
                );
                return Ok(());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(
                    "Not saving directories under {} in snapshot #{} of {:?} as it does not exist.",
                    base.display(),
                    snapshot.set_id,
                    snapshot.snap
                );
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let members = existing_subdirs(base, &[rev, DataLayout::common_dir_name()])?;
        if members.is_empty() {
            debug!(base = %base.display(), "nothing to archive");
            return Ok(());
        }

        ctx.check()?;

        let mut args: Vec<OsString> = [
            "--create",
            "--sparse",
            "--gzip",
            "--format",
            "gnu",
            "--directory",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        args.push(base.as_os_str().to_os_string());
        args.extend(members.iter().map(OsString::from));

        let cmd = self.privilege.tar_as_user(username, args);
        let mut proc = TarProcess::spawn(cmd, StreamEnd::Stdout)?;
        let mut stdout = proc
            .take_stdout()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "archiver stdout unavailable"))?;

        let options: FileOptions<'_, ()> = FileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .large_file(true)
            .unix_permissions(0o600);
        zip.start_file(entry, options)?;

        let mut digest = EntryDigest::new();
        let mut buf = vec![0u8; COPY_CHUNK];
        loop {
            // Dropping `proc` on this path kills the archiver.
            ctx.check()?;
            let n = match stdout.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            zip.write_all(&buf[..n])?;
            digest.update(&buf[..n]);
        }
        drop(stdout);
        proc.finish("create archive")?;

        let len = digest.len();
        snapshot.add_entry(entry, digest.finish_hex(), len);
        debug!(entry, bytes = len, "archived data root");
        Ok(())
    }
}

/// Which of `names` exist under `base` as directories, in the given order.
fn existing_subdirs<'a>(base: &Path, names: &[&'a str]) -> Result<Vec<&'a str>> {
    let mut found = Vec::with_capacity(names.len());
    for name in names {
        match fs::metadata(base.join(name)) {
            Ok(meta) if meta.is_dir() => found.push(*name),
            Ok(_) => debug!(base = %base.display(), name, "skipping non-directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(found)
}
