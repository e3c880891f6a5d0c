//! No-mock snapshot integration tests.
//!
//! Drives the real archiver against a scratch root:
//! - Save, list, open, and check archives
//! - Corruption detection through the entry hashes
//! - Restore round trip, restore into another revision, revert
//! - Set IDs taken from filenames
//! - Export size determinism and import under a new set ID
//!
//! Only the user database is replaced, so no real accounts are touched.

use appsnap_backend::{
    Backend, PrivilegeResolver, Reader, SaveFlags, SetIdSource, SnapshotError, SnapshotExport,
    UserEntry, UserLookup, ARCHIVE_NAME, METADATA_HASH_NAME, METADATA_NAME,
};
use appsnap_common::{AppInfo, CancelToken, Revision, SetId};
use appsnap_config::DataLayout;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

const SNAP: &str = "hello-snap";
const USER: &str = "snapuser";

// ============================================================================
// Helpers
// ============================================================================

/// Users known to the scratch root: only `snapuser`, owned by the test process.
struct ScratchUsers {
    home: PathBuf,
    uid: u32,
    gid: u32,
}

impl UserLookup for ScratchUsers {
    fn lookup(&self, username: &str) -> appsnap_backend::Result<Option<UserEntry>> {
        Ok((username == USER).then(|| UserEntry {
            username: USER.to_string(),
            home_dir: self.home.clone(),
            uid: self.uid,
            gid: self.gid,
        }))
    }

    fn all_users(&self) -> appsnap_backend::Result<Vec<UserEntry>> {
        Ok(self.lookup(USER)?.into_iter().collect())
    }
}

struct Fixture {
    root: TempDir,
    backend: Backend,
}

impl Fixture {
    /// A populated root, or `None` when no archiver is installed.
    fn new() -> Option<Self> {
        if which::which("tar").is_err() {
            eprintln!("tar not found; skipping");
            return None;
        }
        let root = TempDir::new().expect("tempdir");
        let meta = fs::metadata(root.path()).expect("stat root");
        let users = ScratchUsers {
            home: root.path().join("home").join(USER),
            uid: meta.uid(),
            gid: meta.gid(),
        };
        let privilege = PrivilegeResolver::new(Arc::new(|_: &str| None::<PathBuf>), Arc::new(|| 1000u32));
        let backend = Backend::new(DataLayout::new(root.path()))
            .with_user_lookup(users)
            .with_privilege_resolver(privilege)
            .with_clock(|| fixed_time(0));

        let fixture = Fixture { root, backend };
        fixture.populate();
        Some(fixture)
    }

    fn populate(&self) {
        write(&self.system_dir("42").join("data.txt"), b"system rev 42\n");
        write(&self.system_dir("42").join("nested/deep/conf"), b"key=value\n");
        write(&self.system_dir("common").join("shared.txt"), b"shared\n");
        write(&self.system_dir("41").join("old.txt"), b"older revision\n");
        write(&self.user_dir("42").join("prefs.json"), br#"{"theme":"dark"}"#);
        let blob: Vec<u8> = (0..4096u32).map(|i| (i * 31 % 251) as u8).collect();
        write(&self.user_dir("common").join("cache/blob.bin"), &blob);
    }

    fn system_base(&self) -> PathBuf {
        self.backend.layout().system_base_dir(SNAP)
    }

    fn system_dir(&self, name: &str) -> PathBuf {
        self.system_base().join(name)
    }

    fn user_base(&self) -> PathBuf {
        DataLayout::user_base_dir(&self.root.path().join("home").join(USER), SNAP)
    }

    fn user_dir(&self, name: &str) -> PathBuf {
        self.user_base().join(name)
    }

    fn app(&self) -> AppInfo {
        AppInfo::new(SNAP, Revision(42)).with_version("v1.33")
    }

    fn save(&self, set_id: u64) -> appsnap_backend::Snapshot {
        self.backend
            .save(&CancelToken::new(), SetId(set_id), &self.app(), None, &[], SaveFlags::default())
            .expect("save snapshot")
    }

    fn archive_path(&self, name: &str) -> PathBuf {
        self.backend.layout().snapshots_dir().join(name)
    }

    fn snapshot_files(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.backend.layout().snapshots_dir())
            .expect("read snapshots dir")
            .map(|e| e.expect("dir entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

fn fixed_time(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap() + chrono::Duration::seconds(secs)
}

fn write(path: &Path, data: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

/// Relative path to contents of every regular file under `dir`.
fn tree(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(dir).unwrap().to_string_lossy().into_owned();
            (rel, fs::read(e.path()).unwrap())
        })
        .collect()
}

fn dir_names(dir: &Path) -> BTreeSet<String> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

fn zip_entries(path: &Path) -> BTreeSet<String> {
    let archive = zip::ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
    archive.file_names().map(String::from).collect()
}

// ============================================================================
// Save, list, check
// ============================================================================

#[test]
fn test_save_and_list() {
    let Some(fx) = Fixture::new() else { return };
    let snapshot = fx.save(12);

    assert_eq!(snapshot.set_id, SetId(12));
    assert_eq!(snapshot.time, fixed_time(0));
    assert_eq!(fx.snapshot_files(), vec!["12_hello-snap_v1.33_42.zip"]);

    let entries = zip_entries(&fx.archive_path("12_hello-snap_v1.33_42.zip"));
    let expected: BTreeSet<String> = [ARCHIVE_NAME, "user/snapuser.tgz", METADATA_NAME, METADATA_HASH_NAME]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(entries, expected);

    let sets = fx.backend.list(&CancelToken::new(), SetId(0), &[]).unwrap();
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].id, SetId(12));
    assert_eq!(sets[0].snap_names(), vec![SNAP]);
    let listed = &sets[0].snapshots[0];
    assert_eq!(listed.sha3_384, snapshot.sha3_384);
    assert_eq!(listed.size, snapshot.size);
    assert!(listed.broken.is_none());
}

#[test]
fn test_list_filters() {
    let Some(fx) = Fixture::new() else { return };
    fx.save(3);
    fx.save(12);
    let ctx = CancelToken::new();

    let ids: Vec<SetId> = fx.backend.list(&ctx, SetId(0), &[]).unwrap().iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![SetId(3), SetId(12)]);

    let only = fx.backend.list(&ctx, SetId(3), &[]).unwrap();
    assert_eq!(only.len(), 1);
    assert_eq!(only[0].id, SetId(3));

    assert!(fx
        .backend
        .list(&ctx, SetId(0), &["other-snap".to_string()])
        .unwrap()
        .is_empty());
    assert_eq!(fx.backend.last_snapshot_set_id().unwrap(), SetId(12));
}

#[test]
fn test_last_set_id_without_snapshots() {
    let Some(fx) = Fixture::new() else { return };
    assert_eq!(fx.backend.last_snapshot_set_id().unwrap(), SetId(0));
    assert!(fx.backend.list(&CancelToken::new(), SetId(0), &[]).unwrap().is_empty());
}

#[test]
fn test_open_and_check() {
    let Some(fx) = Fixture::new() else { return };
    fx.save(12);

    let reader = Reader::open(&fx.archive_path("12_hello-snap_v1.33_42.zip"), SetIdSource::Filename)
        .expect("open archive");
    assert!(!reader.is_broken());
    assert_eq!(reader.snapshot().revision, Revision(42));
    reader.check(&CancelToken::new(), &[]).expect("check all");
    reader.check(&CancelToken::new(), &[USER.to_string()]).expect("check one user");
    reader.close().unwrap();
}

#[test]
fn test_check_cancelled() {
    let Some(fx) = Fixture::new() else { return };
    fx.save(12);

    let reader = Reader::open(&fx.archive_path("12_hello-snap_v1.33_42.zip"), SetIdSource::Metadata).unwrap();
    let err = reader.check(&CancelToken::cancelled(), &[]).unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.to_string(), "context canceled");
}

#[test]
fn test_corruption_detected() {
    let Some(fx) = Fixture::new() else { return };
    fx.save(12);
    let path = fx.archive_path("12_hello-snap_v1.33_42.zip");

    let mut bytes = fs::read(&path).unwrap();
    let magic = bytes
        .windows(3)
        .position(|w| w == [0x1f, 0x8b, 0x08])
        .expect("gzip stream inside archive");
    bytes[magic + 12] ^= 0xff;
    fs::write(&path, &bytes).unwrap();

    let reader = Reader::open(&path, SetIdSource::Filename).expect("metadata still valid");
    let err = reader.check(&CancelToken::new(), &[]).unwrap_err();
    match &err {
        SnapshotError::Integrity { entry, .. } => assert_eq!(entry, ARCHIVE_NAME),
        other => panic!("expected integrity error, got {other:?}"),
    }
    assert!(err.to_string().starts_with("snapshot entry \"archive.tgz\" expected hash ("));

    // Restore refuses the damaged entry before touching live data.
    let before = tree(&fx.system_base());
    let mut progress = |_: &str| {};
    let err = reader
        .restore(&fx.backend, &CancelToken::new(), Revision(0), &[], &mut progress)
        .unwrap_err();
    assert!(matches!(err, SnapshotError::Integrity { .. }));
    assert_eq!(tree(&fx.system_base()), before);
}

// ============================================================================
// Restore
// ============================================================================

#[test]
fn test_restore_round_trip() {
    let Some(fx) = Fixture::new() else { return };
    let system_before = tree(&fx.system_base());
    let user_before = tree(&fx.user_base());
    fx.save(12);

    // Diverge from the snapshot.
    write(&fx.system_dir("42").join("data.txt"), b"changed\n");
    write(&fx.system_dir("42").join("extra.txt"), b"added later\n");
    fs::remove_dir_all(fx.user_dir("common")).unwrap();

    let reader = Reader::open(&fx.archive_path("12_hello-snap_v1.33_42.zip"), SetIdSource::Filename).unwrap();
    let mut messages = Vec::new();
    let state = reader
        .restore(&fx.backend, &CancelToken::new(), Revision(0), &[], &mut |m: &str| {
            messages.push(m.to_string())
        })
        .expect("restore");
    assert!(messages.is_empty(), "{messages:?}");
    assert_eq!(state.created().len(), 4);
    assert_eq!(state.backups().len(), 3);
    drop(state);

    assert_eq!(tree(&fx.system_base()), system_before);
    assert_eq!(tree(&fx.user_base()), user_before);

    // Backups and scratch directories are gone.
    let expected: BTreeSet<String> = ["41", "42", "common"].iter().map(|s| s.to_string()).collect();
    assert_eq!(dir_names(&fx.system_base()), expected);
    let expected: BTreeSet<String> = ["42", "common"].iter().map(|s| s.to_string()).collect();
    assert_eq!(dir_names(&fx.user_base()), expected);
}

#[test]
fn test_restore_into_other_revision() {
    let Some(fx) = Fixture::new() else { return };
    fx.save(12);
    write(&fx.system_dir("42").join("data.txt"), b"live\n");

    let reader = Reader::open(&fx.archive_path("12_hello-snap_v1.33_42.zip"), SetIdSource::Filename).unwrap();
    let mut progress = |_: &str| {};
    let mut state = reader
        .restore(&fx.backend, &CancelToken::new(), Revision(43), &[], &mut progress)
        .expect("restore");
    state.cleanup();

    assert_eq!(fs::read(fx.system_dir("43").join("data.txt")).unwrap(), b"system rev 42\n");
    assert_eq!(fs::read(fx.system_dir("42").join("data.txt")).unwrap(), b"live\n");
    assert!(fx.user_dir("43").join("prefs.json").is_file());
}

#[test]
fn test_restore_revert() {
    let Some(fx) = Fixture::new() else { return };
    fx.save(12);
    write(&fx.system_dir("42").join("data.txt"), b"live\n");
    let live = tree(&fx.system_base());

    let reader = Reader::open(&fx.archive_path("12_hello-snap_v1.33_42.zip"), SetIdSource::Filename).unwrap();
    let mut progress = |_: &str| {};
    let mut state = reader
        .restore(&fx.backend, &CancelToken::new(), Revision(0), &[USER.to_string()], &mut progress)
        .expect("restore");
    // A user filter never excludes the system data.
    assert_eq!(fs::read(fx.system_dir("42").join("data.txt")).unwrap(), b"system rev 42\n");
    assert_ne!(tree(&fx.system_base()), live);

    state.revert();
    assert_eq!(tree(&fx.system_base()), live);
    assert!(fx.user_dir("42").join("prefs.json").is_file());
    let expected: BTreeSet<String> = ["42", "common"].iter().map(|s| s.to_string()).collect();
    assert_eq!(dir_names(&fx.user_base()), expected);
}

// ============================================================================
// Set IDs
// ============================================================================

#[test]
fn test_set_id_from_filename() {
    let Some(fx) = Fixture::new() else { return };
    fx.save(12);
    fs::rename(fx.archive_path("12_hello-snap_v1.33_42.zip"), fx.archive_path("33_hello.zip")).unwrap();

    let mut seen = Vec::new();
    fx.backend
        .iter(&CancelToken::new(), |reader| {
            seen.push(reader.snapshot().set_id);
            Ok(())
        })
        .unwrap();
    assert_eq!(seen, vec![SetId(33)]);

    let path = fx.archive_path("33_hello.zip");
    assert_eq!(Reader::open(&path, SetIdSource::Metadata).unwrap().snapshot().set_id, SetId(12));
    assert_eq!(
        Reader::open(&path, SetIdSource::Explicit(SetId(99))).unwrap().snapshot().set_id,
        SetId(99)
    );
}

// ============================================================================
// Estimate
// ============================================================================

#[test]
fn test_estimate_matches_saved_tree() {
    let Some(fx) = Fixture::new() else { return };
    let expected: u64 = [fx.system_dir("42"), fx.system_dir("common"), fx.user_dir("42"), fx.user_dir("common")]
        .iter()
        .flat_map(|d| tree(d).into_values())
        .map(|data| data.len() as u64)
        .sum();

    let size = fx.backend.estimate_snapshot_size(&fx.app(), &[]).unwrap();
    assert_eq!(size, expected);
    let system_only = fx
        .backend
        .estimate_snapshot_size(&fx.app(), &["nobody-here".to_string()])
        .unwrap();
    assert!(system_only < size);
}

// ============================================================================
// Export and import
// ============================================================================

#[test]
fn test_export_size_is_exact_and_stable() {
    let Some(fx) = Fixture::new() else { return };
    fx.save(12);
    let ctx = CancelToken::new();

    let mut first = SnapshotExport::new(&fx.backend, &ctx, SetId(12)).unwrap();
    first.init().unwrap();
    let size = first.size().unwrap();
    let mut out = Vec::new();
    assert_eq!(first.stream_to(&mut out).unwrap(), size);
    assert_eq!(out.len() as u64, size);
    assert_eq!(first.file_names(), vec!["12_hello-snap_v1.33_42.zip"]);

    // The size must not depend on when the export is taken.
    let clocks: [(&str, DateTime<Utc>); 3] = [
        ("next day", fixed_time(86_400 + 7)),
        ("far future", Utc.with_ymd_and_hms(2242, 11, 30, 23, 59, 59).unwrap()),
        ("year one", Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).unwrap()),
    ];
    for (label, when) in clocks {
        let backend = fx.backend.clone().with_clock(move || when);
        let mut other = SnapshotExport::new(&backend, &ctx, SetId(12)).unwrap();
        other.init().unwrap();
        assert_eq!(other.size(), Some(size), "{label}");

        let mut streamed = Vec::new();
        assert_eq!(other.stream_to(&mut streamed).unwrap(), size, "{label}");
        assert_eq!(streamed.len() as u64, size, "{label}");
    }

    // The stream is a plain tar: export.json first, then the archive.
    let mut archive = tar::Archive::new(out.as_slice());
    let names: Vec<String> = archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["export.json", "12_hello-snap_v1.33_42.zip"]);
}

#[test]
fn test_export_missing_set() {
    let Some(fx) = Fixture::new() else { return };
    fx.save(12);
    let err = SnapshotExport::new(&fx.backend, &CancelToken::new(), SetId(999)).unwrap_err();
    assert_eq!(err.to_string(), "no snapshot data found for 999");
}

#[test]
fn test_import_under_new_set_id() {
    let Some(fx) = Fixture::new() else { return };
    fx.save(12);
    let ctx = CancelToken::new();

    let mut export = SnapshotExport::new(&fx.backend, &ctx, SetId(12)).unwrap();
    let mut stream = Vec::new();
    export.stream_to(&mut stream).unwrap();

    let names = fx.backend.import(&ctx, SetId(20), stream.as_slice()).expect("import");
    assert_eq!(names, vec![SNAP.to_string()]);
    assert_eq!(
        fx.snapshot_files(),
        vec!["12_hello-snap_v1.33_42.zip", "20_hello-snap_v1.33_42.zip"]
    );

    let sets = fx.backend.list(&ctx, SetId(20), &[]).unwrap();
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].snap_names(), vec![SNAP]);
    assert_eq!(fx.backend.last_snapshot_set_id().unwrap(), SetId(20));

    let reader = Reader::open(&fx.archive_path("20_hello-snap_v1.33_42.zip"), SetIdSource::Filename).unwrap();
    reader.check(&ctx, &[]).expect("imported archive verifies");

    // Importing the same set again must not clobber it.
    let err = fx.backend.import(&ctx, SetId(20), stream.as_slice()).unwrap_err();
    assert!(matches!(err, SnapshotError::Io(_)), "{err:?}");
    assert_eq!(fx.snapshot_files().len(), 2);
}
