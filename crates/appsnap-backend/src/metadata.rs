//! Snapshot metadata types and archive member names.
//!
//! Every archive carries a `meta.json` describing the captured application
//! and listing a SHA3-384 hash for each data entry, plus a `meta.sha3_384`
//! sidecar holding the hash of `meta.json` itself.

use appsnap_common::{AppInfo, Epoch, Revision, SetId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Metadata member name within an archive.
pub const METADATA_NAME: &str = "meta.json";

/// Sidecar holding the hex hash of [`METADATA_NAME`].
pub const METADATA_HASH_NAME: &str = "meta.sha3_384";

/// Entry holding the system data root.
pub const ARCHIVE_NAME: &str = "archive.tgz";

const USER_ENTRY_PREFIX: &str = "user/";
const ENTRY_SUFFIX: &str = ".tgz";

/// Length of a hex-encoded SHA3-384 digest.
pub const HASH_HEX_LEN: usize = 96;

/// Application configuration captured alongside the data.
pub type AppConfig = Map<String, Value>;

/// Metadata of one snapshot archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Snapshot {
    pub set_id: SetId,

    /// When the snapshot was taken.
    pub time: DateTime<Utc>,

    /// Instance name of the application.
    pub snap: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub snap_id: String,

    pub revision: Revision,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    #[serde(default)]
    pub epoch: Epoch,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conf: Option<AppConfig>,

    /// Entry name to hex SHA3-384 of the entry bytes.
    #[serde(rename = "sha3-384", default)]
    pub sha3_384: BTreeMap<String, String>,

    /// Sum of the lengths of all data entries.
    #[serde(default)]
    pub size: u64,

    /// Taken automatically rather than on request.
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto: bool,

    /// Why the archive failed validation, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broken: Option<String>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Snapshot {
    /// Metadata for a fresh snapshot of `app`, with no entries yet.
    pub fn new(set_id: SetId, app: &AppInfo, time: DateTime<Utc>) -> Self {
        Self {
            set_id,
            time,
            snap: app.instance_name.clone(),
            snap_id: app.app_id.clone(),
            revision: app.revision,
            version: app.version.clone(),
            epoch: app.epoch.clone(),
            summary: String::new(),
            conf: None,
            sha3_384: BTreeMap::new(),
            size: 0,
            auto: false,
            broken: None,
        }
    }

    /// Whether the fields every archive needs are present.
    pub fn is_valid(&self) -> bool {
        self.invalid_field().is_none()
    }

    /// The first field that keeps this snapshot from being valid.
    pub fn invalid_field(&self) -> Option<&'static str> {
        if !self.set_id.is_set() {
            Some("set ID must be positive")
        } else if self.snap.is_empty() {
            Some("snap name is empty")
        } else if self.revision.is_unset() {
            Some("revision is unset")
        } else {
            None
        }
    }

    /// Record a finished entry.
    pub fn add_entry(&mut self, name: impl Into<String>, hash: String, len: u64) {
        self.sha3_384.insert(name.into(), hash);
        self.size += len;
    }

    /// The archive filename this snapshot is stored under.
    pub fn filename(&self) -> String {
        crate::filename::encode(self.set_id, &self.snap, &self.version, self.revision)
    }
}

/// Snapshots sharing one set ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSet {
    pub id: SetId,
    pub snapshots: Vec<Snapshot>,
}

impl SnapshotSet {
    /// Instance names in this set, in stored order.
    pub fn snap_names(&self) -> Vec<&str> {
        self.snapshots.iter().map(|s| s.snap.as_str()).collect()
    }
}

/// Entry name for a user's data root.
pub fn user_entry_name(username: &str) -> String {
    format!("{}{}{}", USER_ENTRY_PREFIX, username, ENTRY_SUFFIX)
}

/// Which data root an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind<'a> {
    System,
    User(&'a str),
    Metadata,
    Unknown,
}

/// Classify an archive member name.
pub fn classify_entry(name: &str) -> EntryKind<'_> {
    if name == ARCHIVE_NAME {
        return EntryKind::System;
    }
    if name == METADATA_NAME || name == METADATA_HASH_NAME {
        return EntryKind::Metadata;
    }
    match name
        .strip_prefix(USER_ENTRY_PREFIX)
        .and_then(|rest| rest.strip_suffix(ENTRY_SUFFIX))
    {
        Some(user) if !user.is_empty() && !user.contains('/') => EntryKind::User(user),
        _ => EntryKind::Unknown,
    }
}

/// Whether an entry passes a username filter; an empty filter keeps all.
pub(crate) fn entry_selected(kind: EntryKind<'_>, usernames: &[String]) -> bool {
    match kind {
        EntryKind::User(user) => usernames.is_empty() || usernames.iter().any(|u| u == user),
        _ => true,
    }
}
