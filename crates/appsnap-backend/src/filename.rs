//! Snapshot archive filenames.
//!
//! Archives are named `<set-id>_<snap>_<version>_<revision>.zip`. Scanning
//! only needs the set ID, so [`quick_decode`] checks the shape and parses the
//! leading number without opening the file.

use crate::metadata::Snapshot;
use appsnap_common::{Revision, SetId};
use std::path::{Path, PathBuf};

const EXTENSION: &str = ".zip";

/// Build the archive filename for a snapshot.
pub fn encode(set_id: SetId, snap: &str, version: &str, revision: Revision) -> String {
    format!("{}_{}_{}_{}{}", set_id, snap, version, revision, EXTENSION)
}

/// Extract the set ID from an archive filename, or `None` if the name is not
/// one [`encode`] could have produced.
pub fn quick_decode(name: &str) -> Option<SetId> {
    let stem = name.strip_suffix(EXTENSION)?;
    let (id, rest) = stem.split_once('_')?;
    if rest.is_empty() {
        return None;
    }
    let first = id.bytes().next()?;
    if !(b'1'..=b'9').contains(&first) || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    id.parse::<u64>().ok().map(SetId)
}

/// Full path of the archive for `snapshot` inside `dir`.
pub fn filename(dir: &Path, snapshot: &Snapshot) -> PathBuf {
    dir.join(snapshot.filename())
}
