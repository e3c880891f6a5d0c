//! Fuzz target for export stream import.
//!
//! A rejected stream must leave the snapshot directory empty.

#![no_main]

use appsnap_backend::Backend;
use appsnap_common::{CancelToken, SetId};
use appsnap_config::DataLayout;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(root) = tempfile::TempDir::new() else {
        return;
    };
    let backend = Backend::new(DataLayout::new(root.path()));

    if backend.import(&CancelToken::new(), SetId(1), data).is_err() {
        let dir = backend.layout().snapshots_dir();
        let left = std::fs::read_dir(dir).map(|rd| rd.count()).unwrap_or(0);
        assert_eq!(left, 0, "failed import left files in {}", dir.display());
    }
});
