//! Fuzz target for snapshot archive opening and checking.
//!
//! Archives may be copied in from other machines, so opening and hashing one
//! must only ever fail with an error.

#![no_main]

use appsnap_backend::{Reader, SetIdSource};
use appsnap_common::CancelToken;
use libfuzzer_sys::fuzz_target;
use std::io::Write;

fuzz_target!(|data: &[u8]| {
    let Ok(mut file) = tempfile::NamedTempFile::new() else {
        return;
    };
    if file.write_all(data).is_err() {
        return;
    }

    match Reader::open(file.path(), SetIdSource::Metadata) {
        Ok(reader) => {
            let _ = reader.check(&CancelToken::new(), &[]);
            let _ = reader.close();
        }
        Err(err) => {
            // A broken reader must carry its reason.
            if let Some(reader) = err.reader {
                assert!(reader.is_broken());
            }
        }
    }
});
