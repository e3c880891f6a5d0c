//! Fuzz target for the archive filename codec.
//!
//! Decoding arbitrary names must not panic, and every encoded name with a
//! positive set ID must decode back to it.

#![no_main]

use appsnap_backend::filename::{encode, quick_decode};
use appsnap_common::{Revision, SetId};
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    raw: &'a str,
    set_id: u64,
    snap: &'a str,
    version: &'a str,
    revision: i64,
}

fuzz_target!(|input: Input<'_>| {
    if let Some(id) = quick_decode(input.raw) {
        assert!(input.raw.starts_with(&id.to_string()));
    }

    if input.set_id > 0 {
        let name = encode(
            SetId(input.set_id),
            input.snap,
            input.version,
            Revision(input.revision),
        );
        assert_eq!(quick_decode(&name), Some(SetId(input.set_id)), "{name}");
    }
});
