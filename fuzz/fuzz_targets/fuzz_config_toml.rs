//! Fuzz target for appsnap.toml parsing.
//!
//! Tests that configuration parsing and validation handle arbitrary input
//! without panicking.

#![no_main]

use appsnap_config::BackendConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(config) = BackendConfig::from_toml_str(text) {
        // Anything accepted must describe a usable layout.
        assert!(config.layout().root().is_absolute());
    }
});
