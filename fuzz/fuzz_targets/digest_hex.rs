//! Fuzz target for hex digest parsing

#![no_main]

use lanshare_files::Digest;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Some(digest) = Digest::from_hex(s) {
            assert_eq!(digest.to_hex(), s.to_ascii_lowercase());
        }
    }
});
