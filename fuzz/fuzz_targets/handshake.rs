//! Fuzz target for transfer handshake parsing
//!
//! The parser should never panic, only return Ok or Err.

#![no_main]

use lanshare_core::protocol::{Handshake, MAX_FILE_NAME_LEN};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(handshake) = Handshake::decode_body(data) else {
        return;
    };
    // Names within the limit survive re-encoding unchanged
    let again = Handshake::decode_body(&handshake.encode_body())
        .expect("re-encoded handshake must parse");
    if handshake.file_name.len() <= MAX_FILE_NAME_LEN {
        assert_eq!(again, handshake);
    }
});
