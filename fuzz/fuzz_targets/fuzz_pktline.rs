//! Fuzz target for pkt-line and side-band parsing.
//!
//! Tests that the pkt-line decoders handle arbitrary input without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pressgit_git::{collect_pack_data, decode_all, demultiplex_sideband, PktLineReader};
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let mut reader = PktLineReader::new(Cursor::new(data));

    // Bounded so crafted input cannot loop forever
    for _ in 0..100 {
        match reader.read() {
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => break,
        }
    }

    let _ = decode_all(data);
    let _ = collect_pack_data(demultiplex_sideband(data, 0), |_| {});
});
