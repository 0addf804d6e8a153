//! Fuzz target for Git pack file parsing.
//!
//! Tests that the pack parser handles arbitrary input without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pressgit_git::PackParser;
use pressgit_storage::ObjectStore;

fuzz_target!(|data: &[u8]| {
    let parser = PackParser::new(data);
    let _ = parser.object_count();

    // Fresh store per iteration so ref-delta bases never leak between inputs
    let store = ObjectStore::in_memory();
    let _ = PackParser::new(data).with_base_store(&store).decode_into(&store);
});
