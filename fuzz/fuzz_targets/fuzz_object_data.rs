//! Fuzz target for loose object and object content decoding.
//!
//! Tests that headers, trees and commits decode arbitrary input without
//! panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pressgit_storage::{parse_header, GitObject, ObjectType};

fuzz_target!(|data: &[u8]| {
    let _ = parse_header(data);

    for object_type in [ObjectType::Blob, ObjectType::Tree, ObjectType::Commit] {
        if let Ok(object) = GitObject::decode(object_type, data) {
            // Whatever decodes must re-encode
            let _ = object.to_raw();
        }
    }
});
