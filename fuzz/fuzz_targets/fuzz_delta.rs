//! Fuzz target for delta application.
//!
//! The first byte picks how much of the input is the base; the rest is the
//! delta instruction stream.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pressgit_git::{apply_delta, delta_sizes, encode_delta};

fuzz_target!(|data: &[u8]| {
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let split = (split as usize).min(rest.len());
    let (base, delta) = rest.split_at(split);

    let _ = delta_sizes(delta);
    if let Ok(result) = apply_delta(base, delta) {
        let roundtrip = encode_delta(base, &result);
        assert_eq!(apply_delta(base, &roundtrip).ok(), Some(result));
    }
});
