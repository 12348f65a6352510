//! Fuzz target for pack file decoding.
//!
//! Tests that the decoder rejects arbitrary input without panicking.

#![no_main]

use grit_storage::MemoryStorage;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let storage = MemoryStorage::new();
    let _ = grit_git::Decoder::new(data)
        .with_max_objects(1024)
        .decode(&storage);
});
