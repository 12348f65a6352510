//! Fuzz target for pkt-line framing.
//!
//! Tests that the pkt-line reader handles arbitrary input without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let mut reader = grit_git::PktLineReader::new(Cursor::new(data));

    // Bounded so crafted input can't loop forever
    for _ in 0..100 {
        match reader.read() {
            Ok(Some(line)) => {
                // Whatever was read must frame again
                let _ = line.encode();
            }
            Ok(None) | Err(_) => break,
        }
    }
});
