//! Fuzz target for the protocol messages a server or client reads from its
//! peer: advertisements, upload requests, update requests and reports.

#![no_main]

use grit_git::{AdvRefs, PktLineReader, ReferenceUpdateRequest, ReportStatus, UploadPackRequest};
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let _ = AdvRefs::decode(&mut PktLineReader::new(Cursor::new(data)));
    let _ = UploadPackRequest::decode(Cursor::new(data));
    let _ = ReferenceUpdateRequest::decode(Cursor::new(data));
    let _ = ReportStatus::decode(&mut PktLineReader::new(Cursor::new(data)));
});
