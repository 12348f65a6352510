//! Git pack file format implementation.
//!
//! Pack files are the format used by git for efficient object transfer.
//! See: https://git-scm.com/docs/pack-format

mod decoder;
mod diff;
mod encoder;
mod selector;

pub use decoder::{decode_from_reader, DecodeSummary, Decoder};
pub use diff::diff_delta;
pub use encoder::{encode_objects, Encoder, PackBuilder};
pub use grit_storage::pack::{delta_header_sizes, format, patch_delta, PackObjectType};
pub use selector::{DeltaSelector, ObjectToPack};

use grit_storage::CompressionLevel;
use serde::{Deserialize, Serialize};

/// Default ceiling on objects accepted from a single pack.
pub const DEFAULT_MAX_OBJECTS: u32 = 1 << 20;

/// Default number of preceding candidates each object is diffed against.
pub const DEFAULT_DELTA_WINDOW: usize = 10;

/// Default longest chain of deltas the selector builds.
pub const DEFAULT_MAX_DELTA_DEPTH: usize = 50;

/// Pack encoding and decoding knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackConfig {
    /// Packs declaring more objects than this are refused.
    pub max_objects: u32,
    /// Candidates considered per object; 0 disables delta selection.
    pub delta_window: usize,
    /// Longest delta chain the selector builds.
    pub max_delta_depth: usize,
    /// Write REF deltas instead of OFS deltas.
    pub use_ref_deltas: bool,
    /// zlib level for pack entries.
    pub compression: CompressionLevel,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            max_objects: DEFAULT_MAX_OBJECTS,
            delta_window: DEFAULT_DELTA_WINDOW,
            max_delta_depth: DEFAULT_MAX_DELTA_DEPTH,
            use_ref_deltas: false,
            compression: CompressionLevel::default(),
        }
    }
}
