//! Pack files at rest.
//!
//! The entry encodings and delta patching here are shared with the wire
//! codec in grit-git. [`PackFile`] reads a `.pack` through its version 2
//! `.idx`, which is how git keeps most objects in `objects/pack`.
//! See: https://git-scm.com/docs/pack-format

mod delta;
mod file;
pub mod format;
mod index;

pub use crate::PackError;
pub use delta::{delta_header_sizes, patch_delta};
pub use file::PackFile;
pub use format::PackObjectType;
pub use index::PackIndex;
