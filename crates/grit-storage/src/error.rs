//! Storage error types.

use crate::ObjectId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested object is not in the store.
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// The requested reference is not in the store.
    #[error("reference not found: {0}")]
    ReferenceNotFound(String),

    /// Object bytes or identifiers could not be parsed.
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// Reference name or content is not valid.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// Symbolic reference resolution looped or went too deep.
    #[error("reference cycle detected while resolving {0}")]
    ReferenceCycle(String),

    /// A corruption was detected.
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// No repository exists at the given path.
    #[error("repository not found: {}", .0.display())]
    RepositoryNotFound(PathBuf),

    /// A repository already exists at the given path.
    #[error("repository already exists: {}", .0.display())]
    RepositoryExists(PathBuf),

    /// A pack or pack index on disk could not be read.
    #[error(transparent)]
    Pack(#[from] PackError),
}

impl StorageError {
    /// Returns true for the "not found" variants.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ObjectNotFound(_) | Self::ReferenceNotFound(_) | Self::RepositoryNotFound(_)
        )
    }
}

/// Errors raised while decoding or encoding pack files.
#[derive(Debug, Error)]
pub enum PackError {
    /// The stream ended before the pack header.
    #[error("empty packfile")]
    EmptyPackfile,

    /// Bad signature or truncated structure.
    #[error("malformed pack file: {0}")]
    MalformedPackfile(String),

    /// Pack version other than 2.
    #[error("unsupported packfile version: {0}")]
    UnsupportedVersion(u32),

    /// The header declares more objects than allowed.
    #[error("max. objects limit reached: pack declares {count}, limit is {max}")]
    MaxObjectsLimitReached {
        /// Declared object count.
        count: u32,
        /// Configured ceiling.
        max: u32,
    },

    /// An entry has an unknown type code.
    #[error("invalid git object type {code} at offset {offset}")]
    InvalidObject {
        /// Entry start offset.
        offset: u64,
        /// The 3-bit type code.
        code: u8,
    },

    /// The zlib stream of an entry is corrupt.
    #[error("zlib reading error in object {index} at offset {offset}: {message}")]
    ZLib {
        /// Entry start offset.
        offset: u64,
        /// Entry index within the pack.
        index: u32,
        /// Underlying error text.
        message: String,
    },

    /// Inflated entry size disagrees with its header.
    #[error("object at offset {offset} declares {expected} bytes but inflates to {actual}")]
    SizeMismatch {
        /// Entry start offset.
        offset: u64,
        /// Size from the entry header.
        expected: u64,
        /// Inflated size.
        actual: u64,
    },

    /// A delta base could not be found.
    #[error("pack entry not found: {0}")]
    PackEntryNotFound(String),

    /// A delta could not be applied.
    #[error("invalid delta: {0}")]
    InvalidDelta(String),

    /// The trailing checksum does not match the content.
    #[error("pack checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        /// Checksum stored in the pack.
        expected: ObjectId,
        /// Checksum of the bytes read.
        actual: ObjectId,
    },
}
