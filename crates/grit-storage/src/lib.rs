//! Git object storage for grit.
//!
//! This crate provides the git data model (content-addressed blobs, trees,
//! commits and tags), references, and the [`Storer`] traits with in-memory and
//! on-disk backends.

mod commit;
pub mod compression;
mod error;
mod filesystem;
mod hash;
mod object;
pub mod pack;
mod refs;
mod signature;
mod store;
mod tag;
mod traits;
mod tree;

pub use commit::Commit;
pub use compression::CompressionLevel;
pub use error::{PackError, StorageError};
pub use filesystem::FilesystemStorage;
pub use hash::{ObjectId, HEX_LEN, ID_LEN};
pub use object::{GitObject, ObjectType};
pub use refs::{
    resolve_reference, validate_reference_name, RefStore, Reference, BRANCH_PREFIX, HEAD,
    MAX_RESOLVE_DEPTH, REMOTE_PREFIX, SYMREF_PREFIX, TAG_PREFIX,
};
pub use signature::{Signature, Time};
pub use store::{decode_loose, encode_loose, MemoryStorage, ObjectStore};
pub use tag::Tag;
pub use traits::{ObjectStorer, ReferenceStorer, Storer};
pub use tree::{FileMode, Tree, TreeEntry};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
