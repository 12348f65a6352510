//! Git wire protocol implementation for grit.
//!
//! This crate implements pkt-line framing, capability negotiation, the pack
//! file format with delta compression, and both sides of the upload-pack and
//! receive-pack exchanges.

pub mod advrefs;
pub mod capability;
mod error;
pub mod pack;
pub mod pktline;
pub mod protocol;
pub mod report_status;
pub mod revlist;
pub mod server;
pub mod sideband;
pub mod update;
pub mod upload;

#[cfg(test)]
mod test_support;

pub use advrefs::AdvRefs;
pub use capability::{Capability, CapabilityList, DEFAULT_AGENT};
pub use error::{GitError, PackError};
pub use pack::{
    decode_from_reader, diff_delta, encode_objects, patch_delta, DecodeSummary, Decoder,
    DeltaSelector, Encoder, ObjectToPack, PackBuilder, PackConfig,
};
pub use pktline::{PktLine, PktLineReader, PktLineWriter};
pub use protocol::{advertise_refs, serve_receive_pack, serve_upload_pack, ServeOptions, Service};
pub use report_status::{CommandStatus, ReportStatus};
pub use server::{ReceivePackSession, UploadPackSession};
pub use sideband::{Channel, Demuxer, Muxer, SidebandKind};
pub use update::{Command, CommandAction, ReferenceUpdateRequest};
pub use upload::{Depth, UploadPackRequest, UploadPackResponse, UploadRequest};

/// Result type for git protocol operations.
pub type Result<T> = std::result::Result<T, GitError>;
