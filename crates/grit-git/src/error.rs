//! Git protocol error types.

pub use grit_storage::PackError;
use thiserror::Error;

/// Errors that can occur during git protocol operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// A pkt-line length header is not valid.
    #[error("invalid pkt-len found: {0}")]
    InvalidPktLen(String),

    /// A pkt-line payload exceeds the maximum size.
    #[error("payload is too long: {0} bytes")]
    PayloadTooLong(usize),

    /// Capability name not in the registry.
    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    /// Capability requires an argument but none was given.
    #[error("arguments required for capability {0}")]
    ArgumentsRequired(String),

    /// Capability does not take arguments.
    #[error("arguments not allowed for capability {0}")]
    ArgumentsNotAllowed(String),

    /// Capability argument is an empty string.
    #[error("empty argument for capability {0}")]
    EmptyArgument(String),

    /// Capability only takes one argument.
    #[error("multiple arguments not allowed for capability {0}")]
    MultipleArguments(String),

    /// Pack file error.
    #[error(transparent)]
    Pack(#[from] PackError),

    /// The advertised-refs stream had no content at all.
    #[error("empty advertised-ref message")]
    EmptyAdvRefs,

    /// An advertised-refs line could not be parsed.
    #[error("pkt-line {line}: {reason}")]
    MalformedAdvRefs {
        /// 1-based pkt-line number.
        line: usize,
        /// What was wrong.
        reason: String,
    },

    /// The request stream was empty.
    #[error("empty request")]
    EmptyRequest,

    /// An upload or update request could not be parsed.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// A report-status message could not be parsed.
    #[error("malformed report status: {0}")]
    MalformedReportStatus(String),

    /// A request is well-formed but not acceptable.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The peer asked for a capability that was not advertised.
    #[error("unsupported capability: {0}")]
    UnsupportedCapability(String),

    /// The session was used out of order.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The remote sent a message on the error sideband channel.
    #[error("remote error: {0}")]
    Remote(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] grit_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
