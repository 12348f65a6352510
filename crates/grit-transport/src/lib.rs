//! Client transports for grit.
//!
//! Endpoints name a remote, a [`Registry`] picks the [`Transport`] for its
//! scheme, and the transport opens fetch or push sessions. The [`fetch`] and
//! [`push`] drivers run whole exchanges against a local [`Storer`].
//!
//! [`Storer`]: grit_storage::Storer

mod auth;
mod client;
pub mod command;
mod config;
mod endpoint;
mod error;
pub mod file;
pub mod http;
mod refspec;
mod registry;
pub mod ssh;
mod transport;

pub use auth::AuthMethod;
pub use client::{fetch, push, FetchOptions, FetchOutcome, PushOutcome};
pub use command::{CommandTransport, Commander, RemoteCommand};
pub use config::TransportConfig;
pub use endpoint::Endpoint;
pub use error::TransportError;
pub use file::FileTransport;
pub use http::HttpTransport;
pub use refspec::RefSpec;
pub use registry::Registry;
pub use ssh::{SshCommander, SshTransport};
pub use transport::{ReceivePackSession, Transport, UploadPackSession};

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
