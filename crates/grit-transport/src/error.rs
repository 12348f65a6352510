//! Transport error types.

use thiserror::Error;

/// Errors that can occur while talking to a remote.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The remote has no repository at the endpoint path.
    #[error("repository not found")]
    RepositoryNotFound,

    /// The remote repository has no references to fetch.
    #[error("remote repository is empty")]
    EmptyRemoteRepository,

    /// The remote asked for credentials.
    #[error("authentication required")]
    AuthenticationRequired,

    /// The remote rejected the credentials.
    #[error("authorization failed")]
    AuthorizationFailed,

    /// The auth method cannot be used with this transport.
    #[error("invalid auth method: {0}")]
    InvalidAuthMethod(String),

    /// `advertised_references` was called twice on one session.
    #[error("advertised references already called")]
    AdvertisedReferencesAlreadyCalled,

    /// Nothing to ask the remote for.
    #[error("empty git-upload-pack given")]
    EmptyUploadPackRequest,

    /// No transport is installed for the scheme.
    #[error("unsupported scheme {0:?}")]
    UnsupportedScheme(String),

    /// The endpoint string could not be parsed.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// An HTTP request got a status with no specific meaning.
    #[error("unexpected requesting {url:?} status code: {status}")]
    UnexpectedStatus {
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// A remote command failed to start or exited with an error.
    #[error("remote command failed: {0}")]
    Command(String),

    /// A refspec could not be parsed or resolved.
    #[error("invalid refspec: {0}")]
    InvalidRefSpec(String),

    /// The update would lose commits on the remote.
    #[error("non-fast-forward update to {0}")]
    NonFastForward(String),

    /// Protocol error.
    #[error(transparent)]
    Git(#[from] grit_git::GitError),

    /// Storage error.
    #[error(transparent)]
    Storage(#[from] grit_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
