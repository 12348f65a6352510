//! Credentials handed to transports.

use std::fmt;
use std::path::PathBuf;

/// How to authenticate against a remote. Each transport accepts only the
/// kinds it can use.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// HTTP basic auth.
    BasicAuth {
        /// User name.
        username: String,
        /// Password or personal access token.
        password: String,
    },
    /// HTTP bearer token.
    TokenAuth {
        /// The token.
        token: String,
    },
    /// Keys from the running ssh agent.
    SshAgent {
        /// Remote user.
        user: String,
    },
    /// A private key file.
    SshKey {
        /// Remote user.
        user: String,
        /// Path to the private key.
        path: PathBuf,
    },
}

impl AuthMethod {
    /// Stable name of the method.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BasicAuth { .. } => "http-basic-auth",
            Self::TokenAuth { .. } => "http-token-auth",
            Self::SshAgent { .. } => "ssh-public-keys-callback",
            Self::SshKey { .. } => "ssh-public-keys",
        }
    }

    /// Returns true for the methods HTTP transports accept.
    pub fn is_http(&self) -> bool {
        matches!(self, Self::BasicAuth { .. } | Self::TokenAuth { .. })
    }

    /// Returns true for the methods SSH transports accept.
    pub fn is_ssh(&self) -> bool {
        matches!(self, Self::SshAgent { .. } | Self::SshKey { .. })
    }
}

/// Secrets are masked.
impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BasicAuth { username, password } => {
                let masked = if password.is_empty() { "<empty>" } else { "*******" };
                write!(f, "{} - {username}:{masked}", self.name())
            }
            Self::TokenAuth { .. } => write!(f, "{} - *******", self.name()),
            Self::SshAgent { user } => write!(f, "user: {user}, name: {}", self.name()),
            Self::SshKey { user, path } => {
                write!(f, "user: {user}, name: {}, key: {}", self.name(), path.display())
            }
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
