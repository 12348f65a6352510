//! Transport configuration.

use grit_git::{PackConfig, DEFAULT_AGENT};
use serde::{Deserialize, Serialize};

/// Settings shared by every transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// `User-Agent` header for HTTP requests.
    pub user_agent: String,
    /// Timeout for each HTTP request.
    pub http_timeout_secs: u64,
    /// Program used to reach ssh remotes.
    pub ssh_command: String,
    /// Pack encoding and decoding limits.
    pub pack: PackConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_AGENT.to_string(),
            http_timeout_secs: 60,
            ssh_command: "ssh".to_string(),
            pack: PackConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: TransportConfig = serde_yaml::from_str(
            "http_timeout_secs: 5\npack:\n  delta_window: 0\n",
        )
        .unwrap();
        assert_eq!(config.http_timeout_secs, 5);
        assert_eq!(config.ssh_command, "ssh");
        assert_eq!(config.pack.delta_window, 0);
        assert_eq!(config.pack.max_delta_depth, PackConfig::default().max_delta_depth);
    }

    #[test]
    fn test_empty_yaml() {
        let config: TransportConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, TransportConfig::default());
    }
}
