//! Scheme to transport lookup.

use crate::file::FileTransport;
use crate::http::HttpTransport;
use crate::ssh::{SshCommander, SshTransport};
use crate::{Endpoint, Result, Transport, TransportConfig, TransportError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// The transports available to the fetch and push drivers, keyed by URL
/// scheme. Callers build one and pass it in; there is no global registry.
#[derive(Clone)]
pub struct Registry {
    transports: HashMap<String, Arc<dyn Transport>>,
    config: TransportConfig,
}

impl Registry {
    /// A registry with no transports installed.
    pub fn new(config: TransportConfig) -> Self {
        Self {
            transports: HashMap::new(),
            config,
        }
    }

    /// A registry with `http`, `https`, `ssh` and `file` installed.
    pub fn with_defaults(config: TransportConfig) -> Result<Self> {
        let mut registry = Self::new(config);
        let http: Arc<dyn Transport> = Arc::new(HttpTransport::new(&registry.config)?);
        registry.install("http", http.clone());
        registry.install("https", http);
        registry.install("ssh", Arc::new(SshTransport::new(SshCommander::new(&registry.config))));
        registry.install("file", Arc::new(FileTransport::new(registry.config.pack.clone())));
        Ok(registry)
    }

    /// Installs or replaces the transport for `scheme`.
    pub fn install(&mut self, scheme: impl Into<String>, transport: Arc<dyn Transport>) {
        let scheme = scheme.into();
        debug!(%scheme, "transport installed");
        self.transports.insert(scheme, transport);
    }

    /// Removes the transport for `scheme`.
    pub fn remove(&mut self, scheme: &str) -> Option<Arc<dyn Transport>> {
        self.transports.remove(scheme)
    }

    /// Returns the transport for `scheme`.
    pub fn get(&self, scheme: &str) -> Option<Arc<dyn Transport>> {
        self.transports.get(scheme).cloned()
    }

    /// Shared transport settings.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Returns the transport for the endpoint's protocol.
    pub fn transport_for(&self, endpoint: &Endpoint) -> Result<Arc<dyn Transport>> {
        self.get(&endpoint.protocol)
            .ok_or_else(|| TransportError::UnsupportedScheme(endpoint.protocol.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let registry = Registry::with_defaults(TransportConfig::default()).unwrap();
        for scheme in ["http", "https", "ssh", "file"] {
            assert!(registry.get(scheme).is_some(), "{scheme}");
        }
        let endpoint = Endpoint::parse("git://example.com/repo").unwrap();
        assert!(matches!(
            registry.transport_for(&endpoint),
            Err(TransportError::UnsupportedScheme(s)) if s == "git"
        ));
    }

    #[test]
    fn test_install_and_remove() {
        let mut registry = Registry::new(TransportConfig::default());
        let local = Endpoint::local("/tmp/repo");
        assert!(registry.transport_for(&local).is_err());

        registry.install("file", Arc::new(FileTransport::new(Default::default())));
        assert!(registry.transport_for(&local).is_ok());
        assert!(registry.remove("file").is_some());
        assert!(registry.get("file").is_none());
    }
}
