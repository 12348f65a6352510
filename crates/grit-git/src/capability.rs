//! Protocol capabilities.
//!
//! Capabilities are advertised by the server after the first ref and echoed
//! back by the client on its first request line. Each one may carry
//! `key=value` arguments; which ones need or accept arguments is fixed here.

use crate::{GitError, Result};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Agent string this crate advertises.
pub const DEFAULT_AGENT: &str = concat!("grit/", env!("CARGO_PKG_VERSION"));

/// A known protocol capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Multi-ack negotiation.
    MultiAck,
    /// Multi-ack with detailed status.
    MultiAckDetailed,
    /// Server may send the pack before the client's "done".
    NoDone,
    /// Pack may reference objects not included in it.
    ThinPack,
    /// 1000-byte sideband framing.
    Sideband,
    /// 65520-byte sideband framing.
    Sideband64k,
    /// Offset deltas understood.
    OfsDelta,
    /// Implementation identifier.
    Agent,
    /// Shallow clones supported.
    Shallow,
    /// Deepen by date.
    DeepenSince,
    /// Deepen excluding a ref.
    DeepenNot,
    /// Deepen relative to current shallow boundary.
    DeepenRelative,
    /// Suppress progress on channel 2.
    NoProgress,
    /// Send tags pointing at fetched objects.
    IncludeTag,
    /// Receive-pack reports per-ref status.
    ReportStatus,
    /// Receive-pack accepts zero-id new values.
    DeleteRefs,
    /// Receive-pack suppresses output.
    Quiet,
    /// All-or-nothing ref updates.
    Atomic,
    /// Push options follow the commands.
    PushOptions,
    /// Want may name any advertised tip.
    AllowTipSha1InWant,
    /// Want may name any reachable object.
    AllowReachableSha1InWant,
    /// Signed pushes, with nonce.
    PushCert,
    /// Symbolic ref target, `NAME:TARGET`.
    SymRef,
    /// Hash algorithm of the repository.
    ObjectFormat,
}

impl Capability {
    /// Every registered capability.
    pub const ALL: [Capability; 24] = [
        Self::MultiAck,
        Self::MultiAckDetailed,
        Self::NoDone,
        Self::ThinPack,
        Self::Sideband,
        Self::Sideband64k,
        Self::OfsDelta,
        Self::Agent,
        Self::Shallow,
        Self::DeepenSince,
        Self::DeepenNot,
        Self::DeepenRelative,
        Self::NoProgress,
        Self::IncludeTag,
        Self::ReportStatus,
        Self::DeleteRefs,
        Self::Quiet,
        Self::Atomic,
        Self::PushOptions,
        Self::AllowTipSha1InWant,
        Self::AllowReachableSha1InWant,
        Self::PushCert,
        Self::SymRef,
        Self::ObjectFormat,
    ];

    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MultiAck => "multi_ack",
            Self::MultiAckDetailed => "multi_ack_detailed",
            Self::NoDone => "no-done",
            Self::ThinPack => "thin-pack",
            Self::Sideband => "side-band",
            Self::Sideband64k => "side-band-64k",
            Self::OfsDelta => "ofs-delta",
            Self::Agent => "agent",
            Self::Shallow => "shallow",
            Self::DeepenSince => "deepen-since",
            Self::DeepenNot => "deepen-not",
            Self::DeepenRelative => "deepen-relative",
            Self::NoProgress => "no-progress",
            Self::IncludeTag => "include-tag",
            Self::ReportStatus => "report-status",
            Self::DeleteRefs => "delete-refs",
            Self::Quiet => "quiet",
            Self::Atomic => "atomic",
            Self::PushOptions => "push-options",
            Self::AllowTipSha1InWant => "allow-tip-sha1-in-want",
            Self::AllowReachableSha1InWant => "allow-reachable-sha1-in-want",
            Self::PushCert => "push-cert",
            Self::SymRef => "symref",
            Self::ObjectFormat => "object-format",
        }
    }

    /// Whether the capability must carry a value.
    pub fn requires_argument(&self) -> bool {
        matches!(
            self,
            Self::Agent | Self::PushCert | Self::SymRef | Self::ObjectFormat
        )
    }

    /// Whether the capability may carry more than one value.
    pub fn allows_multiple(&self) -> bool {
        matches!(self, Self::SymRef)
    }
}

impl FromStr for Capability {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| GitError::UnknownCapability(s.to_string()))
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated set of capabilities and their values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityList {
    /// Entries in insertion order; values in insertion order per entry.
    entries: Vec<(Capability, Vec<String>)>,
}

impl CapabilityList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a space-separated `key` / `key=value` list, rejecting anything
    /// that is not registered or breaks argument rules.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let mut list = Self::new();
        for token in raw.split(|&b| b == b' ').filter(|t| !t.is_empty()) {
            let token = String::from_utf8_lossy(token);
            let (name, value) = match token.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (token.as_ref(), None),
            };
            let capability: Capability = name.parse()?;
            list.add(capability, value.into_iter().map(str::to_string).collect())?;
        }
        Ok(list)
    }

    /// Like [`decode`](Self::decode), but skips tokens that fail validation.
    /// Used for advertisements from servers that know capabilities we don't.
    pub fn decode_lenient(raw: &[u8]) -> Self {
        let mut list = Self::new();
        for token in raw.split(|&b| b == b' ').filter(|t| !t.is_empty()) {
            let token = String::from_utf8_lossy(token);
            let (name, value) = match token.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (token.as_ref(), None),
            };
            let added = name
                .parse::<Capability>()
                .and_then(|c| list.add(c, value.into_iter().map(str::to_string).collect()));
            if let Err(e) = added {
                debug!(token = %token, error = %e, "ignoring advertised capability");
            }
        }
        list
    }

    /// Returns true if no capability is present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the values of a capability, or `None` if absent.
    pub fn get(&self, capability: Capability) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(c, _)| *c == capability)
            .map(|(_, values)| values.as_slice())
    }

    /// Returns true if the capability is present.
    pub fn supports(&self, capability: Capability) -> bool {
        self.entries.iter().any(|(c, _)| *c == capability)
    }

    /// Iterates over present capabilities in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.entries.iter().map(|(c, _)| *c)
    }

    /// Adds a capability, appending values to any already present.
    pub fn add(&mut self, capability: Capability, values: Vec<String>) -> Result<()> {
        Self::validate(capability, &values)?;

        let index = match self.entries.iter().position(|(c, _)| *c == capability) {
            Some(index) => index,
            None => {
                self.entries.push((capability, Vec::new()));
                self.entries.len() - 1
            }
        };

        let existing = &mut self.entries[index].1;
        if !values.is_empty() && !capability.allows_multiple() && !existing.is_empty() {
            return Err(GitError::MultipleArguments(capability.to_string()));
        }
        existing.extend(values);
        Ok(())
    }

    /// Adds a capability with no value.
    pub fn add_flag(&mut self, capability: Capability) -> Result<()> {
        self.add(capability, Vec::new())
    }

    /// Replaces a capability's values.
    pub fn set(&mut self, capability: Capability, values: Vec<String>) -> Result<()> {
        Self::validate(capability, &values)?;
        self.delete(capability);
        self.add(capability, values)
    }

    /// Removes a capability.
    pub fn delete(&mut self, capability: Capability) {
        self.entries.retain(|(c, _)| *c != capability);
    }

    fn validate(capability: Capability, values: &[String]) -> Result<()> {
        if capability.requires_argument() && values.is_empty() {
            return Err(GitError::ArgumentsRequired(capability.to_string()));
        }
        if !capability.requires_argument() && !values.is_empty() {
            return Err(GitError::ArgumentsNotAllowed(capability.to_string()));
        }
        if !capability.allows_multiple() && values.len() > 1 {
            return Err(GitError::MultipleArguments(capability.to_string()));
        }
        if values.iter().any(String::is_empty) {
            return Err(GitError::EmptyArgument(capability.to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for CapabilityList {
    /// Renders names in sorted order, one `key=value` per value.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<&(Capability, Vec<String>)> = self.entries.iter().collect();
        entries.sort_by_key(|(c, _)| c.as_str());

        let mut tokens = Vec::new();
        for (capability, values) in entries {
            if values.is_empty() {
                tokens.push(capability.as_str().to_string());
            }
            for value in values {
                tokens.push(format!("{}={}", capability, value));
            }
        }
        f.write_str(&tokens.join(" "))
    }
}
