//! Git reference management.

use crate::{ObjectId, ReferenceStorer, Result, StorageError};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// The well-known name of the current-branch reference.
pub const HEAD: &str = "HEAD";

/// Prefix of branch references.
pub const BRANCH_PREFIX: &str = "refs/heads/";

/// Prefix of tag references.
pub const TAG_PREFIX: &str = "refs/tags/";

/// Prefix of remote-tracking references.
pub const REMOTE_PREFIX: &str = "refs/remotes/";

/// How many symbolic hops [`resolve_reference`] follows before giving up.
pub const MAX_RESOLVE_DEPTH: usize = 10;

/// Prefix of a symbolic reference in its on-disk form.
pub const SYMREF_PREFIX: &str = "ref: ";

/// A git reference target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// Direct reference to an object.
    Direct(ObjectId),
    /// Symbolic reference (e.g., HEAD -> refs/heads/main).
    Symbolic(String),
}

impl Reference {
    /// Returns the object ID if this is a direct reference.
    pub fn as_direct(&self) -> Option<ObjectId> {
        match self {
            Self::Direct(id) => Some(*id),
            Self::Symbolic(_) => None,
        }
    }

    /// Returns the target name if this is a symbolic reference.
    pub fn as_symbolic(&self) -> Option<&str> {
        match self {
            Self::Direct(_) => None,
            Self::Symbolic(target) => Some(target),
        }
    }

    /// Parses the loose-file form: `<hex>` or `ref: <name>`.
    pub fn parse(content: &str) -> Result<Self> {
        let content = content.trim_end();
        match content.strip_prefix(SYMREF_PREFIX) {
            Some(target) => Ok(Self::Symbolic(target.trim().to_string())),
            None => ObjectId::from_hex(content)
                .map(Self::Direct)
                .map_err(|_| StorageError::InvalidReference(format!("bad reference content: {content}"))),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(id) => write!(f, "{}", id),
            Self::Symbolic(target) => write!(f, "{}{}", SYMREF_PREFIX, target),
        }
    }
}

/// Follows symbolic references from `name` until a direct one is reached.
///
/// Fails with `ReferenceCycle` if a name repeats or the chain is longer than
/// [`MAX_RESOLVE_DEPTH`], and with `ReferenceNotFound` if a link is missing.
pub fn resolve_reference<S: ReferenceStorer + ?Sized>(storer: &S, name: &str) -> Result<ObjectId> {
    let mut seen = HashSet::new();
    let mut current = name.to_string();
    for _ in 0..=MAX_RESOLVE_DEPTH {
        if !seen.insert(current.clone()) {
            return Err(StorageError::ReferenceCycle(name.to_string()));
        }
        match storer.reference(&current)? {
            Reference::Direct(id) => return Ok(id),
            Reference::Symbolic(target) => current = target,
        }
    }
    Err(StorageError::ReferenceCycle(name.to_string()))
}

/// Checks a reference name against git's naming rules.
pub fn validate_reference_name(name: &str) -> Result<()> {
    let invalid = |why: &str| StorageError::InvalidReference(format!("{name}: {why}"));

    if name == HEAD {
        return Ok(());
    }
    if name.is_empty() {
        return Err(invalid("empty name"));
    }
    if !name.starts_with("refs/") {
        return Err(invalid("must start with refs/"));
    }
    if name.ends_with('/') || name.ends_with('.') || name.ends_with(".lock") {
        return Err(invalid("bad suffix"));
    }
    if name.contains("..") || name.contains("@{") || name.contains("//") {
        return Err(invalid("forbidden sequence"));
    }
    if name
        .chars()
        .any(|c| c.is_ascii_control() || matches!(c, ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\'))
    {
        return Err(invalid("forbidden character"));
    }
    if name.split('/').any(|part| part.starts_with('.')) {
        return Err(invalid("component starts with a dot"));
    }
    Ok(())
}

/// Thread-safe in-memory reference store.
#[derive(Debug, Default)]
pub struct RefStore {
    refs: RwLock<BTreeMap<String, Reference>>,
}

impl RefStore {
    /// Creates a new empty reference store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lists all references with a given prefix.
    pub fn list(&self, prefix: &str) -> Vec<(String, Reference)> {
        self.refs
            .read()
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, refr)| (name.clone(), refr.clone()))
            .collect()
    }

    /// Gets the current branch name (if HEAD is symbolic).
    pub fn current_branch(&self) -> Option<String> {
        match self.refs.read().get(HEAD)? {
            Reference::Symbolic(target) => target.strip_prefix(BRANCH_PREFIX).map(|s| s.to_string()),
            Reference::Direct(_) => None,
        }
    }
}

impl ReferenceStorer for RefStore {
    fn set_reference(&self, name: &str, reference: Reference) -> Result<()> {
        validate_reference_name(name)?;
        self.refs.write().insert(name.to_string(), reference);
        Ok(())
    }

    fn reference(&self, name: &str) -> Result<Reference> {
        self.refs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::ReferenceNotFound(name.to_string()))
    }

    fn remove_reference(&self, name: &str) -> Result<()> {
        self.refs.write().remove(name);
        Ok(())
    }

    fn list_references(&self) -> Result<Vec<(String, Reference)>> {
        Ok(self
            .refs
            .read()
            .iter()
            .map(|(name, refr)| (name.clone(), refr.clone()))
            .collect())
    }
}
