//! Push refspecs: `[+]<src>[:<dst>]` and `:<dst>`.

use crate::{Result, TransportError};
use grit_storage::{
    resolve_reference, ObjectId, ReferenceStorer, BRANCH_PREFIX, HEAD, TAG_PREFIX,
};
use std::fmt;
use std::str::FromStr;

/// Maps a local reference onto a remote one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefSpec {
    /// Update even if it is not a fast-forward.
    pub force: bool,
    /// Local source; `None` deletes the destination.
    pub src: Option<String>,
    /// Remote reference to update.
    pub dst: String,
}

impl RefSpec {
    /// Parses a refspec. Short destinations become branches:
    /// `main` and `main:main` both push `refs/heads/main`.
    pub fn parse(spec: &str) -> Result<Self> {
        let invalid = || TransportError::InvalidRefSpec(spec.to_string());
        let (force, rest) = match spec.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, spec),
        };
        let (src, dst) = match rest.split_once(':') {
            Some((src, dst)) => (src, dst),
            None => (rest, rest),
        };
        if dst.is_empty() || dst.contains(':') || dst.contains('*') || src.contains('*') {
            return Err(invalid());
        }
        let src = (!src.is_empty()).then(|| src.to_string());
        if force && src.is_none() {
            return Err(invalid());
        }
        Ok(Self {
            force,
            src,
            dst: expand_destination(dst),
        })
    }

    /// Returns true for `:<dst>`.
    pub fn is_delete(&self) -> bool {
        self.src.is_none()
    }

    /// Resolves the source against local references, trying the name as
    /// given, then as a branch, then as a tag.
    pub fn resolve_source<S: ReferenceStorer + ?Sized>(&self, storer: &S) -> Result<Option<ObjectId>> {
        let Some(src) = &self.src else {
            return Ok(None);
        };
        let candidates = if src == HEAD || src.starts_with("refs/") {
            vec![src.clone()]
        } else {
            vec![
                format!("{BRANCH_PREFIX}{src}"),
                format!("{TAG_PREFIX}{src}"),
            ]
        };
        for name in &candidates {
            match resolve_reference(storer, name) {
                Ok(id) => return Ok(Some(id)),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(TransportError::InvalidRefSpec(format!(
            "src refspec {src} does not match any"
        )))
    }
}

fn expand_destination(dst: &str) -> String {
    if dst.starts_with("refs/") {
        dst.to_string()
    } else {
        format!("{BRANCH_PREFIX}{dst}")
    }
}

impl FromStr for RefSpec {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for RefSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.force {
            f.write_str("+")?;
        }
        if let Some(src) = &self.src {
            f.write_str(src)?;
        }
        write!(f, ":{}", self.dst)
    }
}
