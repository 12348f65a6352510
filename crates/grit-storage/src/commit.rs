//! Decoded commit objects.

use crate::{GitObject, ObjectId, ObjectType, Result, Signature, StorageError};

/// A commit: a snapshot (tree) plus its history and metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Root tree of the snapshot.
    pub tree: ObjectId,
    /// Parent commits, in order.
    pub parents: Vec<ObjectId>,
    /// Who wrote the change.
    pub author: Signature,
    /// Who recorded the change.
    pub committer: Signature,
    /// Headers such as `gpgsig`, `encoding` or `mergetag`, in order.
    /// Multi-line values are stored with `\n` separators.
    pub extra_headers: Vec<(String, String)>,
    /// Free-form message, including its trailing newline if any.
    pub message: String,
}

impl Commit {
    /// Decodes a commit from its encoded object.
    pub fn decode(object: &GitObject) -> Result<Self> {
        if object.object_type != ObjectType::Commit {
            return Err(StorageError::InvalidObject(format!(
                "expected commit, got {}",
                object.object_type
            )));
        }
        let text = std::str::from_utf8(&object.data)
            .map_err(|_| StorageError::InvalidObject(format!("commit {} is not UTF-8", object.id)))?;

        let (headers, message) = match text.find("\n\n") {
            Some(i) => (&text[..i], &text[i + 2..]),
            None => (text.trim_end_matches('\n'), ""),
        };

        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;
        let mut extra_headers: Vec<(String, String)> = Vec::new();

        for line in headers.split('\n') {
            if let Some(continuation) = line.strip_prefix(' ') {
                let (_, value) = extra_headers.last_mut().ok_or_else(|| {
                    StorageError::InvalidObject("continuation line without header".to_string())
                })?;
                value.push('\n');
                value.push_str(continuation);
                continue;
            }
            let (key, value) = line.split_once(' ').unwrap_or((line, ""));
            match key {
                "tree" => tree = Some(ObjectId::from_hex(value)?),
                "parent" => parents.push(ObjectId::from_hex(value)?),
                "author" => author = Some(Signature::decode(value)?),
                "committer" => committer = Some(Signature::decode(value)?),
                _ => extra_headers.push((key.to_string(), value.to_string())),
            }
        }

        let missing = |field: &str| {
            StorageError::InvalidObject(format!("commit {} has no {} header", object.id, field))
        };

        Ok(Self {
            tree: tree.ok_or_else(|| missing("tree"))?,
            parents,
            author: author.ok_or_else(|| missing("author"))?,
            committer: committer.ok_or_else(|| missing("committer"))?,
            extra_headers,
            message: message.to_string(),
        })
    }

    /// Encodes the commit into a git object.
    pub fn encode(&self) -> GitObject {
        let mut content = format!("tree {}\n", self.tree);
        for parent in &self.parents {
            content.push_str(&format!("parent {}\n", parent));
        }
        content.push_str(&format!("author {}\n", self.author));
        content.push_str(&format!("committer {}\n", self.committer));
        for (key, value) in &self.extra_headers {
            content.push_str(&format!("{} {}\n", key, value.replace('\n', "\n ")));
        }
        content.push('\n');
        content.push_str(&self.message);
        GitObject::new(ObjectType::Commit, content.into_bytes())
    }

    /// Returns true for merge commits.
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Time;

    fn signature(name: &str) -> Signature {
        Signature::new(name, format!("{}@example.com", name.to_lowercase()), Time::new(1234567890, 0))
    }

    #[test]
    fn test_commit_roundtrip() {
        let commit = Commit {
            tree: ObjectId::from_bytes([1u8; 20]),
            parents: vec![ObjectId::from_bytes([2u8; 20]), ObjectId::from_bytes([3u8; 20])],
            author: signature("Alice"),
            committer: signature("Bob"),
            extra_headers: vec![],
            message: "Merge commit\n".to_string(),
        };

        let object = commit.encode();
        assert_eq!(object.object_type, ObjectType::Commit);
        let text = String::from_utf8_lossy(&object.data);
        assert!(text.starts_with(&format!("tree {}\nparent ", commit.tree)));
        assert!(text.contains("author Alice <alice@example.com> 1234567890 +0000\n"));

        let decoded = Commit::decode(&object).unwrap();
        assert_eq!(decoded, commit);
        assert!(decoded.is_merge());
        assert_eq!(decoded.encode().id, object.id);
    }

    #[test]
    fn test_commit_known_hash() {
        let data = "tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\n\
                    author A U Thor <author@example.com> 1112912053 -0700\n\
                    committer C O Mitter <committer@example.com> 1112912053 -0700\n\
                    \n\
                    initial\n";
        let object = GitObject::new(ObjectType::Commit, data.as_bytes().to_vec());
        let commit = Commit::decode(&object).unwrap();
        assert!(commit.parents.is_empty());
        assert_eq!(commit.message, "initial\n");
        assert_eq!(commit.encode().data, object.data);
    }

    #[test]
    fn test_commit_multiline_header_roundtrip() {
        let data = "tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\n\
                    author A <a@example.com> 1 +0000\n\
                    committer A <a@example.com> 1 +0000\n\
                    gpgsig -----BEGIN PGP SIGNATURE-----\n \n abcdef\n -----END PGP SIGNATURE-----\n\
                    \n\
                    signed\n";
        let object = GitObject::new(ObjectType::Commit, data.as_bytes().to_vec());
        let commit = Commit::decode(&object).unwrap();
        assert_eq!(commit.extra_headers.len(), 1);
        assert_eq!(commit.extra_headers[0].0, "gpgsig");
        assert!(commit.extra_headers[0].1.contains("\nabcdef\n"));
        assert_eq!(commit.encode().id, object.id);
    }

    #[test]
    fn test_commit_missing_tree() {
        let object = GitObject::new(
            ObjectType::Commit,
            b"author A <a@example.com> 1 +0000\ncommitter A <a@example.com> 1 +0000\n\nmsg".to_vec(),
        );
        assert!(Commit::decode(&object).is_err());
    }

    #[test]
    fn test_commit_wrong_type() {
        assert!(Commit::decode(&GitObject::blob(b"tree x".to_vec())).is_err());
    }
}
