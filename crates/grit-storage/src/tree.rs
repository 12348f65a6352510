//! Decoded tree objects.

use crate::{GitObject, ObjectId, ObjectType, Result, StorageError};
use std::cmp::Ordering;
use std::fmt;

/// Unix-style mode of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileMode(u32);

impl FileMode {
    /// Subdirectory.
    pub const DIR: FileMode = FileMode(0o040000);
    /// Regular, non-executable file.
    pub const REGULAR: FileMode = FileMode(0o100644);
    /// Legacy group-writable file mode.
    pub const DEPRECATED: FileMode = FileMode(0o100664);
    /// Executable file.
    pub const EXECUTABLE: FileMode = FileMode(0o100755);
    /// Symbolic link.
    pub const SYMLINK: FileMode = FileMode(0o120000);
    /// Gitlink to a commit in another repository.
    pub const SUBMODULE: FileMode = FileMode(0o160000);

    /// Parses an octal mode string such as `100644` or `40000`.
    pub fn parse(s: &str) -> Result<Self> {
        let mode = u32::from_str_radix(s, 8)
            .map_err(|_| StorageError::InvalidObject(format!("invalid file mode: {s}")))?;
        match FileMode(mode) {
            m @ (Self::DIR
            | Self::REGULAR
            | Self::DEPRECATED
            | Self::EXECUTABLE
            | Self::SYMLINK
            | Self::SUBMODULE) => Ok(m),
            _ => Err(StorageError::InvalidObject(format!("unsupported file mode: {s}"))),
        }
    }

    /// Returns the raw mode bits.
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Returns true if the entry points at another tree.
    pub fn is_dir(&self) -> bool {
        *self == Self::DIR
    }

    /// Returns the type of object an entry with this mode points at.
    pub fn object_type(&self) -> ObjectType {
        match *self {
            Self::DIR => ObjectType::Tree,
            Self::SUBMODULE => ObjectType::Commit,
            _ => ObjectType::Blob,
        }
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:o}", self.0)
    }
}

/// One entry of a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// File or directory name (a single path component).
    pub name: String,
    /// Entry mode.
    pub mode: FileMode,
    /// Object the entry points at.
    pub id: ObjectId,
}

impl TreeEntry {
    /// Creates a new entry.
    pub fn new(name: impl Into<String>, mode: FileMode, id: ObjectId) -> Self {
        Self {
            name: name.into(),
            mode,
            id,
        }
    }

    /// Git's tree order: directories compare as if their name ended in `/`.
    fn canonical_cmp(&self, other: &Self) -> Ordering {
        let a = self.name.as_bytes().iter().chain(self.mode.is_dir().then_some(&b'/'));
        let b = other.name.as_bytes().iter().chain(other.mode.is_dir().then_some(&b'/'));
        a.cmp(b)
    }
}

/// A directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tree {
    /// Entries, in the order they appear in the encoded object.
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    /// Creates a tree from entries.
    pub fn new(entries: Vec<TreeEntry>) -> Self {
        Self { entries }
    }

    /// Decodes a tree from its encoded object.
    pub fn decode(object: &GitObject) -> Result<Self> {
        if object.object_type != ObjectType::Tree {
            return Err(StorageError::InvalidObject(format!(
                "expected tree, got {}",
                object.object_type
            )));
        }

        let data = object.data.as_ref();
        let mut entries = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let space = data[pos..]
                .iter()
                .position(|&b| b == b' ')
                .ok_or_else(|| StorageError::InvalidObject("tree entry without mode".to_string()))?;
            let mode = std::str::from_utf8(&data[pos..pos + space])
                .map_err(|_| StorageError::InvalidObject("non-ASCII file mode".to_string()))?;
            let mode = FileMode::parse(mode)?;
            pos += space + 1;

            let nul = data[pos..]
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| StorageError::InvalidObject("unterminated tree entry name".to_string()))?;
            let name = String::from_utf8(data[pos..pos + nul].to_vec())
                .map_err(|_| StorageError::InvalidObject("tree entry name is not UTF-8".to_string()))?;
            pos += nul + 1;

            if data.len() < pos + crate::ID_LEN {
                return Err(StorageError::InvalidObject(format!(
                    "truncated tree entry {name}"
                )));
            }
            let id = ObjectId::from_slice(&data[pos..pos + crate::ID_LEN])?;
            pos += crate::ID_LEN;

            entries.push(TreeEntry { name, mode, id });
        }

        Ok(Self { entries })
    }

    /// Encodes the tree, sorting entries into git's canonical order.
    pub fn encode(&self) -> GitObject {
        let mut entries: Vec<&TreeEntry> = self.entries.iter().collect();
        entries.sort_by(|a, b| a.canonical_cmp(b));

        let mut data = Vec::new();
        for entry in entries {
            data.extend_from_slice(entry.mode.to_string().as_bytes());
            data.push(b' ');
            data.extend_from_slice(entry.name.as_bytes());
            data.push(0);
            data.extend_from_slice(entry.id.as_bytes());
        }
        GitObject::new(ObjectType::Tree, data)
    }

    /// Finds an entry by name.
    pub fn entry(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tree_hash() {
        assert_eq!(
            Tree::default().encode().id.to_hex(),
            "4b825dc642cb6eb9a060e54bf8d69288fbee4904"
        );
    }

    #[test]
    fn test_tree_roundtrip() {
        let blob = GitObject::blob(b"hello\n".to_vec());
        let tree = Tree::new(vec![
            TreeEntry::new("hello.txt", FileMode::REGULAR, blob.id),
            TreeEntry::new("run.sh", FileMode::EXECUTABLE, blob.id),
        ]);
        let object = tree.encode();
        let decoded = Tree::decode(&object).unwrap();
        assert_eq!(decoded, tree);
        assert_eq!(decoded.entry("run.sh").unwrap().mode, FileMode::EXECUTABLE);
    }

    #[test]
    fn test_tree_canonical_order() {
        let id = ObjectId::from_bytes([7u8; 20]);
        let tree = Tree::new(vec![
            TreeEntry::new("foo.txt", FileMode::REGULAR, id),
            TreeEntry::new("foo", FileMode::DIR, id),
            TreeEntry::new("a", FileMode::REGULAR, id),
        ]);
        let decoded = Tree::decode(&tree.encode()).unwrap();
        let names: Vec<_> = decoded.entries.iter().map(|e| e.name.as_str()).collect();
        // "foo/" sorts after "foo.txt" because '.' < '/'.
        assert_eq!(names, ["a", "foo.txt", "foo"]);
    }

    #[test]
    fn test_dir_mode_encoding() {
        assert_eq!(FileMode::DIR.to_string(), "40000");
        assert_eq!(FileMode::parse("040000").unwrap(), FileMode::DIR);
        assert_eq!(FileMode::DIR.object_type(), ObjectType::Tree);
        assert_eq!(FileMode::SUBMODULE.object_type(), ObjectType::Commit);
        assert!(FileMode::parse("100000").is_err());
        assert!(FileMode::parse("abc").is_err());
    }

    #[test]
    fn test_tree_truncated() {
        let mut data = b"100644 a\0".to_vec();
        data.extend_from_slice(&[1u8; 10]);
        let object = GitObject::new(ObjectType::Tree, data);
        assert!(Tree::decode(&object).is_err());
    }
}
