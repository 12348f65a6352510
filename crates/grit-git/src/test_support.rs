//! Builders for repositories used by unit tests.

use grit_storage::{
    Commit, FileMode, GitObject, ObjectId, ObjectStorer, Signature, Time, Tree, TreeEntry,
};

pub(crate) fn signature() -> Signature {
    Signature::new("Alice", "alice@example.com", Time::new(1_700_000_000, 60))
}

/// Stores a blob and a tree holding it; returns `(tree, blob)`.
pub(crate) fn tree_with_blob<S: ObjectStorer + ?Sized>(
    storer: &S,
    name: &str,
    content: &[u8],
) -> (ObjectId, ObjectId) {
    let blob = storer.set_object(GitObject::blob(content.to_vec())).unwrap();
    let tree = storer
        .set_object(Tree::new(vec![TreeEntry::new(name, FileMode::REGULAR, blob)]).encode())
        .unwrap();
    (tree, blob)
}

pub(crate) fn commit<S: ObjectStorer + ?Sized>(
    storer: &S,
    tree: ObjectId,
    parents: &[ObjectId],
    message: &str,
) -> ObjectId {
    let commit = Commit {
        tree,
        parents: parents.to_vec(),
        author: signature(),
        committer: signature(),
        extra_headers: Vec::new(),
        message: message.to_string(),
    };
    storer.set_object(commit.encode()).unwrap()
}
