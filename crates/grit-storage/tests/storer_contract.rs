//! Black-box contract shared by every storage backend.
//!
//! Each test body is written once against `impl Storer` and instantiated for
//! the in-memory and filesystem backends. A filesystem repository whose
//! objects live in `objects/pack` is checked against the same reads.

use flate2::write::ZlibEncoder;
use flate2::Compression;
use grit_storage::pack::format::{
    write_delta_size, write_entry_header, write_ofs_offset, PackObjectType,
};
use grit_storage::{
    resolve_reference, Commit, FilesystemStorage, GitObject, MemoryStorage, ObjectId, ObjectType,
    Reference, Signature, StorageError, Storer, Time, Tree, TreeEntry, FileMode, HEAD,
};
use sha1::{Digest, Sha1};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

fn sample_objects() -> (GitObject, GitObject, GitObject) {
    let blob = GitObject::blob(b"contract\n".to_vec());
    let tree = Tree::new(vec![TreeEntry::new("file", FileMode::REGULAR, blob.id)]).encode();
    let sig = Signature::new("Tester", "tester@example.com", Time::new(1_700_000_000, 0));
    let commit = Commit {
        tree: tree.id,
        parents: vec![],
        author: sig.clone(),
        committer: sig,
        extra_headers: vec![],
        message: "contract\n".to_string(),
    }
    .encode();
    (blob, tree, commit)
}

fn object_roundtrip(storer: &impl Storer) {
    let (blob, tree, commit) = sample_objects();
    for object in [&blob, &tree, &commit] {
        let id = storer.set_object(object.clone()).unwrap();
        assert_eq!(id, object.id);
        assert_eq!(&storer.object(&id).unwrap(), object);
        assert!(storer.has_object(&id).unwrap());
    }
}

fn set_is_idempotent(storer: &impl Storer) {
    let (blob, _, _) = sample_objects();
    storer.set_object(blob.clone()).unwrap();
    storer.set_object(blob.clone()).unwrap();
    assert_eq!(storer.list_objects(None).unwrap(), vec![blob.id]);
}

fn missing_object(storer: &impl Storer) {
    let id = ObjectId::from_bytes([0x42; 20]);
    assert!(!storer.has_object(&id).unwrap());
    assert!(matches!(storer.object(&id), Err(StorageError::ObjectNotFound(missing)) if missing == id));
}

fn list_by_type(storer: &impl Storer) {
    let (blob, tree, commit) = sample_objects();
    for object in [blob.clone(), tree.clone(), commit.clone()] {
        storer.set_object(object).unwrap();
    }
    assert_eq!(storer.list_objects(Some(ObjectType::Blob)).unwrap(), vec![blob.id]);
    assert_eq!(storer.list_objects(Some(ObjectType::Tree)).unwrap(), vec![tree.id]);
    assert_eq!(storer.list_objects(Some(ObjectType::Commit)).unwrap(), vec![commit.id]);
    assert!(storer.list_objects(Some(ObjectType::Tag)).unwrap().is_empty());
    assert_eq!(storer.list_objects(None).unwrap().len(), 3);
}

fn reference_lifecycle(storer: &impl Storer) {
    let id = ObjectId::from_bytes([0x11; 20]);
    storer.set_reference("refs/heads/main", Reference::Direct(id)).unwrap();
    assert_eq!(storer.reference("refs/heads/main").unwrap(), Reference::Direct(id));

    let other = ObjectId::from_bytes([0x22; 20]);
    storer.set_reference("refs/heads/main", Reference::Direct(other)).unwrap();
    assert_eq!(storer.reference("refs/heads/main").unwrap(), Reference::Direct(other));

    storer.remove_reference("refs/heads/main").unwrap();
    assert!(matches!(
        storer.reference("refs/heads/main"),
        Err(StorageError::ReferenceNotFound(_))
    ));
    storer.remove_reference("refs/heads/main").unwrap();
}

fn symbolic_head(storer: &impl Storer) {
    let id = ObjectId::from_bytes([0x33; 20]);
    storer.set_reference("refs/heads/main", Reference::Direct(id)).unwrap();
    storer
        .set_reference(HEAD, Reference::Symbolic("refs/heads/main".to_string()))
        .unwrap();
    assert_eq!(resolve_reference(storer, HEAD).unwrap(), id);
}

fn reference_cycle(storer: &impl Storer) {
    storer
        .set_reference("refs/heads/a", Reference::Symbolic("refs/heads/b".to_string()))
        .unwrap();
    storer
        .set_reference("refs/heads/b", Reference::Symbolic("refs/heads/a".to_string()))
        .unwrap();
    assert!(matches!(
        resolve_reference(storer, "refs/heads/a"),
        Err(StorageError::ReferenceCycle(_))
    ));
}

fn list_references_sorted(storer: &impl Storer) {
    let id = ObjectId::from_bytes([0x44; 20]);
    for name in ["refs/tags/v1", "refs/heads/main", "refs/heads/dev"] {
        storer.set_reference(name, Reference::Direct(id)).unwrap();
    }
    let names: Vec<String> = storer
        .list_references()
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .filter(|name| name != HEAD)
        .collect();
    assert_eq!(names, ["refs/heads/dev", "refs/heads/main", "refs/tags/v1"]);
}

fn invalid_reference_name(storer: &impl Storer) {
    let id = ObjectId::from_bytes([0x55; 20]);
    assert!(storer.set_reference("refs/heads/bad name", Reference::Direct(id)).is_err());
    assert!(storer.set_reference("refs/heads/../escape", Reference::Direct(id)).is_err());
}

macro_rules! storer_contract {
    ($backend:ident, $make:expr) => {
        mod $backend {
            use super::*;

            #[test]
            fn object_roundtrip() {
                let (_guard, storer) = $make;
                super::object_roundtrip(&storer);
            }

            #[test]
            fn set_is_idempotent() {
                let (_guard, storer) = $make;
                super::set_is_idempotent(&storer);
            }

            #[test]
            fn missing_object() {
                let (_guard, storer) = $make;
                super::missing_object(&storer);
            }

            #[test]
            fn list_by_type() {
                let (_guard, storer) = $make;
                super::list_by_type(&storer);
            }

            #[test]
            fn reference_lifecycle() {
                let (_guard, storer) = $make;
                super::reference_lifecycle(&storer);
            }

            #[test]
            fn symbolic_head() {
                let (_guard, storer) = $make;
                super::symbolic_head(&storer);
            }

            #[test]
            fn reference_cycle() {
                let (_guard, storer) = $make;
                super::reference_cycle(&storer);
            }

            #[test]
            fn list_references_sorted() {
                let (_guard, storer) = $make;
                super::list_references_sorted(&storer);
            }

            #[test]
            fn invalid_reference_name() {
                let (_guard, storer) = $make;
                super::invalid_reference_name(&storer);
            }
        }
    };
}

fn memory() -> ((), MemoryStorage) {
    ((), MemoryStorage::new())
}

fn filesystem() -> (TempDir, FilesystemStorage) {
    let dir = TempDir::new().unwrap();
    let storage = FilesystemStorage::init(dir.path().join("repo.git")).unwrap();
    (dir, storage)
}

storer_contract!(memory_backend, memory());
storer_contract!(filesystem_backend, filesystem());

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Writes `objects` as full entries followed by one OFS delta that appends
/// `suffix` to the first object, plus a version 2 index for them.
fn write_pack(repo: &Path, objects: &[GitObject], suffix: &[u8]) -> GitObject {
    let mut pack = b"PACK".to_vec();
    pack.extend_from_slice(&2u32.to_be_bytes());
    pack.extend_from_slice(&(objects.len() as u32 + 1).to_be_bytes());

    let mut entries = Vec::new();
    for object in objects {
        entries.push((object.id, pack.len() as u64));
        write_entry_header(&mut pack, PackObjectType::from(object.object_type), object.size() as u64);
        pack.extend_from_slice(&zlib(&object.data));
    }

    let base = &objects[0];
    let mut data = base.data.to_vec();
    data.extend_from_slice(suffix);
    let derived = GitObject::new(base.object_type, data);

    let mut delta = Vec::new();
    write_delta_size(&mut delta, base.size() as u64);
    write_delta_size(&mut delta, derived.size() as u64);
    delta.extend_from_slice(&[0x90, base.size() as u8]);
    delta.push(suffix.len() as u8);
    delta.extend_from_slice(suffix);

    let offset = pack.len() as u64;
    entries.push((derived.id, offset));
    write_entry_header(&mut pack, PackObjectType::OfsDelta, delta.len() as u64);
    write_ofs_offset(&mut pack, offset - entries[0].1);
    pack.extend_from_slice(&zlib(&delta));
    let pack_checksum = Sha1::digest(&pack);
    pack.extend_from_slice(&pack_checksum);

    entries.sort();
    let mut idx = vec![0xff, b't', b'O', b'c', 0, 0, 0, 2];
    for byte in 0..=255u8 {
        let count = entries.iter().filter(|(id, _)| id.as_bytes()[0] <= byte).count();
        idx.extend_from_slice(&(count as u32).to_be_bytes());
    }
    for (id, _) in &entries {
        idx.extend_from_slice(id.as_bytes());
    }
    for _ in &entries {
        idx.extend_from_slice(&[0; 4]);
    }
    for (_, offset) in &entries {
        idx.extend_from_slice(&(*offset as u32).to_be_bytes());
    }
    idx.extend_from_slice(&pack_checksum);
    let idx_checksum = Sha1::digest(&idx);
    idx.extend_from_slice(&idx_checksum);

    let dir = repo.join("objects/pack");
    fs::write(dir.join("pack-contract.pack"), pack).unwrap();
    fs::write(dir.join("pack-contract.idx"), idx).unwrap();
    derived
}

mod packed_filesystem_backend {
    use super::*;
    use grit_storage::ObjectStorer;

    fn packed() -> (TempDir, FilesystemStorage, Vec<GitObject>) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("repo.git");
        FilesystemStorage::init(&path).unwrap();
        let (blob, tree, commit) = sample_objects();
        let derived = write_pack(&path, &[blob.clone(), tree.clone(), commit.clone()], b"more\n");
        let storage = FilesystemStorage::open(&path).unwrap();
        (dir, storage, vec![blob, tree, commit, derived])
    }

    #[test]
    fn object_roundtrip() {
        let (_guard, storer, objects) = packed();
        for object in &objects {
            assert_eq!(&storer.object(&object.id).unwrap(), object);
            assert!(storer.has_object(&object.id).unwrap());
        }
        assert_eq!(objects[3].data.as_ref(), b"contract\nmore\n");
    }

    #[test]
    fn set_is_idempotent() {
        let (_guard, storer, objects) = packed();
        for object in &objects {
            assert_eq!(storer.set_object(object.clone()).unwrap(), object.id);
        }
        let hex = objects[0].id.to_hex();
        assert!(!storer.path().join("objects").join(&hex[..2]).exists());
        assert_eq!(storer.list_objects(None).unwrap().len(), 4);
    }

    #[test]
    fn missing_object() {
        let (_guard, storer, _) = packed();
        super::missing_object(&storer);
    }

    #[test]
    fn list_by_type() {
        let (_guard, storer, objects) = packed();
        let mut blobs = vec![objects[0].id, objects[3].id];
        blobs.sort();
        assert_eq!(storer.list_objects(Some(ObjectType::Blob)).unwrap(), blobs);
        assert_eq!(storer.list_objects(Some(ObjectType::Tree)).unwrap(), vec![objects[1].id]);
        assert_eq!(storer.list_objects(Some(ObjectType::Commit)).unwrap(), vec![objects[2].id]);
    }

    #[test]
    fn loose_and_packed_together() {
        let (_guard, storer, objects) = packed();
        let loose = storer.set_object(GitObject::blob(b"loose\n".to_vec())).unwrap();
        let listed = storer.list_objects(None).unwrap();
        assert_eq!(listed.len(), 5);
        assert!(listed.contains(&loose));
        assert!(listed.contains(&objects[3].id));
        assert!(listed.windows(2).all(|w| w[0] < w[1]));
    }
}
