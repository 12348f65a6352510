//! In-memory storage and the loose object codec.

use crate::compression::{deflate, inflate, CompressionLevel};
use crate::{
    GitObject, ObjectId, ObjectStorer, ObjectType, RefStore, Reference, ReferenceStorer, Result,
    StorageError,
};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Content-addressed in-memory object store.
#[derive(Debug, Default)]
pub struct ObjectStore {
    /// Objects indexed by their SHA-1 hash.
    objects: RwLock<HashMap<ObjectId, GitObject>>,
}

impl ObjectStore {
    /// Creates a new empty object store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of objects in the store.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl ObjectStorer for ObjectStore {
    fn set_object(&self, object: GitObject) -> Result<ObjectId> {
        let id = object.id;
        self.objects.write().entry(id).or_insert(object);
        Ok(id)
    }

    fn object(&self, id: &ObjectId) -> Result<GitObject> {
        self.objects
            .read()
            .get(id)
            .cloned()
            .ok_or(StorageError::ObjectNotFound(*id))
    }

    fn has_object(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.objects.read().contains_key(id))
    }

    fn list_objects(&self, object_type: Option<ObjectType>) -> Result<Vec<ObjectId>> {
        let mut ids: Vec<ObjectId> = self
            .objects
            .read()
            .values()
            .filter(|o| object_type.map_or(true, |t| o.object_type == t))
            .map(|o| o.id)
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// A repository held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    /// Object store.
    pub objects: ObjectStore,
    /// Reference store.
    pub refs: RefStore,
}

impl MemoryStorage {
    /// Creates an empty repository with no references at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty repository whose HEAD points at `branch`, like `git init`.
    pub fn init(branch: &str) -> Result<Self> {
        let storage = Self::new();
        storage.refs.set_reference(
            crate::HEAD,
            Reference::Symbolic(format!("{}{}", crate::BRANCH_PREFIX, branch)),
        )?;
        Ok(storage)
    }
}

impl ObjectStorer for MemoryStorage {
    fn set_object(&self, object: GitObject) -> Result<ObjectId> {
        self.objects.set_object(object)
    }

    fn object(&self, id: &ObjectId) -> Result<GitObject> {
        self.objects.object(id)
    }

    fn has_object(&self, id: &ObjectId) -> Result<bool> {
        self.objects.has_object(id)
    }

    fn list_objects(&self, object_type: Option<ObjectType>) -> Result<Vec<ObjectId>> {
        self.objects.list_objects(object_type)
    }
}

impl ReferenceStorer for MemoryStorage {
    fn set_reference(&self, name: &str, reference: Reference) -> Result<()> {
        self.refs.set_reference(name, reference)
    }

    fn reference(&self, name: &str) -> Result<Reference> {
        self.refs.reference(name)
    }

    fn remove_reference(&self, name: &str) -> Result<()> {
        self.refs.remove_reference(name)
    }

    fn list_references(&self) -> Result<Vec<(String, Reference)>> {
        self.refs.list_references()
    }
}

/// Encodes an object in loose format: zlib of `"<type> <len>\0<data>"`.
pub fn encode_loose(object: &GitObject, level: CompressionLevel) -> Result<Vec<u8>> {
    let header = format!("{} {}\0", object.object_type.as_str(), object.data.len());
    let mut raw = Vec::with_capacity(header.len() + object.data.len());
    raw.extend_from_slice(header.as_bytes());
    raw.extend_from_slice(&object.data);
    deflate(&raw, level)
}

/// Decodes a loose object, checking the declared size.
pub fn decode_loose(compressed: &[u8]) -> Result<GitObject> {
    let decompressed = inflate(compressed)?;

    // Parse header: "type size\0data"
    let null_pos = decompressed
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| StorageError::InvalidObject("missing null byte in header".to_string()))?;

    let header = String::from_utf8_lossy(&decompressed[..null_pos]);
    let (kind, size) = header
        .split_once(' ')
        .ok_or_else(|| StorageError::InvalidObject(format!("invalid header: {}", header)))?;

    let object_type = ObjectType::parse(kind)?;
    let size: usize = size
        .parse()
        .map_err(|_| StorageError::InvalidObject(format!("invalid size: {}", size)))?;

    let data = &decompressed[null_pos + 1..];
    if data.len() != size {
        return Err(StorageError::Corruption(format!(
            "loose object declares {} bytes but holds {}",
            size,
            data.len()
        )));
    }
    Ok(GitObject::new(object_type, Bytes::copy_from_slice(data)))
}
