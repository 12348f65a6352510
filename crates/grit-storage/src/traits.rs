//! Storage backend traits.
//!
//! Every backend implements the same object and reference contracts, so
//! protocol code can work against `&dyn Storer` without knowing where bytes
//! live.

use crate::{GitObject, ObjectId, ObjectType, Reference, Result};
use std::sync::Arc;

/// Content-addressed object storage.
pub trait ObjectStorer: Send + Sync {
    /// Stores an object and returns its ID. Storing an object that already
    /// exists is a no-op.
    fn set_object(&self, object: GitObject) -> Result<ObjectId>;

    /// Retrieves an object by ID, failing with `ObjectNotFound` if absent.
    fn object(&self, id: &ObjectId) -> Result<GitObject>;

    /// Checks if an object exists.
    fn has_object(&self, id: &ObjectId) -> Result<bool> {
        match self.object(id) {
            Ok(_) => Ok(true),
            Err(crate::StorageError::ObjectNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Lists object IDs, optionally only those of one type.
    fn list_objects(&self, object_type: Option<ObjectType>) -> Result<Vec<ObjectId>>;
}

/// Named reference storage.
pub trait ReferenceStorer: Send + Sync {
    /// Creates or replaces a reference.
    fn set_reference(&self, name: &str, reference: Reference) -> Result<()>;

    /// Gets a reference by name, failing with `ReferenceNotFound` if absent.
    fn reference(&self, name: &str) -> Result<Reference>;

    /// Removes a reference. Removing a missing reference is not an error.
    fn remove_reference(&self, name: &str) -> Result<()>;

    /// Lists all references, `HEAD` included, sorted by name.
    fn list_references(&self) -> Result<Vec<(String, Reference)>>;
}

/// A full repository store: objects plus references.
pub trait Storer: ObjectStorer + ReferenceStorer {}

impl<T: ObjectStorer + ReferenceStorer + ?Sized> Storer for T {}

impl<T: ObjectStorer + ?Sized> ObjectStorer for Arc<T> {
    fn set_object(&self, object: GitObject) -> Result<ObjectId> {
        (**self).set_object(object)
    }

    fn object(&self, id: &ObjectId) -> Result<GitObject> {
        (**self).object(id)
    }

    fn has_object(&self, id: &ObjectId) -> Result<bool> {
        (**self).has_object(id)
    }

    fn list_objects(&self, object_type: Option<ObjectType>) -> Result<Vec<ObjectId>> {
        (**self).list_objects(object_type)
    }
}

impl<T: ReferenceStorer + ?Sized> ReferenceStorer for Arc<T> {
    fn set_reference(&self, name: &str, reference: Reference) -> Result<()> {
        (**self).set_reference(name, reference)
    }

    fn reference(&self, name: &str) -> Result<Reference> {
        (**self).reference(name)
    }

    fn remove_reference(&self, name: &str) -> Result<()> {
        (**self).remove_reference(name)
    }

    fn list_references(&self) -> Result<Vec<(String, Reference)>> {
        (**self).list_references()
    }
}
