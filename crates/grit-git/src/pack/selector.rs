//! Choosing delta bases for objects being packed.

use super::diff::diff_delta;
use super::{PackConfig, PackObjectType};
use grit_storage::{GitObject, ObjectId, ObjectType};
use std::cmp::Reverse;
use tracing::debug;

/// Deltas this small or smaller are not worth the indirection.
const MIN_DELTA_GAIN: usize = 8;

/// An object scheduled for a pack, possibly stored as a delta.
#[derive(Debug, Clone)]
pub struct ObjectToPack {
    /// The full object.
    pub original: GitObject,
    /// Index of the delta base within the same list; always smaller than
    /// this object's own index.
    pub base: Option<usize>,
    /// Delta turning the base into `original`.
    pub delta: Option<Vec<u8>>,
    /// Length of the delta chain ending here; 0 for full objects.
    pub depth: usize,
}

impl ObjectToPack {
    /// Wraps an object to be written in full.
    pub fn new(original: GitObject) -> Self {
        Self {
            original,
            base: None,
            delta: None,
            depth: 0,
        }
    }

    /// Returns the object id.
    pub fn id(&self) -> ObjectId {
        self.original.id
    }

    /// Returns the inflated size of the full object.
    pub fn size(&self) -> usize {
        self.original.size()
    }

    /// Returns true if this entry will be written as a delta.
    pub fn is_delta(&self) -> bool {
        self.base.is_some() && self.delta.is_some()
    }
}

/// Picks a base for each blob and tree among the preceding objects of the
/// same type.
///
/// Objects are ordered by type then by size, largest first, so a base is
/// always written before the objects that depend on it.
#[derive(Debug, Clone)]
pub struct DeltaSelector {
    window: usize,
    max_depth: usize,
}

impl DeltaSelector {
    /// Creates a selector from pack settings.
    pub fn new(config: &PackConfig) -> Self {
        Self {
            window: config.delta_window,
            max_depth: config.max_delta_depth,
        }
    }

    /// Orders the objects and attaches deltas where they pay off.
    pub fn select(&self, objects: Vec<GitObject>) -> Vec<ObjectToPack> {
        let mut list: Vec<ObjectToPack> = objects.into_iter().map(ObjectToPack::new).collect();
        list.sort_by_key(|o| {
            (
                Reverse(PackObjectType::from(o.original.object_type).code()),
                Reverse(o.size()),
            )
        });

        if self.window == 0 || self.max_depth == 0 {
            return list;
        }

        let mut deltas = 0usize;
        for i in 0..list.len() {
            let kind = list[i].original.object_type;
            if !matches!(kind, ObjectType::Blob | ObjectType::Tree) {
                continue;
            }

            let start = i.saturating_sub(self.window);
            for j in (start..i).rev() {
                let (before, rest) = list.split_at_mut(i);
                let base = &before[j];
                let target = &mut rest[0];
                if base.original.object_type != kind {
                    break;
                }
                if let Some(delta) = self.try_delta(base, target) {
                    target.depth = base.depth + 1;
                    target.base = Some(j);
                    target.delta = Some(delta);
                }
            }
            if list[i].is_delta() {
                deltas += 1;
            }
        }

        debug!(objects = list.len(), deltas, "selected delta bases");
        list
    }

    fn try_delta(&self, base: &ObjectToPack, target: &ObjectToPack) -> Option<Vec<u8>> {
        if base.depth >= self.max_depth {
            return None;
        }

        let base_size = base.size();
        let target_size = target.size();
        if target_size < base_size >> 4 {
            return None;
        }

        let limit = match &target.delta {
            Some(current) => current.len(),
            None => (target_size / 2) * (self.max_depth - base.depth) / self.max_depth,
        };
        if limit <= MIN_DELTA_GAIN {
            return None;
        }
        if target_size > base_size && target_size - base_size > limit {
            return None;
        }

        let delta = diff_delta(&base.original.data, &target.original.data);
        (delta.len() < limit).then_some(delta)
    }
}
