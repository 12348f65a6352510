//! Reachability: which objects a pack must carry.

use crate::Result;
use grit_storage::{Commit, FileMode, ObjectId, ObjectStorer, ObjectType, Tag, Tree};
use std::collections::HashSet;
use tracing::debug;

/// Returns every object reachable from `wants` that is not reachable from
/// `haves`, in walk order.
///
/// Haves missing from the store are ignored, since a client may have objects
/// the server never saw. A missing want, or a missing object below a want,
/// is an error, and so is a store that fails to answer for a have.
pub fn objects<S: ObjectStorer + ?Sized>(
    storer: &S,
    wants: &[ObjectId],
    haves: &[ObjectId],
) -> Result<Vec<ObjectId>> {
    let mut seen = HashSet::new();
    let mut known = Vec::with_capacity(haves.len());
    for id in haves {
        if storer.has_object(id)? {
            known.push(*id);
        }
    }
    walk(storer, &known, &mut seen, |_| {})?;
    let excluded = seen.len();

    let mut result = Vec::new();
    walk(storer, wants, &mut seen, |id| result.push(id))?;
    debug!(
        wants = wants.len(),
        haves = haves.len(),
        excluded,
        objects = result.len(),
        "computed object list"
    );
    Ok(result)
}

/// Depth-first walk over commits, trees and tags, skipping anything already
/// in `seen`. Submodule entries point into other repositories and are not
/// followed.
fn walk<S, F>(
    storer: &S,
    roots: &[ObjectId],
    seen: &mut HashSet<ObjectId>,
    mut visit: F,
) -> Result<()>
where
    S: ObjectStorer + ?Sized,
    F: FnMut(ObjectId),
{
    let mut stack: Vec<ObjectId> = roots.iter().rev().copied().collect();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        let object = storer.object(&id)?;
        visit(id);

        match object.object_type {
            ObjectType::Commit => {
                let commit = Commit::decode(&object)?;
                stack.extend(commit.parents.iter().rev());
                stack.push(commit.tree);
            }
            ObjectType::Tree => {
                let tree = Tree::decode(&object)?;
                stack.extend(
                    tree.entries
                        .iter()
                        .rev()
                        .filter(|e| e.mode != FileMode::SUBMODULE)
                        .map(|e| e.id),
                );
            }
            ObjectType::Tag => stack.push(Tag::decode(&object)?.target),
            ObjectType::Blob => {}
        }
    }
    Ok(())
}
