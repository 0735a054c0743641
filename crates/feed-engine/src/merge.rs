//! Reconciliation of incoming entities against the local collection.
//!
//! Every function here keeps the existing `Arc` for entities whose mutable state did not
//! change, and returns the previous collection itself when nothing changed at all, so
//! consumers can skip work with `Arc::ptr_eq` or by inspecting the change set.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::change::{ChangeSet, FeedChange};
use crate::entity::{Collection, Entity, EntityRef};

#[derive(Debug, Clone)]
pub struct Merged {
    pub collection: Collection,
    pub changes: ChangeSet,
}

impl Merged {
    fn unchanged(current: &Collection) -> Self {
        Self {
            collection: Arc::clone(current),
            changes: Vec::new(),
        }
    }

    pub fn is_unchanged(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Replaces `current` with an authoritative listing.
///
/// Unresolved placeholders stay at the head; confirmed entities missing from `incoming`
/// are reported as removed.
pub fn merge(current: &Collection, incoming: Vec<Entity>) -> Merged {
    let by_id: HashMap<i64, &EntityRef> = current.iter().map(|e| (e.id, e)).collect();
    let mut placeholders: Vec<&EntityRef> = current.iter().filter(|e| e.is_placeholder()).collect();
    let mut seen = HashSet::with_capacity(incoming.len());
    let mut merged: Vec<EntityRef> = Vec::with_capacity(incoming.len() + placeholders.len());
    let mut changes = ChangeSet::new();

    for mut entity in incoming {
        if entity.is_placeholder() || !seen.insert(entity.id) {
            continue;
        }
        if let Some(existing) = by_id.get(&entity.id) {
            if existing.same_state(&entity) {
                merged.push(Arc::clone(existing));
            } else {
                entity.local_priority = existing.local_priority;
                changes.push(FeedChange::Updated { id: entity.id });
                merged.push(Arc::new(entity));
            }
            continue;
        }
        if let Some(position) = placeholders.iter().position(|p| entity.confirms(p)) {
            let placeholder = placeholders.remove(position);
            entity.local_priority = placeholder.local_priority;
            changes.push(FeedChange::PlaceholderResolved {
                placeholder_id: placeholder.id,
                id: entity.id,
            });
        } else {
            changes.push(FeedChange::Inserted { id: entity.id });
        }
        merged.push(Arc::new(entity));
    }

    for entity in current.iter() {
        if !entity.is_placeholder() && !seen.contains(&entity.id) {
            changes.push(FeedChange::Removed { id: entity.id });
        }
    }

    if changes.is_empty() && merged.len() + placeholders.len() == current.len() {
        return Merged::unchanged(current);
    }

    let collection: Vec<EntityRef> = placeholders
        .into_iter()
        .map(Arc::clone)
        .chain(merged)
        .collect();
    Merged {
        collection: Arc::new(collection),
        changes,
    }
}

/// Appends an older page, skipping ids already present.
pub fn append(current: &Collection, incoming: Vec<Entity>) -> Merged {
    let mut seen: HashSet<i64> = current.iter().map(|e| e.id).collect();
    let mut changes = ChangeSet::new();
    let mut added = Vec::new();
    for entity in incoming {
        if entity.is_placeholder() || !seen.insert(entity.id) {
            continue;
        }
        changes.push(FeedChange::Inserted { id: entity.id });
        added.push(Arc::new(entity));
    }
    if added.is_empty() {
        return Merged::unchanged(current);
    }
    let mut collection = Vec::with_capacity(current.len() + added.len());
    collection.extend(current.iter().cloned());
    collection.extend(added);
    Merged {
        collection: Arc::new(collection),
        changes,
    }
}

/// Admits one live entity: duplicates are dropped, a matching placeholder is replaced in
/// place, anything else goes to the head.
pub fn prepend(current: &Collection, mut entity: Entity) -> Merged {
    if current.iter().any(|e| e.id == entity.id) {
        return Merged::unchanged(current);
    }
    if let Some(position) = current.iter().position(|p| entity.confirms(p)) {
        let placeholder_id = current[position].id;
        entity.local_priority = current[position].local_priority;
        let id = entity.id;
        let mut collection: Vec<EntityRef> = current.iter().cloned().collect();
        collection[position] = Arc::new(entity);
        return Merged {
            collection: Arc::new(collection),
            changes: vec![FeedChange::PlaceholderResolved { placeholder_id, id }],
        };
    }
    let id = entity.id;
    let mut collection = Vec::with_capacity(current.len() + 1);
    collection.push(Arc::new(entity));
    collection.extend(current.iter().cloned());
    Merged {
        collection: Arc::new(collection),
        changes: vec![FeedChange::Inserted { id }],
    }
}

/// Replaces one entity in place with a newer server copy. Unknown ids are ignored.
pub fn upsert(current: &Collection, mut entity: Entity) -> Merged {
    let Some(position) = current.iter().position(|e| e.id == entity.id) else {
        return Merged::unchanged(current);
    };
    let existing = &current[position];
    if existing.same_state(&entity) && existing.category == entity.category {
        return Merged::unchanged(current);
    }
    entity.local_priority = existing.local_priority;
    let id = entity.id;
    let mut collection: Vec<EntityRef> = current.iter().cloned().collect();
    collection[position] = Arc::new(entity);
    Merged {
        collection: Arc::new(collection),
        changes: vec![FeedChange::Updated { id }],
    }
}

/// Rebuilds the entity with `id` through `edit`; `None` from `edit` means no change.
///
/// Returns `None` when the id is unknown or the edit was a no-op.
pub fn edit(
    current: &Collection,
    id: i64,
    edit: impl FnOnce(&Entity) -> Option<Entity>,
) -> Option<Collection> {
    let position = current.iter().position(|e| e.id == id)?;
    let updated = edit(&current[position])?;
    let mut collection: Vec<EntityRef> = current.iter().cloned().collect();
    collection[position] = Arc::new(updated);
    Some(Arc::new(collection))
}

pub fn remove(current: &Collection, id: i64) -> Option<Collection> {
    let position = current.iter().position(|e| e.id == id)?;
    let mut collection: Vec<EntityRef> = current.iter().cloned().collect();
    collection.remove(position);
    Some(Arc::new(collection))
}
