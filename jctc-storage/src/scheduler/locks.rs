//! Per-entity locks
//!
//! Non-blocking: a second pass reaching an entity that is already being
//! processed skips it instead of waiting.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use jctc_core::EntityRef;

/// Set of entities currently being acted on
#[derive(Debug, Default)]
pub struct EntityLockSet {
    held: Mutex<HashSet<EntityRef>>,
}

impl EntityLockSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `entity`, or `None` if someone else holds it
    pub fn try_acquire(self: &Arc<Self>, entity: &EntityRef) -> Option<EntityLockGuard> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(entity.clone()) {
            return None;
        }
        Some(EntityLockGuard {
            set: Arc::clone(self),
            entity: entity.clone(),
        })
    }

    pub fn is_locked(&self, entity: &EntityRef) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(entity)
    }

    pub fn len(&self) -> usize {
        self.held.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases the entity lock on drop
#[derive(Debug)]
pub struct EntityLockGuard {
    set: Arc<EntityLockSet>,
    entity: EntityRef,
}

impl EntityLockGuard {
    pub fn entity(&self) -> &EntityRef {
        &self.entity
    }
}

impl Drop for EntityLockGuard {
    fn drop(&mut self) {
        self.set
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.entity);
    }
}
