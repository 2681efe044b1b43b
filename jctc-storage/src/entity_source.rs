//! Entity Source
//!
//! Read/notify interface to the live case-management store. The scheduler
//! only sees snapshots; it never writes entity fields itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::{debug, info};

use jctc_core::{EntityRef, EntitySnapshot, EntityType, RetentionError, RetentionResult};

/// Field on access-log entries naming the record that was accessed
pub const ACCESS_TARGET_FIELD: &str = "target";

/// Outcome of a secure deletion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionReceipt {
    pub entity_ref: EntityRef,
    pub deleted_at: DateTime<Utc>,
    /// Records removed, primary record first
    pub removed: Vec<EntityRef>,
    /// Sub-records kept because a hold protects their type
    pub preserved: Vec<EntityRef>,
}

/// Live entity store
#[async_trait]
pub trait EntitySource: Send + Sync {
    /// One batch of entities of a type, ordered by id, strictly after `after`
    async fn list_entities(
        &self,
        entity_type: EntityType,
        after: Option<&str>,
        limit: usize,
    ) -> RetentionResult<Vec<EntitySnapshot>>;

    /// Current snapshot of one entity
    async fn get_entity(&self, entity_ref: &EntityRef) -> RetentionResult<Option<EntitySnapshot>>;

    /// Records archived together with the entity
    async fn fetch_dependents(&self, entity: &EntitySnapshot) -> RetentionResult<Vec<EntitySnapshot>>;

    /// Record that the entity now lives in the archive
    async fn mark_archived(&self, entity_ref: &EntityRef, archive_id: &str) -> RetentionResult<()>;

    /// Remove the entity, keeping sub-records of the `preserve` types
    async fn secure_delete(
        &self,
        entity_ref: &EntityRef,
        preserve: &[EntityType],
        at: DateTime<Utc>,
    ) -> RetentionResult<DeletionReceipt>;
}

#[derive(Default)]
struct SourceState {
    entities: BTreeMap<EntityRef, EntitySnapshot>,
    archived: HashMap<EntityRef, String>,
    deletions: Vec<DeletionReceipt>,
}

/// In-memory entity source for tests and local runs
#[derive(Default)]
pub struct InMemoryEntitySource {
    state: RwLock<SourceState>,
}

impl InMemoryEntitySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshots(snapshots: impl IntoIterator<Item = EntitySnapshot>) -> Self {
        let entities = snapshots
            .into_iter()
            .map(|s| (s.entity_ref.clone(), s))
            .collect();
        Self {
            state: RwLock::new(SourceState {
                entities,
                ..Default::default()
            }),
        }
    }

    /// Insert or replace a snapshot
    pub async fn upsert(&self, snapshot: EntitySnapshot) {
        let mut state = self.state.write().await;
        state.entities.insert(snapshot.entity_ref.clone(), snapshot);
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entities.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entities.is_empty()
    }

    pub async fn contains(&self, entity_ref: &EntityRef) -> bool {
        self.state.read().await.entities.contains_key(entity_ref)
    }

    /// Archive id the entity was marked with
    pub async fn archive_marker(&self, entity_ref: &EntityRef) -> Option<String> {
        self.state.read().await.archived.get(entity_ref).cloned()
    }

    pub async fn deletions(&self) -> Vec<DeletionReceipt> {
        self.state.read().await.deletions.clone()
    }

    pub async fn snapshots(&self) -> Vec<EntitySnapshot> {
        self.state.read().await.entities.values().cloned().collect()
    }
}

fn is_dependent(parent: &EntitySnapshot, candidate: &EntitySnapshot) -> bool {
    if candidate.entity_ref == parent.entity_ref {
        return false;
    }
    if parent.entity_type() == EntityType::Case
        && candidate.entity_type().cascades_from_case()
        && candidate.case_id.as_deref() == Some(parent.entity_id())
    {
        return true;
    }
    is_access_log_of(&parent.entity_ref, candidate)
}

fn is_access_log_of(parent: &EntityRef, candidate: &EntitySnapshot) -> bool {
    candidate.entity_type() == EntityType::AccessLog
        && candidate
            .field(ACCESS_TARGET_FIELD)
            .and_then(|v| v.as_text())
            .map_or(false, |target| target == parent.to_string())
}

#[async_trait]
impl EntitySource for InMemoryEntitySource {
    async fn list_entities(
        &self,
        entity_type: EntityType,
        after: Option<&str>,
        limit: usize,
    ) -> RetentionResult<Vec<EntitySnapshot>> {
        let state = self.state.read().await;
        let start = EntityRef::new(entity_type, after.unwrap_or_default());
        Ok(state
            .entities
            .range(start..)
            .take_while(|(r, _)| r.entity_type == entity_type)
            .filter(|(r, _)| after.map_or(true, |a| r.entity_id.as_str() > a))
            .take(limit)
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn get_entity(&self, entity_ref: &EntityRef) -> RetentionResult<Option<EntitySnapshot>> {
        Ok(self.state.read().await.entities.get(entity_ref).cloned())
    }

    async fn fetch_dependents(&self, entity: &EntitySnapshot) -> RetentionResult<Vec<EntitySnapshot>> {
        let state = self.state.read().await;
        Ok(state
            .entities
            .values()
            .filter(|candidate| is_dependent(entity, candidate))
            .cloned()
            .collect())
    }

    async fn mark_archived(&self, entity_ref: &EntityRef, archive_id: &str) -> RetentionResult<()> {
        let mut state = self.state.write().await;
        if !state.entities.contains_key(entity_ref) {
            return Err(RetentionError::NotFound(format!("Entity not found: {}", entity_ref)));
        }
        state.archived.insert(entity_ref.clone(), archive_id.to_string());
        debug!(entity = %entity_ref, archive_id, "Entity marked archived");
        Ok(())
    }

    async fn secure_delete(
        &self,
        entity_ref: &EntityRef,
        preserve: &[EntityType],
        at: DateTime<Utc>,
    ) -> RetentionResult<DeletionReceipt> {
        let mut state = self.state.write().await;
        if state.entities.remove(entity_ref).is_none() {
            return Err(RetentionError::NotFound(format!("Entity not found: {}", entity_ref)));
        }

        let logs: Vec<EntityRef> = state
            .entities
            .values()
            .filter(|candidate| is_access_log_of(entity_ref, candidate))
            .map(|s| s.entity_ref.clone())
            .collect();

        let mut receipt = DeletionReceipt {
            entity_ref: entity_ref.clone(),
            deleted_at: at,
            removed: vec![entity_ref.clone()],
            preserved: Vec::new(),
        };
        for log in logs {
            if preserve.contains(&log.entity_type) {
                receipt.preserved.push(log);
            } else {
                state.entities.remove(&log);
                receipt.removed.push(log);
            }
        }
        state.archived.remove(entity_ref);
        state.deletions.push(receipt.clone());

        info!(
            entity = %entity_ref,
            removed = receipt.removed.len(),
            preserved = receipt.preserved.len(),
            "Entity securely deleted"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(year: i32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap()
    }

    fn source() -> InMemoryEntitySource {
        InMemoryEntitySource::from_snapshots(vec![
            EntitySnapshot::new(EntityType::Case, "case-1", at(2010)),
            EntitySnapshot::new(EntityType::Evidence, "ev-1", at(2010)).with_case("case-1"),
            EntitySnapshot::new(EntityType::Evidence, "ev-2", at(2011)).with_case("case-2"),
            EntitySnapshot::new(EntityType::Evidence, "ev-3", at(2012)).with_case("case-1"),
            EntitySnapshot::new(EntityType::AccessLog, "log-1", at(2012))
                .with_field(ACCESS_TARGET_FIELD, "evidence:ev-1"),
            EntitySnapshot::new(EntityType::AccessLog, "log-2", at(2012))
                .with_field(ACCESS_TARGET_FIELD, "case:case-1"),
        ])
    }

    #[tokio::test]
    async fn test_list_in_batches() {
        let source = source();
        let first = source.list_entities(EntityType::Evidence, None, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        let after = first.last().map(|s| s.entity_id().to_string());
        let second = source
            .list_entities(EntityType::Evidence, after.as_deref(), 2)
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].entity_id(), "ev-3");

        assert!(source.list_entities(EntityType::User, None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_case_dependents() {
        let source = source();
        let case = source
            .get_entity(&EntityRef::new(EntityType::Case, "case-1"))
            .await
            .unwrap()
            .unwrap();
        let mut ids: Vec<String> = source
            .fetch_dependents(&case)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.entity_id().to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["ev-1", "ev-3", "log-2"]);
    }

    #[tokio::test]
    async fn test_secure_delete_preserves_access_logs() {
        let source = source();
        let ev1 = EntityRef::new(EntityType::Evidence, "ev-1");

        let receipt = source
            .secure_delete(&ev1, &[EntityType::AccessLog], at(2024))
            .await
            .unwrap();
        assert_eq!(receipt.removed, vec![ev1.clone()]);
        assert_eq!(receipt.preserved.len(), 1);
        assert!(source.contains(&EntityRef::new(EntityType::AccessLog, "log-1")).await);

        let case = EntityRef::new(EntityType::Case, "case-1");
        let receipt = source.secure_delete(&case, &[], at(2024)).await.unwrap();
        assert_eq!(receipt.removed.len(), 2);
        assert!(!source.contains(&EntityRef::new(EntityType::AccessLog, "log-2")).await);

        assert!(source.secure_delete(&ev1, &[], at(2024)).await.is_err());
        assert_eq!(source.deletions().await.len(), 2);
    }
}
