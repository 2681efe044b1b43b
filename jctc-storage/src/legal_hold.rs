//! Legal Hold Registry
//!
//! Stores legal holds and answers "which holds cover this record right now".
//! Holds are indexed by covered entity, by case and by class-scoped entity
//! type so lookups never scan the whole registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use jctc_core::{
    EntityRef, EntitySnapshot, EntityType, HoldSubject, LegalHold, LegalHoldStatus, RetentionError,
    RetentionResult,
};

#[derive(Default)]
struct RegistryInner {
    /// Holds by ID
    holds: HashMap<String, LegalHold>,
    /// Index: entity -> hold_ids
    by_entity: HashMap<EntityRef, HashSet<String>>,
    /// Index: case_id -> hold_ids naming that case
    by_case: HashMap<String, HashSet<String>>,
    /// Index: entity type -> hold_ids with a class scope on it
    by_type: HashMap<EntityType, HashSet<String>>,
}

impl RegistryInner {
    fn index(&mut self, hold: &LegalHold) {
        for entity in &hold.entities {
            self.index_entity(&hold.hold_id, entity);
        }
        for scope in &hold.class_scopes {
            self.by_type
                .entry(scope.entity_type)
                .or_default()
                .insert(hold.hold_id.clone());
        }
    }

    fn index_entity(&mut self, hold_id: &str, entity: &EntityRef) {
        self.by_entity
            .entry(entity.clone())
            .or_default()
            .insert(hold_id.to_string());
        if entity.entity_type == EntityType::Case {
            self.by_case
                .entry(entity.entity_id.clone())
                .or_default()
                .insert(hold_id.to_string());
        }
    }

    fn collect<'a>(&self, ids: impl Iterator<Item = &'a String>) -> Vec<LegalHold> {
        let mut seen: HashSet<&String> = HashSet::new();
        ids.filter(|id| seen.insert(*id))
            .filter_map(|id| self.holds.get(id))
            .cloned()
            .collect()
    }
}

/// Legal hold registry
pub struct LegalHoldRegistry {
    inner: RwLock<RegistryInner>,
    /// Bumped on every mutation
    generation: AtomicU64,
}

impl LegalHoldRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// Current mutation generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Apply a new legal hold
    pub async fn apply_hold(&self, hold: LegalHold) -> RetentionResult<()> {
        if hold.hold_id.trim().is_empty() {
            return Err(RetentionError::Validation("Hold id must not be empty".into()));
        }
        if hold.entities.is_empty() && hold.class_scopes.is_empty() {
            return Err(RetentionError::Validation(format!(
                "Hold {} covers no entities",
                hold.hold_id
            )));
        }
        if let Some(expiration) = hold.expiration_date {
            if expiration <= hold.effective_date {
                return Err(RetentionError::Validation(format!(
                    "Hold {} expires before it takes effect",
                    hold.hold_id
                )));
            }
        }

        let mut inner = self.inner.write().await;
        if inner.holds.contains_key(&hold.hold_id) {
            return Err(RetentionError::Validation(format!(
                "Hold {} already exists",
                hold.hold_id
            )));
        }

        inner.index(&hold);
        info!(
            hold_id = %hold.hold_id,
            scope = ?hold.scope,
            reason = ?hold.reason,
            entity_count = hold.entities.len(),
            class_scopes = hold.class_scopes.len(),
            "Legal hold applied"
        );
        inner.holds.insert(hold.hold_id.clone(), hold);
        drop(inner);

        self.bump();
        Ok(())
    }

    /// Close a hold; it stays in the registry for audit
    pub async fn close_hold(&self, hold_id: &str, reason: &str, at: DateTime<Utc>) -> RetentionResult<()> {
        let mut inner = self.inner.write().await;
        let hold = inner
            .holds
            .get_mut(hold_id)
            .ok_or_else(|| RetentionError::NotFound(format!("Legal hold not found: {}", hold_id)))?;

        if hold.status == LegalHoldStatus::Closed {
            return Err(RetentionError::Validation(format!("Hold {} already closed", hold_id)));
        }
        hold.close(reason, at);
        drop(inner);

        self.bump();
        info!(hold_id = %hold_id, reason = %reason, "Legal hold closed");
        Ok(())
    }

    /// Extend or clear the expiration date
    pub async fn extend_hold(&self, hold_id: &str, until: Option<DateTime<Utc>>) -> RetentionResult<()> {
        let mut inner = self.inner.write().await;
        let hold = inner
            .holds
            .get_mut(hold_id)
            .ok_or_else(|| RetentionError::NotFound(format!("Legal hold not found: {}", hold_id)))?;

        if hold.status == LegalHoldStatus::Closed {
            return Err(RetentionError::Validation("Cannot modify closed hold".into()));
        }
        if let Some(until) = until {
            if until <= hold.effective_date {
                return Err(RetentionError::Validation(format!(
                    "Hold {} cannot expire before it takes effect",
                    hold_id
                )));
            }
        }
        hold.extend(until);
        drop(inner);

        self.bump();
        info!(hold_id = %hold_id, until = ?until, "Legal hold extended");
        Ok(())
    }

    /// Add an entity to an existing hold
    pub async fn add_entity_to_hold(&self, hold_id: &str, entity: EntityRef) -> RetentionResult<()> {
        let mut inner = self.inner.write().await;
        let hold = inner
            .holds
            .get_mut(hold_id)
            .ok_or_else(|| RetentionError::NotFound(format!("Legal hold not found: {}", hold_id)))?;

        if hold.status == LegalHoldStatus::Closed {
            return Err(RetentionError::Validation("Cannot modify closed hold".into()));
        }
        if !hold.add_entity(entity.clone()) {
            return Ok(());
        }
        inner.index_entity(hold_id, &entity);
        drop(inner);

        self.bump();
        debug!(hold_id = %hold_id, entity = %entity, "Entity added to legal hold");
        Ok(())
    }

    pub async fn get_hold(&self, hold_id: &str) -> Option<LegalHold> {
        self.inner.read().await.holds.get(hold_id).cloned()
    }

    /// List holds, optionally only those active at an instant
    pub async fn list_holds(&self, active_at: Option<DateTime<Utc>>) -> Vec<LegalHold> {
        let inner = self.inner.read().await;
        let mut holds: Vec<LegalHold> = inner
            .holds
            .values()
            .filter(|h| active_at.map_or(true, |t| h.is_active_at(t)))
            .cloned()
            .collect();
        holds.sort_by(|a, b| a.hold_id.cmp(&b.hold_id));
        holds
    }

    /// Holds active at `as_of` that cover the subject directly, by class
    /// scope or by case cascade
    pub async fn active_holds_for(&self, subject: &HoldSubject<'_>, as_of: DateTime<Utc>) -> Vec<LegalHold> {
        let inner = self.inner.read().await;

        let direct = inner.by_entity.get(subject.entity_ref).into_iter().flatten();
        let by_type = inner
            .by_type
            .get(&subject.entity_ref.entity_type)
            .into_iter()
            .flatten();
        let by_case = subject
            .case_id
            .filter(|_| subject.entity_ref.entity_type.cascades_from_case())
            .and_then(|case_id| inner.by_case.get(case_id))
            .into_iter()
            .flatten();

        inner
            .collect(direct.chain(by_type).chain(by_case))
            .into_iter()
            .filter(|h| h.is_active_at(as_of) && h.covers(subject))
            .collect()
    }

    /// Holds that cover the subject without consulting the case cascade
    pub async fn direct_holds_for(&self, subject: &HoldSubject<'_>, as_of: DateTime<Utc>) -> Vec<LegalHold> {
        let inner = self.inner.read().await;
        let direct = inner.by_entity.get(subject.entity_ref).into_iter().flatten();
        let by_type = inner
            .by_type
            .get(&subject.entity_ref.entity_type)
            .into_iter()
            .flatten();

        inner
            .collect(direct.chain(by_type))
            .into_iter()
            .filter(|h| h.is_active_at(as_of) && h.covers_directly(subject))
            .collect()
    }

    /// Every hold naming the case, in any state
    pub async fn case_holds(&self, case_id: &str) -> Vec<LegalHold> {
        let inner = self.inner.read().await;
        inner.collect(inner.by_case.get(case_id).into_iter().flatten())
    }

    /// Get statistics
    pub async fn stats(&self, now: DateTime<Utc>) -> LegalHoldStats {
        let inner = self.inner.read().await;
        let mut stats = LegalHoldStats {
            total_holds: inner.holds.len(),
            ..Default::default()
        };

        for hold in inner.holds.values() {
            match hold.status {
                LegalHoldStatus::Closed => stats.closed_holds += 1,
                LegalHoldStatus::Active if hold.is_active_at(now) => {
                    stats.active_holds += 1;
                    stats.covered_entities += hold.entities.len();
                    *stats
                        .active_by_scope
                        .entry(format!("{:?}", hold.scope))
                        .or_default() += 1;
                }
                LegalHoldStatus::Active if hold.effective_date > now => stats.pending_holds += 1,
                LegalHoldStatus::Active => stats.expired_holds += 1,
            }
        }

        stats
    }
}

impl Default for LegalHoldRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Legal hold statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegalHoldStats {
    pub total_holds: usize,
    pub active_holds: usize,
    pub pending_holds: usize,
    pub closed_holds: usize,
    pub expired_holds: usize,
    pub covered_entities: usize,
    pub active_by_scope: BTreeMap<String, usize>,
}

struct CacheEntry {
    loaded_at: Instant,
    generation: u64,
    holds: Arc<Vec<LegalHold>>,
}

/// Per-pass memo of case-level hold lookups
///
/// A case with thousands of evidence items is looked up once per TTL rather
/// than once per item. After the TTL an entry is reloaded only if the
/// registry changed in the meantime.
pub struct PassHoldCache {
    registry: Arc<LegalHoldRegistry>,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PassHoldCache {
    pub fn new(registry: Arc<LegalHoldRegistry>, ttl: Duration) -> Self {
        Self {
            registry,
            ttl,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Candidate holds for an entity; the evaluator makes the final coverage call
    pub async fn holds_for(&self, entity: &EntitySnapshot, as_of: DateTime<Utc>) -> Vec<LegalHold> {
        let subject = entity.hold_subject();
        let mut holds = self.registry.direct_holds_for(&subject, as_of).await;

        let cascading_case = subject
            .case_id
            .filter(|_| subject.entity_ref.entity_type.cascades_from_case());
        if let Some(case_id) = cascading_case {
            let case_holds = self.case_holds(case_id).await;
            for hold in case_holds.iter() {
                if hold.is_active_at(as_of) && !holds.iter().any(|h| h.hold_id == hold.hold_id) {
                    holds.push(hold.clone());
                }
            }
        }

        holds
    }

    async fn case_holds(&self, case_id: &str) -> Arc<Vec<LegalHold>> {
        let mut entries = self.entries.lock().await;
        let generation = self.registry.generation();

        if let Some(entry) = entries.get_mut(case_id) {
            if entry.loaded_at.elapsed() < self.ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return entry.holds.clone();
            }
            if entry.generation == generation {
                entry.loaded_at = Instant::now();
                self.hits.fetch_add(1, Ordering::Relaxed);
                return entry.holds.clone();
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let holds = Arc::new(self.registry.case_holds(case_id).await);
        entries.insert(
            case_id.to_string(),
            CacheEntry {
                loaded_at: Instant::now(),
                generation,
                holds: holds.clone(),
            },
        );
        holds
    }

    /// (hits, misses)
    pub fn counters(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use jctc_core::{HoldReason, HoldScope};

    fn case_hold(id: &str, case_id: &str, scope: HoldScope) -> LegalHold {
        LegalHold::new(id, "Doe v. Roe", scope, HoldReason::Litigation)
            .effective_from(Utc::now() - ChronoDuration::days(1))
            .with_entity(EntityRef::new(EntityType::Case, case_id))
    }

    #[tokio::test]
    async fn test_case_cascade_lookup() {
        let registry = LegalHoldRegistry::new();
        registry
            .apply_hold(case_hold("hold:1", "case-1", HoldScope::AllData))
            .await
            .unwrap();

        let evidence = EntitySnapshot::new(EntityType::Evidence, "ev-1", Utc::now()).with_case("case-1");
        let holds = registry.active_holds_for(&evidence.hold_subject(), Utc::now()).await;
        assert_eq!(holds.len(), 1);

        let unrelated = EntitySnapshot::new(EntityType::Evidence, "ev-2", Utc::now()).with_case("case-2");
        assert!(registry
            .active_holds_for(&unrelated.hold_subject(), Utc::now())
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_closed_hold_kept_but_inactive() {
        let registry = LegalHoldRegistry::new();
        registry
            .apply_hold(case_hold("hold:1", "case-1", HoldScope::AllData))
            .await
            .unwrap();
        let gen = registry.generation();

        registry.close_hold("hold:1", "Settled", Utc::now()).await.unwrap();
        assert!(registry.generation() > gen);

        let case = EntitySnapshot::new(EntityType::Case, "case-1", Utc::now());
        assert!(registry
            .active_holds_for(&case.hold_subject(), Utc::now())
            .await
            .is_empty());
        assert!(registry.get_hold("hold:1").await.is_some());

        let stats = registry.stats(Utc::now()).await;
        assert_eq!(stats.total_holds, 1);
        assert_eq!(stats.closed_holds, 1);
    }

    #[tokio::test]
    async fn test_rejects_duplicate_and_empty_holds() {
        let registry = LegalHoldRegistry::new();
        registry
            .apply_hold(case_hold("hold:1", "case-1", HoldScope::AllData))
            .await
            .unwrap();
        assert!(registry
            .apply_hold(case_hold("hold:1", "case-2", HoldScope::AllData))
            .await
            .is_err());

        let empty = LegalHold::new("hold:2", "Nothing", HoldScope::AllData, HoldReason::Internal);
        assert!(registry.apply_hold(empty).await.is_err());
    }

    #[tokio::test]
    async fn test_add_entity_indexes_it() {
        let registry = LegalHoldRegistry::new();
        registry
            .apply_hold(case_hold("hold:1", "case-1", HoldScope::MetadataOnly))
            .await
            .unwrap();

        let user = EntitySnapshot::new(EntityType::User, "u-9", Utc::now());
        assert!(registry
            .active_holds_for(&user.hold_subject(), Utc::now())
            .await
            .is_empty());

        registry
            .add_entity_to_hold("hold:1", user.entity_ref.clone())
            .await
            .unwrap();
        assert_eq!(
            registry
                .active_holds_for(&user.hold_subject(), Utc::now())
                .await
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_pass_cache_memoizes_case_lookups() {
        let registry = Arc::new(LegalHoldRegistry::new());
        registry
            .apply_hold(case_hold("hold:1", "case-1", HoldScope::AllData))
            .await
            .unwrap();

        let cache = PassHoldCache::new(registry.clone(), Duration::from_secs(60));
        for i in 0..5 {
            let ev = EntitySnapshot::new(EntityType::Evidence, format!("ev-{i}"), Utc::now())
                .with_case("case-1");
            assert_eq!(cache.holds_for(&ev, Utc::now()).await.len(), 1);
        }
        assert_eq!(cache.counters(), (4, 1));
    }

    #[tokio::test]
    async fn test_pass_cache_sees_new_hold_after_ttl() {
        let registry = Arc::new(LegalHoldRegistry::new());
        let cache = PassHoldCache::new(registry.clone(), Duration::from_millis(0));
        let ev = EntitySnapshot::new(EntityType::Evidence, "ev-1", Utc::now()).with_case("case-1");

        assert!(cache.holds_for(&ev, Utc::now()).await.is_empty());
        registry
            .apply_hold(case_hold("hold:1", "case-1", HoldScope::AllData))
            .await
            .unwrap();
        assert_eq!(cache.holds_for(&ev, Utc::now()).await.len(), 1);
    }
}
