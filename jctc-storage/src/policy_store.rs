//! Retention Policy Store
//!
//! Holds the policy set passed explicitly to the scheduler. Policies are
//! soft-deleted: deactivation keeps the record and its audit trail.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use jctc_core::{
    Clock, Condition, EntityType, PolicyAuditAction, RetentionError, RetentionPeriod,
    RetentionPolicy, RetentionResult, SystemClock,
};

/// Mutable fields of a policy
#[derive(Debug, Clone, Default)]
pub struct PolicyUpdate {
    pub name: Option<String>,
    pub retention_period: Option<RetentionPeriod>,
    pub auto_archive: Option<bool>,
    pub auto_delete: Option<bool>,
    pub conditions: Option<Vec<Condition>>,
    pub legal_hold_override: Option<bool>,
    pub notification_days: Option<Vec<u32>>,
}

impl PolicyUpdate {
    fn describe(&self) -> String {
        let mut changed = Vec::new();
        if self.name.is_some() {
            changed.push("name");
        }
        if self.retention_period.is_some() {
            changed.push("retention_period");
        }
        if self.auto_archive.is_some() {
            changed.push("auto_archive");
        }
        if self.auto_delete.is_some() {
            changed.push("auto_delete");
        }
        if self.conditions.is_some() {
            changed.push("conditions");
        }
        if self.legal_hold_override.is_some() {
            changed.push("legal_hold_override");
        }
        if self.notification_days.is_some() {
            changed.push("notification_days");
        }
        format!("Changed: {}", changed.join(", "))
    }
}

/// Policy store
pub struct PolicyStore {
    policies: RwLock<HashMap<String, RetentionPolicy>>,
    next_seq: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl PolicyStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            policies: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
            clock,
        }
    }

    /// Register a new policy; assigns its creation order
    pub async fn create_policy(&self, mut policy: RetentionPolicy, actor: &str) -> RetentionResult<RetentionPolicy> {
        policy.normalize();
        policy.validate()?;

        let mut policies = self.policies.write().await;
        if policies.contains_key(&policy.id) {
            return Err(RetentionError::Validation(format!(
                "Policy already exists: {}",
                policy.id
            )));
        }

        let now = self.clock.now();
        policy.created_seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        policy.created_at = now;
        policy.updated_at = now;
        policy.active = true;
        policy.audit_trail.clear();
        policy.record_audit(PolicyAuditAction::Created, actor, "Policy created");

        info!(
            policy_id = %policy.id,
            entity_type = %policy.entity_type,
            period = ?policy.retention_period,
            seq = policy.created_seq,
            "Retention policy created"
        );

        policies.insert(policy.id.clone(), policy.clone());
        Ok(policy)
    }

    pub async fn update_policy(
        &self,
        policy_id: &str,
        update: PolicyUpdate,
        actor: &str,
    ) -> RetentionResult<RetentionPolicy> {
        let mut policies = self.policies.write().await;
        let current = policies
            .get(policy_id)
            .ok_or_else(|| RetentionError::NotFound(format!("Policy not found: {}", policy_id)))?;
        if !current.active {
            return Err(RetentionError::Validation(format!(
                "Policy {} is deactivated",
                policy_id
            )));
        }

        let mut updated = current.clone();
        let details = update.describe();
        if let Some(name) = update.name {
            updated.name = name;
        }
        if let Some(period) = update.retention_period {
            updated.retention_period = period;
        }
        if let Some(flag) = update.auto_archive {
            updated.auto_archive = flag;
        }
        if let Some(flag) = update.auto_delete {
            updated.auto_delete = flag;
        }
        if let Some(conditions) = update.conditions {
            updated.conditions = conditions;
        }
        if let Some(flag) = update.legal_hold_override {
            updated.legal_hold_override = flag;
        }
        if let Some(days) = update.notification_days {
            updated.notification_days = days;
        }
        updated.normalize();
        updated.validate()?;

        updated.updated_at = self.clock.now();
        updated.record_audit(PolicyAuditAction::Updated, actor, &details);

        info!(policy_id = %policy_id, %details, "Retention policy updated");
        policies.insert(policy_id.to_string(), updated.clone());
        Ok(updated)
    }

    /// Soft-delete a policy
    pub async fn deactivate_policy(&self, policy_id: &str, actor: &str, reason: &str) -> RetentionResult<RetentionPolicy> {
        let mut policies = self.policies.write().await;
        let policy = policies
            .get_mut(policy_id)
            .ok_or_else(|| RetentionError::NotFound(format!("Policy not found: {}", policy_id)))?;

        if policy.active {
            policy.active = false;
            policy.updated_at = self.clock.now();
            policy.record_audit(PolicyAuditAction::Deactivated, actor, reason);
            info!(policy_id = %policy_id, reason, "Retention policy deactivated");
        }
        Ok(policy.clone())
    }

    pub async fn get_policy(&self, policy_id: &str) -> Option<RetentionPolicy> {
        self.policies.read().await.get(policy_id).cloned()
    }

    /// All policies in creation order
    pub async fn list_policies(&self, include_inactive: bool) -> Vec<RetentionPolicy> {
        let mut policies: Vec<RetentionPolicy> = self
            .policies
            .read()
            .await
            .values()
            .filter(|p| include_inactive || p.active)
            .cloned()
            .collect();
        policies.sort_by_key(|p| p.created_seq);
        policies
    }

    /// Active policies, optionally restricted to a selection of ids
    pub async fn active_policies(&self, selection: Option<&[String]>) -> RetentionResult<Vec<RetentionPolicy>> {
        let policies = self.list_policies(false).await;
        let Some(selection) = selection else {
            return Ok(policies);
        };

        let known: BTreeSet<&str> = policies.iter().map(|p| p.id.as_str()).collect();
        if let Some(missing) = selection.iter().find(|id| !known.contains(id.as_str())) {
            return Err(RetentionError::NotFound(format!(
                "Active policy not found: {}",
                missing
            )));
        }
        Ok(policies
            .into_iter()
            .filter(|p| selection.contains(&p.id))
            .collect())
    }

    /// Entity types governed by at least one of the given policies
    pub fn governed_types(policies: &[RetentionPolicy]) -> Vec<EntityType> {
        let types: BTreeSet<EntityType> = policies.iter().map(|p| p.entity_type).collect();
        types.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(id: &str, entity_type: EntityType, period: RetentionPeriod) -> RetentionPolicy {
        RetentionPolicy::new(id, entity_type, period)
    }

    #[tokio::test]
    async fn test_create_assigns_sequence_and_audit() {
        let store = PolicyStore::default();
        let first = store
            .create_policy(policy("p1", EntityType::Case, RetentionPeriod::Years7), "admin")
            .await
            .unwrap();
        let second = store
            .create_policy(policy("p2", EntityType::Case, RetentionPeriod::Years5), "admin")
            .await
            .unwrap();

        assert!(first.created_seq < second.created_seq);
        assert_eq!(first.audit_trail.len(), 1);
        assert_eq!(first.audit_trail[0].action, PolicyAuditAction::Created);

        let duplicate = store
            .create_policy(policy("p1", EntityType::Case, RetentionPeriod::Years7), "admin")
            .await;
        assert!(matches!(duplicate, Err(RetentionError::Validation(_))));
    }

    #[tokio::test]
    async fn test_permanent_auto_delete_rejected() {
        let store = PolicyStore::default();
        let bad = policy("p1", EntityType::Evidence, RetentionPeriod::Permanent).with_auto_delete();
        assert!(store.create_policy(bad, "admin").await.is_err());

        store
            .create_policy(policy("p2", EntityType::Evidence, RetentionPeriod::Permanent), "admin")
            .await
            .unwrap();
        let update = PolicyUpdate {
            auto_delete: Some(true),
            ..Default::default()
        };
        assert!(store.update_policy("p2", update, "admin").await.is_err());
        assert!(!store.get_policy("p2").await.unwrap().auto_delete);
    }

    #[tokio::test]
    async fn test_deactivate_keeps_record() {
        let store = PolicyStore::default();
        store
            .create_policy(policy("p1", EntityType::Task, RetentionPeriod::Years1), "admin")
            .await
            .unwrap();

        let deactivated = store.deactivate_policy("p1", "admin", "superseded").await.unwrap();
        assert!(!deactivated.active);
        assert_eq!(deactivated.audit_trail.len(), 2);

        assert!(store.list_policies(false).await.is_empty());
        assert_eq!(store.list_policies(true).await.len(), 1);
        assert!(store
            .update_policy("p1", PolicyUpdate::default(), "admin")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_selection_and_governed_types() {
        let store = PolicyStore::default();
        for (id, t) in [("a", EntityType::Case), ("b", EntityType::Evidence), ("c", EntityType::Case)] {
            store
                .create_policy(policy(id, t, RetentionPeriod::Years3), "admin")
                .await
                .unwrap();
        }

        let all = store.active_policies(None).await.unwrap();
        assert_eq!(
            PolicyStore::governed_types(&all),
            vec![EntityType::Case, EntityType::Evidence]
        );

        let selected = store.active_policies(Some(&["b".to_string()])).await.unwrap();
        assert_eq!(PolicyStore::governed_types(&selected), vec![EntityType::Evidence]);

        assert!(store.active_policies(Some(&["zzz".to_string()])).await.is_err());
    }
}
