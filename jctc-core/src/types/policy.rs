//! Retention Policy Definitions
//!
//! A policy states how long records of one entity type are kept and what
//! happens once that period has elapsed.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use super::condition::Condition;
use super::entity::{EntitySnapshot, EntityType};
use crate::error::{RetentionError, RetentionResult};

/// Minimum time a record must be kept
///
/// Variants are declared shortest to longest, so the derived ordering ranks
/// `Permanent` as the most conservative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RetentionPeriod {
    #[serde(rename = "YEARS_1")]
    Years1,
    #[serde(rename = "YEARS_3")]
    Years3,
    #[serde(rename = "YEARS_5")]
    Years5,
    #[serde(rename = "YEARS_7")]
    Years7,
    #[serde(rename = "YEARS_10")]
    Years10,
    #[serde(rename = "PERMANENT")]
    Permanent,
}

impl RetentionPeriod {
    /// Length in years, `None` for permanent retention
    pub fn years(&self) -> Option<u32> {
        match self {
            Self::Years1 => Some(1),
            Self::Years3 => Some(3),
            Self::Years5 => Some(5),
            Self::Years7 => Some(7),
            Self::Years10 => Some(10),
            Self::Permanent => None,
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent)
    }

    /// Calendar deadline counted from `reference`
    pub fn deadline_from(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let years = self.years()?;
        reference.checked_add_months(Months::new(years * 12))
    }
}

impl std::fmt::Display for RetentionPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.years() {
            Some(y) => write!(f, "YEARS_{}", y),
            None => write!(f, "PERMANENT"),
        }
    }
}

/// Policy audit action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAuditAction {
    Created,
    Updated,
    Deactivated,
}

/// Policy audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyAuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: PolicyAuditAction,
    pub actor: String,
    pub details: String,
}

/// Retention policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub entity_type: EntityType,
    pub retention_period: RetentionPeriod,
    #[serde(default)]
    pub auto_archive: bool,
    #[serde(default)]
    pub auto_delete: bool,
    /// Conjunction: every condition must hold
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Allow archival of content under a metadata-only hold
    #[serde(default)]
    pub legal_hold_override: bool,
    /// Days before the deadline at which to notify, largest first
    #[serde(default)]
    pub notification_days: Vec<u32>,
    /// Soft-delete flag; inactive policies are never evaluated
    #[serde(default = "default_active")]
    pub active: bool,
    /// Creation order assigned by the policy store
    #[serde(default)]
    pub created_seq: u64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub audit_trail: Vec<PolicyAuditEntry>,
}

fn default_active() -> bool {
    true
}

impl RetentionPolicy {
    /// Create an active policy with no automation
    pub fn new(id: &str, entity_type: EntityType, retention_period: RetentionPeriod) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            name: id.to_string(),
            entity_type,
            retention_period,
            auto_archive: false,
            auto_delete: false,
            conditions: Vec::new(),
            legal_hold_override: false,
            notification_days: Vec::new(),
            active: true,
            created_seq: 0,
            created_at: now,
            updated_at: now,
            audit_trail: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_auto_archive(mut self) -> Self {
        self.auto_archive = true;
        self
    }

    pub fn with_auto_delete(mut self) -> Self {
        self.auto_delete = true;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_legal_hold_override(mut self) -> Self {
        self.legal_hold_override = true;
        self
    }

    pub fn with_notification_days(mut self, days: Vec<u32>) -> Self {
        self.notification_days = days;
        self.normalize();
        self
    }

    /// Sort notification thresholds largest first and drop duplicates
    pub fn normalize(&mut self) {
        self.notification_days.sort_unstable_by(|a, b| b.cmp(a));
        self.notification_days.dedup();
    }

    /// Check structural invariants
    pub fn validate(&self) -> RetentionResult<()> {
        if self.id.trim().is_empty() {
            return Err(RetentionError::Validation("Policy id must not be empty".into()));
        }
        if self.auto_delete && self.retention_period.is_permanent() {
            return Err(RetentionError::Validation(format!(
                "Policy {}: auto_delete requires a finite retention period",
                self.id
            )));
        }
        if self.notification_days.contains(&0) {
            return Err(RetentionError::Validation(format!(
                "Policy {}: notification days must be positive",
                self.id
            )));
        }
        Ok(())
    }

    /// Whether this policy governs the given snapshot
    pub fn applies_to(&self, entity: &EntitySnapshot) -> bool {
        self.active
            && self.entity_type == entity.entity_type()
            && self.conditions.iter().all(|c| c.evaluate(entity))
    }

    /// Automation flags, used to detect ambiguous configurations
    pub fn automation(&self) -> (bool, bool, bool) {
        (self.auto_archive, self.auto_delete, self.legal_hold_override)
    }

    pub fn record_audit(&mut self, action: PolicyAuditAction, actor: &str, details: &str) {
        self.audit_trail.push(PolicyAuditEntry {
            timestamp: Utc::now(),
            action,
            actor: actor.to_string(),
            details: details.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_period_ordering_is_by_length() {
        assert!(RetentionPeriod::Years7 > RetentionPeriod::Years5);
        assert!(RetentionPeriod::Permanent > RetentionPeriod::Years10);
    }

    #[test]
    fn test_deadline_uses_calendar_years() {
        let leap = Utc.with_ymd_and_hms(2016, 2, 29, 12, 0, 0).unwrap();
        let deadline = RetentionPeriod::Years1.deadline_from(leap).unwrap();
        assert_eq!(deadline, Utc.with_ymd_and_hms(2017, 2, 28, 12, 0, 0).unwrap());
        assert!(RetentionPeriod::Permanent.deadline_from(leap).is_none());
    }

    #[test]
    fn test_permanent_auto_delete_rejected() {
        let policy = RetentionPolicy::new("p1", EntityType::AuditLog, RetentionPeriod::Permanent)
            .with_auto_delete();
        assert!(policy.validate().is_err());

        let ok = RetentionPolicy::new("p2", EntityType::AuditLog, RetentionPeriod::Years10)
            .with_auto_delete();
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_notification_days_normalized() {
        let policy = RetentionPolicy::new("p", EntityType::Case, RetentionPeriod::Years5)
            .with_notification_days(vec![7, 30, 7, 90]);
        assert_eq!(policy.notification_days, vec![90, 30, 7]);
    }

    #[test]
    fn test_inactive_policy_never_applies() {
        let mut policy = RetentionPolicy::new("p", EntityType::Case, RetentionPeriod::Years5);
        let case = EntitySnapshot::new(EntityType::Case, "c-1", Utc::now());
        assert!(policy.applies_to(&case));
        policy.active = false;
        assert!(!policy.applies_to(&case));
    }

    #[test]
    fn test_period_serde_names() {
        let json = serde_json::to_string(&RetentionPeriod::Years7).unwrap();
        assert_eq!(json, "\"YEARS_7\"");
        let parsed: RetentionPeriod = serde_json::from_str("\"PERMANENT\"").unwrap();
        assert_eq!(parsed, RetentionPeriod::Permanent);
    }
}
