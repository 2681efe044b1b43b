//! Eligibility Decisions
//!
//! Transient output of the evaluator; never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::{EntityRef, EntityType};

/// Lifecycle action for an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleAction {
    None,
    Archive,
    Delete,
    Notify,
}

/// Why the evaluator chose an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum DecisionReason {
    NoMatchingPolicy,
    PermanentRetention,
    /// The event retention runs from has not happened yet
    ReferenceDateMissing {
        field: String,
    },
    RetentionNotElapsed {
        deadline: DateTime<Utc>,
    },
    ApproachingDeadline {
        deadline: DateTime<Utc>,
        days_remaining: i64,
        threshold_days: u32,
    },
    RetentionElapsed {
        deadline: DateTime<Utc>,
    },
    LegalHoldConflict {
        hold_ids: Vec<String>,
    },
    ManualActionRequired,
}

impl DecisionReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoMatchingPolicy => "no_matching_policy",
            Self::PermanentRetention => "permanent_retention",
            Self::ReferenceDateMissing { .. } => "reference_date_missing",
            Self::RetentionNotElapsed { .. } => "retention_not_elapsed",
            Self::ApproachingDeadline { .. } => "approaching_deadline",
            Self::RetentionElapsed { .. } => "retention_elapsed",
            Self::LegalHoldConflict { .. } => "legal_hold_conflict",
            Self::ManualActionRequired => "manual_action_required",
        }
    }
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Ambiguity detected among matching policies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConflict {
    /// Every matching policy, in precedence order
    pub policy_ids: Vec<String>,
    pub selected_policy_id: String,
    /// Top candidates shared a period, so creation order decided
    pub resolved_by_creation_order: bool,
    pub detail: String,
}

/// Evaluator output for one entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityDecision {
    pub entity_ref: EntityRef,
    pub action: LifecycleAction,
    pub reason: DecisionReason,
    /// Policy that triggered the decision
    pub policy_id: Option<String>,
    /// Conditions of the triggering policy that matched
    pub matched_conditions: usize,
    /// Sub-record types that must survive a delete
    #[serde(default)]
    pub protected_sub_records: Vec<EntityType>,
    #[serde(default)]
    pub conflict: Option<PolicyConflict>,
    pub evaluated_at: DateTime<Utc>,
}

impl EligibilityDecision {
    pub fn none(entity_ref: EntityRef, reason: DecisionReason, evaluated_at: DateTime<Utc>) -> Self {
        Self {
            entity_ref,
            action: LifecycleAction::None,
            reason,
            policy_id: None,
            matched_conditions: 0,
            protected_sub_records: Vec::new(),
            conflict: None,
            evaluated_at,
        }
    }

    /// Whether the scheduler must dispatch work for this decision
    pub fn is_actionable(&self) -> bool {
        self.action != LifecycleAction::None
    }

    pub fn is_legal_hold_conflict(&self) -> bool {
        matches!(self.reason, DecisionReason::LegalHoldConflict { .. })
    }

    pub fn blocking_hold_ids(&self) -> &[String] {
        match &self.reason {
            DecisionReason::LegalHoldConflict { hold_ids } => hold_ids,
            _ => &[],
        }
    }
}
