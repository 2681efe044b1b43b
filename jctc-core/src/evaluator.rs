//! Eligibility Evaluator
//!
//! Decides the lifecycle action for one entity from the policies that govern
//! it and the legal holds that cover it. Pure: no I/O, the caller supplies
//! `now`.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use tracing::{debug, warn};

use crate::types::{
    DecisionReason, EligibilityDecision, EntitySnapshot, EntityType, LegalHold, LifecycleAction,
    PolicyConflict, RetentionPolicy,
};

/// Eligibility evaluator
#[derive(Debug, Clone, Default)]
pub struct EligibilityEvaluator;

impl EligibilityEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate one entity.
    ///
    /// `policies` may contain policies for other types or inactive ones;
    /// `holds` may contain holds that are expired or do not cover the entity.
    /// Both are filtered here.
    pub fn evaluate(
        &self,
        entity: &EntitySnapshot,
        policies: &[RetentionPolicy],
        holds: &[LegalHold],
        now: DateTime<Utc>,
    ) -> EligibilityDecision {
        let entity_ref = entity.entity_ref.clone();

        let mut candidates: Vec<&RetentionPolicy> =
            policies.iter().filter(|p| p.applies_to(entity)).collect();

        if candidates.is_empty() {
            return EligibilityDecision::none(entity_ref, DecisionReason::NoMatchingPolicy, now);
        }

        candidates.sort_by(|a, b| precedence(a, b));
        let policy = candidates[0];
        let conflict = detect_conflict(&candidates);

        if let Some(conflict) = &conflict {
            if conflict.resolved_by_creation_order {
                warn!(
                    entity = %entity_ref,
                    selected = %conflict.selected_policy_id,
                    candidates = ?conflict.policy_ids,
                    "Ambiguous retention policies, resolved by creation order"
                );
            } else {
                debug!(
                    entity = %entity_ref,
                    selected = %conflict.selected_policy_id,
                    "Multiple retention policies matched"
                );
            }
        }

        let mut decision = EligibilityDecision {
            entity_ref,
            action: LifecycleAction::None,
            reason: DecisionReason::PermanentRetention,
            policy_id: Some(policy.id.clone()),
            matched_conditions: policy.conditions.iter().map(|c| c.leaf_count()).sum(),
            protected_sub_records: Vec::new(),
            conflict,
            evaluated_at: now,
        };

        if policy.retention_period.is_permanent() {
            return decision;
        }
        let Some(reference) = entity.reference_date() else {
            decision.reason = DecisionReason::ReferenceDateMissing {
                field: entity.entity_type().reference_field().to_string(),
            };
            return decision;
        };
        let deadline = match policy.retention_period.deadline_from(reference) {
            Some(deadline) => deadline,
            None => return decision,
        };

        if now < deadline {
            let days_remaining = (deadline - now).num_days();
            // Smallest threshold that still encloses the remaining days
            let threshold = policy
                .notification_days
                .iter()
                .copied()
                .filter(|t| days_remaining <= i64::from(*t))
                .min();

            match threshold {
                Some(threshold_days) => {
                    decision.action = LifecycleAction::Notify;
                    decision.reason = DecisionReason::ApproachingDeadline {
                        deadline,
                        days_remaining,
                        threshold_days,
                    };
                }
                None => {
                    decision.reason = DecisionReason::RetentionNotElapsed { deadline };
                }
            }
            return decision;
        }

        let intended = if policy.auto_archive {
            LifecycleAction::Archive
        } else if policy.auto_delete {
            LifecycleAction::Delete
        } else {
            decision.reason = DecisionReason::ManualActionRequired;
            return decision;
        };

        let subject = entity.hold_subject();
        let covering: Vec<&LegalHold> = holds
            .iter()
            .filter(|h| h.is_active_at(now) && h.covers(&subject))
            .collect();

        if covering.iter().any(|h| h.scope.protects_access_logs()) {
            decision.protected_sub_records.push(EntityType::AccessLog);
        }

        let mut blocking: Vec<String> = covering
            .iter()
            .filter(|h| match intended {
                LifecycleAction::Archive => h.scope.blocks_archive(policy.legal_hold_override),
                LifecycleAction::Delete => h.scope.blocks_delete(),
                _ => false,
            })
            .map(|h| h.hold_id.clone())
            .collect();

        if !blocking.is_empty() {
            blocking.sort();
            blocking.dedup();
            decision.reason = DecisionReason::LegalHoldConflict { hold_ids: blocking };
            return decision;
        }

        decision.action = intended;
        decision.reason = DecisionReason::RetentionElapsed { deadline };
        decision
    }
}

/// Longest period first, then earliest created
fn precedence(a: &RetentionPolicy, b: &RetentionPolicy) -> Ordering {
    b.retention_period
        .cmp(&a.retention_period)
        .then(a.created_seq.cmp(&b.created_seq))
        .then(a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

fn detect_conflict(sorted: &[&RetentionPolicy]) -> Option<PolicyConflict> {
    let selected = sorted.first()?;
    let disagreeing: Vec<&&RetentionPolicy> = sorted[1..]
        .iter()
        .filter(|p| {
            p.retention_period != selected.retention_period
                || p.automation() != selected.automation()
        })
        .collect();

    if disagreeing.is_empty() {
        return None;
    }

    let tie = disagreeing
        .iter()
        .any(|p| p.retention_period == selected.retention_period);

    let detail = if tie {
        format!(
            "{} policies share period {} with different automation; {} selected by creation order",
            disagreeing
                .iter()
                .filter(|p| p.retention_period == selected.retention_period)
                .count()
                + 1,
            selected.retention_period,
            selected.id
        )
    } else {
        format!(
            "{} selected with the longest period {}",
            selected.id, selected.retention_period
        )
    };

    Some(PolicyConflict {
        policy_ids: sorted.iter().map(|p| p.id.clone()).collect(),
        selected_policy_id: selected.id.clone(),
        resolved_by_creation_order: tie,
        detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Condition, EntityRef, HoldReason, HoldScope, RetentionPeriod};
    use chrono::{Duration, Months};

    fn years_ago(now: DateTime<Utc>, years: u32) -> DateTime<Utc> {
        now.checked_sub_months(Months::new(years * 12)).unwrap()
    }

    fn evidence_closed(now: DateTime<Utc>, years: u32) -> EntitySnapshot {
        EntitySnapshot::new(EntityType::Evidence, "ev-1", years_ago(now, 12))
            .with_case("case-1")
            .with_field("closed_at", years_ago(now, years))
    }

    fn seven_year_archive() -> RetentionPolicy {
        RetentionPolicy::new("evidence-7y", EntityType::Evidence, RetentionPeriod::Years7)
            .with_auto_archive()
    }

    #[test]
    fn test_no_matching_policy() {
        let now = Utc::now();
        let entity = evidence_closed(now, 8);
        let policy = RetentionPolicy::new("case-5y", EntityType::Case, RetentionPeriod::Years5);

        let decision = EligibilityEvaluator::new().evaluate(&entity, &[policy], &[], now);
        assert_eq!(decision.action, LifecycleAction::None);
        assert_eq!(decision.reason, DecisionReason::NoMatchingPolicy);
        assert!(decision.policy_id.is_none());
    }

    #[test]
    fn test_elapsed_evidence_is_archived() {
        let now = Utc::now();
        let entity = evidence_closed(now, 8);

        let decision = EligibilityEvaluator::new().evaluate(&entity, &[seven_year_archive()], &[], now);
        assert_eq!(decision.action, LifecycleAction::Archive);
        assert_eq!(decision.reason.code(), "retention_elapsed");
        assert_eq!(decision.policy_id.as_deref(), Some("evidence-7y"));
    }

    #[test]
    fn test_litigation_hold_blocks_archive() {
        let now = Utc::now();
        let entity = evidence_closed(now, 8);
        let hold = LegalHold::new("hold-1", "Doe v. Roe", HoldScope::AllData, HoldReason::Litigation)
            .effective_from(now - Duration::days(10))
            .with_entity(entity.entity_ref.clone());

        let decision =
            EligibilityEvaluator::new().evaluate(&entity, &[seven_year_archive()], &[hold], now);
        assert_eq!(decision.action, LifecycleAction::None);
        assert_eq!(decision.blocking_hold_ids(), ["hold-1".to_string()]);
    }

    #[test]
    fn test_all_data_hold_never_yields_delete() {
        let now = Utc::now();
        let policy = RetentionPolicy::new("ev-del", EntityType::Evidence, RetentionPeriod::Years1)
            .with_auto_delete();
        let hold = LegalHold::new("hold-2", "Preserve", HoldScope::AllData, HoldReason::Preservation)
            .effective_from(now - Duration::days(1))
            .with_entity(EntityRef::new(EntityType::Case, "case-1"));

        for years in [0, 1, 2, 5, 20] {
            let entity = evidence_closed(now, years);
            let decision = EligibilityEvaluator::new().evaluate(
                &entity,
                std::slice::from_ref(&policy),
                std::slice::from_ref(&hold),
                now,
            );
            assert_ne!(decision.action, LifecycleAction::Delete);
        }
    }

    #[test]
    fn test_expired_hold_does_not_block() {
        let now = Utc::now();
        let entity = evidence_closed(now, 8);
        let hold = LegalHold::new("hold-3", "Old", HoldScope::AllData, HoldReason::Litigation)
            .effective_from(now - Duration::days(100))
            .expiring_at(now - Duration::days(1))
            .with_entity(entity.entity_ref.clone());

        let decision =
            EligibilityEvaluator::new().evaluate(&entity, &[seven_year_archive()], &[hold], now);
        assert_eq!(decision.action, LifecycleAction::Archive);
    }

    #[test]
    fn test_permanent_is_always_none() {
        let now = Utc::now();
        let policy = RetentionPolicy::new("audit-forever", EntityType::AuditLog, RetentionPeriod::Permanent)
            .with_auto_archive()
            .with_notification_days(vec![30]);
        let entity = EntitySnapshot::new(EntityType::AuditLog, "a-1", years_ago(now, 50));

        let decision = EligibilityEvaluator::new().evaluate(&entity, &[policy], &[], now);
        assert_eq!(decision.action, LifecycleAction::None);
        assert_eq!(decision.reason, DecisionReason::PermanentRetention);
    }

    #[test]
    fn test_longest_period_wins() {
        let now = Utc::now();
        let case = EntitySnapshot::new(EntityType::Case, "case-1", years_ago(now, 10))
            .with_field("closed_at", years_ago(now, 6));
        let mut five = RetentionPolicy::new("case-5y", EntityType::Case, RetentionPeriod::Years5)
            .with_auto_archive();
        five.created_seq = 1;
        let mut seven = RetentionPolicy::new("case-7y", EntityType::Case, RetentionPeriod::Years7)
            .with_auto_archive();
        seven.created_seq = 2;

        let decision = EligibilityEvaluator::new().evaluate(&case, &[five, seven], &[], now);
        assert_eq!(decision.policy_id.as_deref(), Some("case-7y"));
        assert_eq!(decision.action, LifecycleAction::None);
        assert_eq!(decision.reason.code(), "retention_not_elapsed");
        let conflict = decision.conflict.unwrap();
        assert!(!conflict.resolved_by_creation_order);
    }

    #[test]
    fn test_equal_periods_resolved_by_creation_order() {
        let now = Utc::now();
        let task = EntitySnapshot::new(EntityType::Task, "t-1", years_ago(now, 4));
        let mut deleter = RetentionPolicy::new("task-delete", EntityType::Task, RetentionPeriod::Years3)
            .with_auto_delete();
        deleter.created_seq = 2;
        let mut archiver = RetentionPolicy::new("task-archive", EntityType::Task, RetentionPeriod::Years3)
            .with_auto_archive();
        archiver.created_seq = 1;

        let decision = EligibilityEvaluator::new().evaluate(&task, &[deleter, archiver], &[], now);
        assert_eq!(decision.policy_id.as_deref(), Some("task-archive"));
        assert_eq!(decision.action, LifecycleAction::Archive);
        assert!(decision.conflict.unwrap().resolved_by_creation_order);
    }

    #[test]
    fn test_notification_reports_smallest_enclosing_threshold() {
        let now = Utc::now();
        let reference = years_ago(now, 1) + Duration::days(20);
        let party = EntitySnapshot::new(EntityType::Party, "p-1", reference);
        let policy = RetentionPolicy::new("party-1y", EntityType::Party, RetentionPeriod::Years1)
            .with_auto_delete()
            .with_notification_days(vec![90, 30, 7]);

        let decision = EligibilityEvaluator::new().evaluate(&party, &[policy], &[], now);
        assert_eq!(decision.action, LifecycleAction::Notify);
        match decision.reason {
            DecisionReason::ApproachingDeadline { threshold_days, days_remaining, .. } => {
                assert_eq!(threshold_days, 30);
                assert!(days_remaining <= 20);
            }
            other => panic!("unexpected reason {other:?}"),
        }
    }

    #[test]
    fn test_metadata_hold_with_override_allows_archive_only() {
        let now = Utc::now();
        let entity = evidence_closed(now, 8);
        let hold = LegalHold::new("hold-4", "Regulator", HoldScope::MetadataOnly, HoldReason::Regulatory)
            .effective_from(now - Duration::days(1))
            .with_entity(entity.entity_ref.clone());

        let archive = seven_year_archive().with_legal_hold_override();
        let decision = EligibilityEvaluator::new().evaluate(
            &entity,
            &[archive],
            std::slice::from_ref(&hold),
            now,
        );
        assert_eq!(decision.action, LifecycleAction::Archive);

        let delete = RetentionPolicy::new("ev-del", EntityType::Evidence, RetentionPeriod::Years7)
            .with_auto_delete()
            .with_legal_hold_override();
        let decision = EligibilityEvaluator::new().evaluate(&entity, &[delete], &[hold], now);
        assert_eq!(decision.action, LifecycleAction::None);
        assert!(decision.is_legal_hold_conflict());
    }

    #[test]
    fn test_access_log_hold_protects_sub_records() {
        let now = Utc::now();
        let entity = evidence_closed(now, 8);
        let hold = LegalHold::new("hold-5", "Access audit", HoldScope::AccessLogs, HoldReason::Internal)
            .effective_from(now - Duration::days(1))
            .with_entity(entity.entity_ref.clone());
        let policy = RetentionPolicy::new("ev-del", EntityType::Evidence, RetentionPeriod::Years7)
            .with_auto_delete();

        let decision = EligibilityEvaluator::new().evaluate(&entity, &[policy], &[hold], now);
        assert_eq!(decision.action, LifecycleAction::Delete);
        assert_eq!(decision.protected_sub_records, vec![EntityType::AccessLog]);
    }

    #[test]
    fn test_open_case_is_never_acted_on() {
        let now = Utc::now();
        let open_case = EntitySnapshot::new(EntityType::Case, "case-open", years_ago(now, 10));
        let policy = RetentionPolicy::new("case-7y", EntityType::Case, RetentionPeriod::Years7)
            .with_auto_delete()
            .with_notification_days(vec![30]);

        let decision = EligibilityEvaluator::new().evaluate(&open_case, &[policy], &[], now);
        assert_eq!(decision.action, LifecycleAction::None);
        assert_eq!(
            decision.reason,
            DecisionReason::ReferenceDateMissing {
                field: "closed_at".to_string()
            }
        );
        assert_eq!(decision.policy_id.as_deref(), Some("case-7y"));
    }

    #[test]
    fn test_manual_action_when_no_automation() {
        let now = Utc::now();
        let entity = evidence_closed(now, 8);
        let policy = RetentionPolicy::new("ev-manual", EntityType::Evidence, RetentionPeriod::Years7)
            .with_condition(Condition::exists("closed_at"));

        let decision = EligibilityEvaluator::new().evaluate(&entity, &[policy], &[], now);
        assert_eq!(decision.reason, DecisionReason::ManualActionRequired);
        assert_eq!(decision.matched_conditions, 1);
    }
}
