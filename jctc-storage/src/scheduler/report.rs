//! Pass reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use jctc_core::{EligibilityDecision, EntityRef, ErrorKind, LifecycleAction, RetentionError};

/// Per-pass counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassCounts {
    pub evaluated: usize,
    pub archived: usize,
    pub deleted: usize,
    pub notified: usize,
    /// Deadline notices suppressed because an earlier pass sent them
    pub already_notified: usize,
    pub legal_hold_conflicts: usize,
    pub manual: usize,
    pub policy_conflicts: usize,
    pub already_archived: usize,
    /// Skipped because another pass held the entity lock
    pub locked: usize,
    pub requeued: usize,
    pub failed: usize,
    /// Actionable items dropped after cancellation
    pub cancelled: usize,
}

/// A lifecycle action that did not complete
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityFailure {
    pub entity_ref: EntityRef,
    pub action: LifecycleAction,
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: u32,
    /// Scheduled again for the next pass
    pub requeued: bool,
}

impl EntityFailure {
    pub fn new(entity_ref: EntityRef, action: LifecycleAction, error: &RetentionError, attempts: u32) -> Self {
        Self {
            entity_ref,
            action,
            kind: error.kind(),
            message: error.to_string(),
            attempts,
            requeued: false,
        }
    }
}

/// Result of one scheduler pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassReport {
    pub pass_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub dry_run: bool,
    /// Policy selection; empty = all active policies
    pub policy_ids: Vec<String>,
    pub entity_types: Vec<String>,
    pub counts: PassCounts,
    /// Every decision on a dry run; decisions that led to work or need
    /// attention otherwise
    pub decisions: Vec<EligibilityDecision>,
    pub failures: Vec<EntityFailure>,
    pub errors_by_kind: BTreeMap<ErrorKind, usize>,
    /// Enumeration problems that skipped part of the population
    pub source_errors: Vec<String>,
    pub cancelled: bool,
    pub hold_cache_hits: u64,
    pub hold_cache_misses: u64,
}

impl PassReport {
    pub fn new(pass_id: String, started_at: DateTime<Utc>, dry_run: bool, policy_ids: Vec<String>) -> Self {
        Self {
            pass_id,
            started_at,
            finished_at: None,
            duration_ms: 0,
            dry_run,
            policy_ids,
            entity_types: Vec::new(),
            counts: PassCounts::default(),
            decisions: Vec::new(),
            failures: Vec::new(),
            errors_by_kind: BTreeMap::new(),
            source_errors: Vec::new(),
            cancelled: false,
            hold_cache_hits: 0,
            hold_cache_misses: 0,
        }
    }

    pub fn record_error(&mut self, kind: ErrorKind) {
        *self.errors_by_kind.entry(kind).or_default() += 1;
    }

    pub fn record_failure(&mut self, failure: EntityFailure) {
        self.record_error(failure.kind);
        self.counts.failed += 1;
        if failure.requeued {
            self.counts.requeued += 1;
        }
        self.failures.push(failure);
    }

    /// Decisions with a given action
    pub fn decisions_for(&self, action: LifecycleAction) -> impl Iterator<Item = &EligibilityDecision> {
        self.decisions.iter().filter(move |d| d.action == action)
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty() || !self.source_errors.is_empty()
    }
}
