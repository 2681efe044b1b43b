//! Retention Scheduler
//!
//! Runs retention passes: enumerate the entities governed by active
//! policies, evaluate each against policies and legal holds, and hand
//! actionable work to a bounded executor.
//!
//! ```text
//! EntitySource ──batches──► evaluate ──mpsc(queue_capacity)──► execute × max_concurrency
//!                              │                                   │
//!                         PassHoldCache                 codec → ArchiveStore → mark_archived
//!                                                       secure_delete / AlertSink
//! ```

pub mod locks;
pub mod notices;
pub mod report;

pub use locks::{EntityLockGuard, EntityLockSet};
pub use notices::{NoticeKey, NoticeLedger, NOTICE_FILE};
pub use report::{EntityFailure, PassCounts, PassReport};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use jctc_core::{
    ArchiveBundle, ArchiveCodec, Clock, DecisionReason, EligibilityDecision, EligibilityEvaluator,
    EntityRef, EntitySnapshot, EntityType, LifecycleAction, RetentionError, RetentionPolicy,
    RetentionResult,
};

use crate::alerts::{AlertKind, AlertSeverity, AlertSink, OperatorAlert};
use crate::archive::ArchiveStore;
use crate::config::SchedulerConfig;
use crate::entity_source::EntitySource;
use crate::legal_hold::{LegalHoldRegistry, PassHoldCache};
use crate::policy_store::PolicyStore;

/// Observable pass state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulerState {
    Idle,
    Enumerating,
    Evaluating,
    Executing,
}

/// Options for one pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PassOptions {
    /// Restrict the pass to these policies; `None` = every active policy
    pub policy_ids: Option<Vec<String>>,
    /// Evaluate only; no archive, delete, notification or source mutation
    pub dry_run: bool,
}

impl PassOptions {
    pub fn dry_run() -> Self {
        Self {
            policy_ids: None,
            dry_run: true,
        }
    }

    pub fn with_policies(mut self, policy_ids: Vec<String>) -> Self {
        self.policy_ids = Some(policy_ids);
        self
    }
}

/// Background task commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCommand {
    RunNow,
    Pause,
    Resume,
    Stop,
}

/// Collaborators of the scheduler
#[derive(Clone)]
pub struct SchedulerDeps {
    pub policies: Arc<PolicyStore>,
    pub holds: Arc<LegalHoldRegistry>,
    pub source: Arc<dyn EntitySource>,
    pub codec: Arc<ArchiveCodec>,
    pub store: Arc<ArchiveStore>,
    pub alerts: Arc<dyn AlertSink>,
    pub notices: Arc<NoticeLedger>,
    pub clock: Arc<dyn Clock>,
}

struct PassContext {
    policies: Vec<RetentionPolicy>,
    hold_cache: PassHoldCache,
    dry_run: bool,
    epoch: u64,
}

struct WorkItem {
    entity: EntitySnapshot,
    decision: EligibilityDecision,
}

enum OutcomeKind {
    Archived,
    AlreadyArchived,
    Deleted,
    Notified,
    /// Deadline notice already delivered by an earlier pass
    AlreadyNotified,
    /// A hold appeared between evaluation and execution
    HoldConflict,
    Locked,
    Cancelled,
    /// Entity disappeared from the source before the action ran
    Vanished,
    Failed(EntityFailure),
}

struct Outcome {
    decision: EligibilityDecision,
    kind: OutcomeKind,
}

type Attempted<T> = (RetentionResult<T>, u32);

/// Retention scheduler
pub struct RetentionScheduler {
    deps: SchedulerDeps,
    config: SchedulerConfig,
    evaluator: EligibilityEvaluator,
    locks: Arc<EntityLockSet>,
    requeue: Mutex<BTreeSet<EntityRef>>,
    state: watch::Sender<SchedulerState>,
    active_passes: AtomicUsize,
    cancel_epoch: watch::Sender<u64>,
}

struct ActivePass<'a> {
    scheduler: &'a RetentionScheduler,
}

impl Drop for ActivePass<'_> {
    fn drop(&mut self) {
        if self.scheduler.active_passes.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.scheduler.state.send_replace(SchedulerState::Idle);
        }
    }
}

impl RetentionScheduler {
    pub fn new(deps: SchedulerDeps, config: SchedulerConfig) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        let (cancel_epoch, _) = watch::channel(0);
        Self {
            deps,
            config,
            evaluator: EligibilityEvaluator::new(),
            locks: Arc::new(EntityLockSet::new()),
            requeue: Mutex::new(BTreeSet::new()),
            state,
            active_passes: AtomicUsize::new(0),
            cancel_epoch,
        }
    }

    pub fn deps(&self) -> &SchedulerDeps {
        &self.deps
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Entity locks shared by every pass of this scheduler
    pub fn locks(&self) -> &Arc<EntityLockSet> {
        &self.locks
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Cancel running passes.
    ///
    /// Work that has not reached `ArchiveStore::put` (or the source delete)
    /// is dropped; committed work is left alone.
    pub fn cancel(&self) {
        self.cancel_epoch.send_modify(|epoch| *epoch += 1);
        info!("Retention pass cancellation requested");
    }

    /// Entities waiting for the next pass after transient failures
    pub async fn requeued(&self) -> Vec<EntityRef> {
        self.requeue.lock().await.iter().cloned().collect()
    }

    fn is_cancelled(&self, epoch: u64) -> bool {
        *self.cancel_epoch.borrow() != epoch
    }

    fn enter(&self) -> ActivePass<'_> {
        self.active_passes.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(SchedulerState::Enumerating);
        ActivePass { scheduler: self }
    }

    /// Run one retention pass
    pub async fn run_pass(&self, options: PassOptions) -> RetentionResult<PassReport> {
        let started = Instant::now();
        let epoch = *self.cancel_epoch.borrow();
        let _active = self.enter();

        let policies = self
            .deps
            .policies
            .active_policies(options.policy_ids.as_deref())
            .await?;
        let types = PolicyStore::governed_types(&policies);

        let mut report = PassReport::new(
            uuid::Uuid::new_v4().to_string(),
            self.deps.clock.now(),
            options.dry_run,
            options.policy_ids.clone().unwrap_or_default(),
        );
        report.entity_types = types.iter().map(ToString::to_string).collect();

        info!(
            pass_id = %report.pass_id,
            dry_run = options.dry_run,
            policies = policies.len(),
            entity_types = ?report.entity_types,
            "Retention pass started"
        );

        let requeued = if options.dry_run {
            self.requeue.lock().await.clone()
        } else {
            std::mem::take(&mut *self.requeue.lock().await)
        };

        let ctx = PassContext {
            policies,
            hold_cache: PassHoldCache::new(self.deps.holds.clone(), self.config.hold_cache_ttl()),
            dry_run: options.dry_run,
            epoch,
        };

        self.state.send_replace(SchedulerState::Evaluating);
        let (tx, rx) = mpsc::channel::<WorkItem>(self.config.queue_capacity.max(1));

        let producer = async {
            self.produce(&ctx, &types, requeued, tx, &mut report).await;
            self.state.send_replace(SchedulerState::Executing);
        };
        let consumer = self.consume(&ctx, rx);
        let ((), outcomes) = tokio::join!(producer, consumer);

        for outcome in outcomes {
            let counts = &mut report.counts;
            if let OutcomeKind::AlreadyNotified = outcome.kind {
                counts.already_notified += 1;
                continue;
            }
            match outcome.kind {
                OutcomeKind::Archived => counts.archived += 1,
                OutcomeKind::AlreadyArchived => counts.already_archived += 1,
                OutcomeKind::Deleted => counts.deleted += 1,
                OutcomeKind::Notified => counts.notified += 1,
                OutcomeKind::HoldConflict => counts.legal_hold_conflicts += 1,
                OutcomeKind::Locked => counts.locked += 1,
                OutcomeKind::Cancelled => {
                    counts.cancelled += 1;
                    report.cancelled = true;
                }
                OutcomeKind::Vanished | OutcomeKind::AlreadyNotified => {}
                OutcomeKind::Failed(failure) => report.record_failure(failure),
            }
            report.decisions.push(outcome.decision);
        }

        let (hits, misses) = ctx.hold_cache.counters();
        report.hold_cache_hits = hits;
        report.hold_cache_misses = misses;
        report.finished_at = Some(self.deps.clock.now());
        report.duration_ms = started.elapsed().as_millis() as u64;

        let c = &report.counts;
        info!(
            pass_id = %report.pass_id,
            dry_run = report.dry_run,
            evaluated = c.evaluated,
            archived = c.archived,
            deleted = c.deleted,
            notified = c.notified,
            hold_conflicts = c.legal_hold_conflicts,
            failed = c.failed,
            requeued = c.requeued,
            cancelled = report.cancelled,
            duration_ms = report.duration_ms,
            "Retention pass finished"
        );

        Ok(report)
    }

    async fn produce(
        &self,
        ctx: &PassContext,
        types: &[EntityType],
        requeued: BTreeSet<EntityRef>,
        tx: mpsc::Sender<WorkItem>,
        report: &mut PassReport,
    ) {
        let mut seen: HashSet<EntityRef> = HashSet::new();
        let mut alerted_conflicts: HashSet<Vec<String>> = HashSet::new();
        let mut deferred: Vec<EntityRef> = Vec::new();

        for entity_ref in requeued {
            if self.is_cancelled(ctx.epoch) || !types.contains(&entity_ref.entity_type) {
                deferred.push(entity_ref);
                continue;
            }
            let (fetched, _) = self
                .with_retry("get_entity", &entity_ref, || {
                    self.deps.source.get_entity(&entity_ref)
                })
                .await;
            match fetched {
                Ok(Some(entity)) => {
                    seen.insert(entity_ref);
                    if !self
                        .dispatch(ctx, entity, &tx, report, &mut alerted_conflicts)
                        .await
                    {
                        break;
                    }
                }
                Ok(None) => debug!(entity = %entity_ref, "Requeued entity no longer exists"),
                Err(e) => {
                    report.record_error(e.kind());
                    report.source_errors.push(format!("{}: {}", entity_ref, e));
                    deferred.push(entity_ref);
                }
            }
        }

        if !ctx.dry_run && !deferred.is_empty() {
            self.requeue.lock().await.extend(deferred);
        }

        let batch_size = self.config.batch_size.max(1);
        'types: for &entity_type in types {
            let mut after: Option<String> = None;
            loop {
                if self.is_cancelled(ctx.epoch) {
                    report.cancelled = true;
                    break 'types;
                }

                let (batch, _) = self
                    .with_retry("list_entities", &entity_type, || {
                        self.deps
                            .source
                            .list_entities(entity_type, after.as_deref(), batch_size)
                    })
                    .await;
                let batch = match batch {
                    Ok(batch) => batch,
                    Err(e) => {
                        warn!(entity_type = %entity_type, error = %e, "Enumeration failed, skipping rest of type");
                        report.record_error(e.kind());
                        report.source_errors.push(format!("{}: {}", entity_type, e));
                        break;
                    }
                };

                let exhausted = batch.len() < batch_size;
                after = batch.last().map(|s| s.entity_id().to_string());

                for entity in batch {
                    if seen.contains(&entity.entity_ref) {
                        continue;
                    }
                    if !self
                        .dispatch(ctx, entity, &tx, report, &mut alerted_conflicts)
                        .await
                    {
                        break 'types;
                    }
                }

                if exhausted || after.is_none() {
                    break;
                }
            }
        }
    }

    /// Evaluate one entity and route the decision. Returns false once the
    /// executor is gone.
    async fn dispatch(
        &self,
        ctx: &PassContext,
        entity: EntitySnapshot,
        tx: &mpsc::Sender<WorkItem>,
        report: &mut PassReport,
        alerted_conflicts: &mut HashSet<Vec<String>>,
    ) -> bool {
        let now = self.deps.clock.now();
        let holds = ctx.hold_cache.holds_for(&entity, now).await;
        let decision = self.evaluator.evaluate(&entity, &ctx.policies, &holds, now);
        report.counts.evaluated += 1;

        if let Some(conflict) = &decision.conflict {
            report.counts.policy_conflicts += 1;
            if conflict.resolved_by_creation_order
                && !ctx.dry_run
                && alerted_conflicts.insert(conflict.policy_ids.clone())
            {
                let alert = OperatorAlert::new(
                    AlertKind::PolicyConflict,
                    AlertSeverity::Warning,
                    "Ambiguous retention policies",
                    &conflict.detail,
                    now,
                )
                .for_entity(&decision.entity_ref)
                .with_refs(conflict.policy_ids.iter().cloned())
                .with_metadata("selected_policy", &conflict.selected_policy_id);
                self.raise(alert).await;
            }
        }

        match &decision.reason {
            DecisionReason::LegalHoldConflict { hold_ids } => {
                report.counts.legal_hold_conflicts += 1;
                if !ctx.dry_run {
                    self.raise(self.hold_conflict_alert(&decision, hold_ids)).await;
                }
            }
            DecisionReason::ManualActionRequired => report.counts.manual += 1,
            _ => {}
        }

        if ctx.dry_run {
            report.decisions.push(decision);
            return true;
        }

        if !decision.is_actionable() {
            if decision.is_legal_hold_conflict()
                || matches!(decision.reason, DecisionReason::ManualActionRequired)
            {
                report.decisions.push(decision);
            }
            return true;
        }

        tx.send(WorkItem { entity, decision }).await.is_ok()
    }

    async fn consume(&self, ctx: &PassContext, rx: mpsc::Receiver<WorkItem>) -> Vec<Outcome> {
        let items = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        items
            .map(|item| self.execute(ctx, item))
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await
    }

    async fn execute(&self, ctx: &PassContext, item: WorkItem) -> Outcome {
        let WorkItem { entity, decision } = item;

        if self.is_cancelled(ctx.epoch) {
            return Outcome {
                decision,
                kind: OutcomeKind::Cancelled,
            };
        }

        let Some(_guard) = self.locks.try_acquire(&decision.entity_ref) else {
            debug!(entity = %decision.entity_ref, "Entity locked by another pass, skipping");
            return Outcome {
                decision,
                kind: OutcomeKind::Locked,
            };
        };

        let mut decision = decision;
        if matches!(decision.action, LifecycleAction::Archive | LifecycleAction::Delete) {
            let fresh = self.recheck_holds(ctx, &entity).await;
            if fresh.is_legal_hold_conflict() {
                self.raise(self.hold_conflict_alert(&fresh, fresh.blocking_hold_ids()))
                    .await;
                return Outcome {
                    decision: fresh,
                    kind: OutcomeKind::HoldConflict,
                };
            }
            // Sub-records protected by holds that took effect since evaluation
            decision
                .protected_sub_records
                .extend(fresh.protected_sub_records);
            decision.protected_sub_records.sort();
            decision.protected_sub_records.dedup();
        }

        let result = match decision.action {
            LifecycleAction::Archive => self.archive_entity(ctx, &entity).await,
            LifecycleAction::Delete => self.delete_entity(ctx, &entity, &decision).await,
            LifecycleAction::Notify => self.notify(&decision).await,
            LifecycleAction::None => Ok(OutcomeKind::Vanished),
        };

        match result {
            Ok(kind) => Outcome { decision, kind },
            Err((e, attempts)) => {
                let failure = self.fail(&decision, e, attempts).await;
                Outcome {
                    decision,
                    kind: OutcomeKind::Failed(failure),
                }
            }
        }
    }

    /// Re-evaluate against a fresh hold lookup right before an irreversible
    /// action; the pass cache may be up to one TTL old.
    async fn recheck_holds(&self, ctx: &PassContext, entity: &EntitySnapshot) -> EligibilityDecision {
        let now = self.deps.clock.now();
        let holds = self
            .deps
            .holds
            .active_holds_for(&entity.hold_subject(), now)
            .await;
        self.evaluator.evaluate(entity, &ctx.policies, &holds, now)
    }

    async fn archive_entity(
        &self,
        ctx: &PassContext,
        entity: &EntitySnapshot,
    ) -> Result<OutcomeKind, (RetentionError, u32)> {
        let entity_ref = &entity.entity_ref;

        if let Some(existing) = self.deps.store.find_for_entity(entity_ref, entity.version).await {
            debug!(entity = %entity_ref, archive_id = %existing.id, "Already archived");
            if let Err(e) = self.deps.source.mark_archived(entity_ref, &existing.id).await {
                warn!(entity = %entity_ref, error = %e, "Failed to re-mark archived entity");
            }
            return Ok(OutcomeKind::AlreadyArchived);
        }

        let (dependents, attempts) = self
            .with_retry("fetch_dependents", entity_ref, || {
                self.deps.source.fetch_dependents(entity)
            })
            .await;
        let dependents = dependents.map_err(|e| (e, attempts))?;
        let bundle = ArchiveBundle::new(entity.clone(), dependents);

        let (draft, attempts) = self
            .with_retry("seal", entity_ref, || self.deps.codec.archive(&bundle))
            .await;
        let draft = draft.map_err(|e| (e, attempts))?;

        if self.is_cancelled(ctx.epoch) {
            self.deps.codec.discard_key(&draft.encryption_key_reference).await;
            return Ok(OutcomeKind::Cancelled);
        }

        let (stored, attempts) = self
            .with_retry("store", entity_ref, || self.deps.store.put(&draft))
            .await;
        let record = match stored {
            Ok(record) => record,
            Err(e) => {
                self.deps.codec.discard_key(&draft.encryption_key_reference).await;
                return Err((e, attempts));
            }
        };

        let (marked, attempts) = self
            .with_retry("mark_archived", entity_ref, || {
                self.deps.source.mark_archived(entity_ref, &record.id)
            })
            .await;
        if let Err(e) = marked {
            // The archive is committed; the next pass finds it and re-marks.
            warn!(entity = %entity_ref, archive_id = %record.id, error = %e, "Archive stored but source not updated");
            return Err((e, attempts));
        }

        info!(
            entity = %entity_ref,
            archive_id = %record.id,
            dependents = record.dependent_count,
            "Entity archived"
        );
        Ok(OutcomeKind::Archived)
    }

    async fn delete_entity(
        &self,
        ctx: &PassContext,
        entity: &EntitySnapshot,
        decision: &EligibilityDecision,
    ) -> Result<OutcomeKind, (RetentionError, u32)> {
        if self.is_cancelled(ctx.epoch) {
            return Ok(OutcomeKind::Cancelled);
        }

        let entity_ref = &entity.entity_ref;
        let now = self.deps.clock.now();
        let (deleted, attempts) = self
            .with_retry("secure_delete", entity_ref, || {
                self.deps
                    .source
                    .secure_delete(entity_ref, &decision.protected_sub_records, now)
            })
            .await;

        match deleted {
            Ok(receipt) => {
                info!(
                    entity = %entity_ref,
                    removed = receipt.removed.len(),
                    preserved = receipt.preserved.len(),
                    policy_id = ?decision.policy_id,
                    "Entity deleted by retention"
                );
                Ok(OutcomeKind::Deleted)
            }
            Err(RetentionError::NotFound(_)) => {
                debug!(entity = %entity_ref, "Entity already gone");
                Ok(OutcomeKind::Vanished)
            }
            Err(e) => Err((e, attempts)),
        }
    }

    async fn notify(&self, decision: &EligibilityDecision) -> Result<OutcomeKind, (RetentionError, u32)> {
        let DecisionReason::ApproachingDeadline {
            deadline,
            days_remaining,
            threshold_days,
        } = &decision.reason
        else {
            return Ok(OutcomeKind::Vanished);
        };
        let Some(policy_id) = &decision.policy_id else {
            return Ok(OutcomeKind::Vanished);
        };

        let key = NoticeKey {
            entity_ref: decision.entity_ref.clone(),
            policy_id: policy_id.clone(),
            threshold_days: *threshold_days,
            deadline: *deadline,
        };
        if !self.deps.notices.claim(&key).await {
            debug!(entity = %key.entity_ref, threshold_days, "Deadline notice already sent");
            return Ok(OutcomeKind::AlreadyNotified);
        }

        let alert = OperatorAlert::new(
            AlertKind::DeadlineApproaching,
            AlertSeverity::Info,
            "Retention deadline approaching",
            &format!(
                "{} reaches its retention deadline on {} ({} days)",
                decision.entity_ref,
                deadline.format("%Y-%m-%d"),
                days_remaining
            ),
            decision.evaluated_at,
        )
        .for_entity(&decision.entity_ref)
        .with_refs(decision.policy_id.iter().cloned())
        .with_metadata("threshold_days", threshold_days)
        .with_metadata("deadline", deadline.to_rfc3339());

        if let Err(e) = self.deps.alerts.raise(&alert).await {
            self.deps.notices.release(&key).await;
            return Err((
                RetentionError::StorageUnavailable(format!("Alert delivery failed: {}", e)),
                1,
            ));
        }
        if let Err(e) = self.deps.notices.confirm(&key).await {
            warn!(entity = %key.entity_ref, error = %e, "Deadline notice sent but not recorded");
        }
        Ok(OutcomeKind::Notified)
    }

    async fn fail(&self, decision: &EligibilityDecision, error: RetentionError, attempts: u32) -> EntityFailure {
        let entity_ref = &decision.entity_ref;
        let mut failure = EntityFailure::new(entity_ref.clone(), decision.action, &error, attempts);

        if error.is_transient() {
            failure.requeued = true;
            self.requeue.lock().await.insert(entity_ref.clone());
        }

        error!(
            entity = %entity_ref,
            action = ?decision.action,
            kind = ?failure.kind,
            attempts,
            requeued = failure.requeued,
            error = %error,
            "Lifecycle action failed"
        );

        let (kind, severity, title) = match &error {
            RetentionError::KeyUnavailable(_) => (
                AlertKind::KeyUnavailable,
                AlertSeverity::Error,
                "Key management unavailable",
            ),
            RetentionError::IntegrityFailure { .. } => (
                AlertKind::IntegrityFailure,
                AlertSeverity::Critical,
                "Archive integrity failure",
            ),
            _ if failure.requeued => (
                AlertKind::ActionFailed,
                AlertSeverity::Warning,
                "Lifecycle action deferred",
            ),
            _ => (
                AlertKind::ActionFailed,
                AlertSeverity::Error,
                "Lifecycle action failed",
            ),
        };
        let alert = OperatorAlert::new(kind, severity, title, &error.to_string(), self.deps.clock.now())
            .for_entity(entity_ref)
            .with_metadata("attempts", attempts)
            .with_metadata("requeued", failure.requeued);
        self.raise(alert).await;

        failure
    }

    fn hold_conflict_alert(&self, decision: &EligibilityDecision, hold_ids: &[String]) -> OperatorAlert {
        OperatorAlert::new(
            AlertKind::LegalHoldConflict,
            AlertSeverity::Warning,
            "Retention action blocked by legal hold",
            &format!(
                "{} is past retention but held by {}",
                decision.entity_ref,
                hold_ids.join(", ")
            ),
            decision.evaluated_at,
        )
        .for_entity(&decision.entity_ref)
        .with_refs(hold_ids.iter().cloned())
        .with_refs(decision.policy_id.iter().cloned())
    }

    async fn raise(&self, alert: OperatorAlert) {
        if let Err(e) = self.deps.alerts.raise(&alert).await {
            warn!(alert_id = %alert.alert_id, kind = ?alert.kind, error = %e, "Failed to deliver operator alert");
        }
    }

    fn retry_limit(&self, error: &RetentionError) -> u32 {
        match error {
            RetentionError::StorageUnavailable(_) => self.config.max_retries,
            RetentionError::KeyUnavailable(_) => self.config.key_retry_limit,
            _ => 0,
        }
    }

    /// Run `op`, retrying transient failures with exponential backoff.
    /// Returns the final result and the number of attempts made.
    async fn with_retry<T, F, Fut>(
        &self,
        operation: &str,
        target: &(dyn std::fmt::Display + Sync),
        mut op: F,
    ) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RetentionResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return (Ok(value), attempt),
                Err(e) => {
                    if attempt > self.retry_limit(&e) {
                        return (Err(e), attempt);
                    }
                    let delay = self.config.retry_delay(attempt);
                    warn!(
                        operation,
                        target = %target,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Start the interval-driven background task
    pub fn start_background_task(scheduler: Arc<Self>) -> mpsc::Sender<SchedulerCommand> {
        let (tx, mut rx) = mpsc::channel::<SchedulerCommand>(10);

        tokio::spawn(async move {
            let mut paused = false;
            let interval = scheduler.config.interval();

            loop {
                tokio::select! {
                    cmd = rx.recv() => {
                        match cmd {
                            Some(SchedulerCommand::RunNow) => {
                                scheduler.run_scheduled_pass().await;
                            }
                            Some(SchedulerCommand::Pause) => {
                                paused = true;
                                info!("Retention scheduler paused");
                            }
                            Some(SchedulerCommand::Resume) => {
                                paused = false;
                                info!("Retention scheduler resumed");
                            }
                            Some(SchedulerCommand::Stop) | None => {
                                info!("Retention scheduler stopping");
                                break;
                            }
                        }
                    }
                    _ = tokio::time::sleep(interval), if !paused => {
                        scheduler.run_scheduled_pass().await;
                    }
                }
            }
        });

        tx
    }

    async fn run_scheduled_pass(&self) {
        match self.run_pass(PassOptions::default()).await {
            Ok(report) if report.has_failures() => warn!(
                pass_id = %report.pass_id,
                failures = report.failures.len(),
                source_errors = report.source_errors.len(),
                "Scheduled pass completed with failures"
            ),
            Ok(report) => debug!(pass_id = %report.pass_id, "Scheduled pass completed"),
            Err(e) => error!(error = %e, "Scheduled pass failed to start"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::OperatorQueue;
    use crate::archive::ArchiveIndex;
    use crate::backend::MemoryBlobStore;
    use crate::entity_source::InMemoryEntitySource;
    use chrono::{TimeZone, Utc};
    use jctc_core::{LocalKeyStore, ManualClock, RetentionPeriod};

    struct Harness {
        scheduler: RetentionScheduler,
        source: Arc<InMemoryEntitySource>,
        alerts: Arc<OperatorQueue>,
        store: Arc<ArchiveStore>,
        holds: Arc<LegalHoldRegistry>,
        clock: Arc<ManualClock>,
    }

    async fn harness(entities: Vec<EntitySnapshot>, policies: Vec<RetentionPolicy>) -> Harness {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()));
        let kms = Arc::new(LocalKeyStore::new());
        let store = Arc::new(ArchiveStore::new(
            Arc::new(MemoryBlobStore::new()),
            Arc::new(ArchiveIndex::in_memory()),
            kms.clone(),
            clock.clone(),
        ));
        let policy_store = Arc::new(PolicyStore::new(clock.clone()));
        for policy in policies {
            policy_store.create_policy(policy, "test").await.unwrap();
        }
        let source = Arc::new(InMemoryEntitySource::from_snapshots(entities));
        let alerts = Arc::new(OperatorQueue::new());
        let holds = Arc::new(LegalHoldRegistry::new());

        let deps = SchedulerDeps {
            policies: policy_store,
            holds: holds.clone(),
            source: source.clone(),
            codec: Arc::new(ArchiveCodec::new(kms)),
            store: store.clone(),
            alerts: alerts.clone(),
            notices: Arc::new(NoticeLedger::in_memory()),
            clock: clock.clone(),
        };
        let config = SchedulerConfig {
            batch_size: 2,
            retry_base_delay_ms: 1,
            ..Default::default()
        };
        Harness {
            scheduler: RetentionScheduler::new(deps, config),
            source,
            alerts,
            store,
            holds,
            clock,
        }
    }

    fn closed_task(id: &str, year: i32) -> EntitySnapshot {
        EntitySnapshot::new(EntityType::Task, id, Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_pass_archives_across_batches() {
        let h = harness(
            (0..5).map(|i| closed_task(&format!("t-{i}"), 2015)).collect(),
            vec![RetentionPolicy::new("tasks", EntityType::Task, RetentionPeriod::Years3).with_auto_archive()],
        )
        .await;

        let report = h.scheduler.run_pass(PassOptions::default()).await.unwrap();
        assert_eq!(report.counts.evaluated, 5);
        assert_eq!(report.counts.archived, 5);
        assert_eq!(h.store.index().len().await, 5);
        assert_eq!(h.scheduler.state(), SchedulerState::Idle);
        assert!(h
            .source
            .archive_marker(&EntityRef::new(EntityType::Task, "t-3"))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_locked_entity_is_skipped() {
        let h = harness(
            vec![closed_task("t-1", 2015), closed_task("t-2", 2015)],
            vec![RetentionPolicy::new("tasks", EntityType::Task, RetentionPeriod::Years1).with_auto_archive()],
        )
        .await;

        let busy = EntityRef::new(EntityType::Task, "t-1");
        let guard = h.scheduler.locks().try_acquire(&busy).unwrap();
        let report = h.scheduler.run_pass(PassOptions::default()).await.unwrap();
        assert_eq!(report.counts.locked, 1);
        assert_eq!(report.counts.archived, 1);
        drop(guard);

        let report = h.scheduler.run_pass(PassOptions::default()).await.unwrap();
        assert_eq!(report.counts.archived, 1);
        assert_eq!(report.counts.already_archived, 1);
    }

    #[tokio::test]
    async fn test_policy_selection_limits_types() {
        let h = harness(
            vec![
                closed_task("t-1", 2010),
                EntitySnapshot::new(EntityType::User, "u-1", Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap())
                    .with_field("last_access_at", Utc.with_ymd_and_hms(2012, 1, 1, 0, 0, 0).unwrap()),
            ],
            vec![
                RetentionPolicy::new("tasks", EntityType::Task, RetentionPeriod::Years1).with_auto_delete(),
                RetentionPolicy::new("users", EntityType::User, RetentionPeriod::Years1).with_auto_delete(),
            ],
        )
        .await;

        let report = h
            .scheduler
            .run_pass(PassOptions::default().with_policies(vec!["users".into()]))
            .await
            .unwrap();
        assert_eq!(report.entity_types, vec!["user".to_string()]);
        assert_eq!(report.counts.deleted, 1);
        assert!(h.source.contains(&EntityRef::new(EntityType::Task, "t-1")).await);

        assert!(h
            .scheduler
            .run_pass(PassOptions::default().with_policies(vec!["nope".into()]))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_manual_action_counted_and_notify_alerts() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let h = harness(
            vec![
                closed_task("old", 2015),
                EntitySnapshot::new(EntityType::Party, "p-1", now - chrono::Duration::days(365 * 3 - 10)),
            ],
            vec![
                RetentionPolicy::new("tasks", EntityType::Task, RetentionPeriod::Years1),
                RetentionPolicy::new("parties", EntityType::Party, RetentionPeriod::Years3)
                    .with_auto_archive()
                    .with_notification_days(vec![30, 90]),
            ],
        )
        .await;

        let report = h.scheduler.run_pass(PassOptions::default()).await.unwrap();
        assert_eq!(report.counts.manual, 1);
        assert_eq!(report.counts.notified, 1);
        assert_eq!(h.alerts.of_kind(AlertKind::DeadlineApproaching).await.len(), 1);
    }

    #[tokio::test]
    async fn test_deadline_notice_fires_once_across_passes() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let h = harness(
            vec![EntitySnapshot::new(EntityType::Party, "p-1", now - chrono::Duration::days(365 * 3 - 20))],
            vec![RetentionPolicy::new("parties", EntityType::Party, RetentionPeriod::Years3)
                .with_auto_archive()
                .with_notification_days(vec![30])],
        )
        .await;

        let mut notified = 0;
        for _ in 0..5 {
            let report = h.scheduler.run_pass(PassOptions::default()).await.unwrap();
            notified += report.counts.notified;
            h.clock.advance(chrono::Duration::hours(1));
        }
        assert_eq!(notified, 1);
        assert_eq!(h.alerts.of_kind(AlertKind::DeadlineApproaching).await.len(), 1);

        let report = h.scheduler.run_pass(PassOptions::default()).await.unwrap();
        assert_eq!(report.counts.already_notified, 1);
        assert!(report.decisions.is_empty());
    }

    #[tokio::test]
    async fn test_hold_after_evaluation_protects_access_logs() {
        let task = closed_task("t-1", 2015);
        let log = EntitySnapshot::new(EntityType::AccessLog, "log-1", Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap())
            .with_field(crate::entity_source::ACCESS_TARGET_FIELD, task.entity_ref.to_string());
        let h = harness(
            vec![task.clone(), log.clone()],
            vec![RetentionPolicy::new("tasks", EntityType::Task, RetentionPeriod::Years1).with_auto_delete()],
        )
        .await;

        let ctx = PassContext {
            policies: h.scheduler.deps.policies.active_policies(None).await.unwrap(),
            hold_cache: PassHoldCache::new(h.holds.clone(), h.scheduler.config.hold_cache_ttl()),
            dry_run: false,
            epoch: *h.scheduler.cancel_epoch.borrow(),
        };
        let stale = h
            .scheduler
            .evaluator
            .evaluate(&task, &ctx.policies, &[], h.clock.now());
        assert_eq!(stale.action, LifecycleAction::Delete);
        assert!(stale.protected_sub_records.is_empty());

        // Takes effect between evaluation and execution
        h.clock.advance(chrono::Duration::minutes(5));
        h.holds
            .apply_hold(
                jctc_core::LegalHold::new(
                    "hold-logs",
                    "Access audit",
                    jctc_core::HoldScope::AccessLogs,
                    jctc_core::HoldReason::Internal,
                )
                .effective_from(h.clock.now() - chrono::Duration::minutes(1))
                .with_entity(task.entity_ref.clone()),
            )
            .await
            .unwrap();

        let outcome = h
            .scheduler
            .execute(&ctx, WorkItem { entity: task.clone(), decision: stale })
            .await;
        assert!(matches!(outcome.kind, OutcomeKind::Deleted));
        assert_eq!(outcome.decision.protected_sub_records, vec![EntityType::AccessLog]);
        assert!(!h.source.contains(&task.entity_ref).await);
        assert!(h.source.contains(&log.entity_ref).await);
    }
}
