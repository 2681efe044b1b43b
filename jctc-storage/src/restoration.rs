//! Restoration Service
//!
//! Time-bounded access to archived content. A restore decrypts an archive
//! into an in-memory staging area; the plaintext is dropped when the
//! requested window ends, whether or not anyone read it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use jctc_core::{
    ArchiveBundle, ArchiveCodec, ArchiveStatus, ArchivedRecord, Clock, EntityRef, RestoreStage,
    RetentionError, RetentionResult,
};

use crate::archive::{ArchiveFilter, ArchiveStore, DEFAULT_PAGE_SIZE};
use crate::config::RestorationConfig;
use crate::legal_hold::LegalHoldRegistry;

/// Who is asking for a restore, and why
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequesterContext {
    pub user_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Business justification, recorded in the audit log
    pub reason: String,
}

impl RequesterContext {
    pub fn new(user_id: &str, reason: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            roles: Vec::new(),
            reason: reason.to_string(),
        }
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.roles.push(role.to_string());
        self
    }
}

/// Decides whether a requester may restore an archive
#[async_trait]
pub trait RestoreAuthorizer: Send + Sync {
    async fn authorize(&self, requester: &RequesterContext, record: &ArchivedRecord) -> Result<(), String>;
}

/// Role-based authorizer
pub struct RoleAuthorizer {
    allowed_roles: HashSet<String>,
}

impl Default for RoleAuthorizer {
    fn default() -> Self {
        Self::new(["records_officer", "admin"])
    }
}

impl RoleAuthorizer {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_roles: roles.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl RestoreAuthorizer for RoleAuthorizer {
    async fn authorize(&self, requester: &RequesterContext, _record: &ArchivedRecord) -> Result<(), String> {
        if requester.reason.trim().is_empty() {
            return Err("A restore reason is required".into());
        }
        if requester.roles.iter().any(|r| self.allowed_roles.contains(r)) {
            Ok(())
        } else {
            Err(format!("User {} lacks a restore role", requester.user_id))
        }
    }
}

/// Why a restore was refused
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "denial", rename_all = "snake_case")]
pub enum RestoreDenial {
    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("Restricted by legal hold: {hold_ids:?}")]
    LegalHold { hold_ids: Vec<String> },

    #[error("Not found: {id}")]
    NotFound { id: String },

    #[error("Archive corrupt at {stage} stage: {detail}")]
    Corrupt { stage: RestoreStage, detail: String },

    #[error("Invalid duration {requested}h (allowed 1..={max}h)")]
    InvalidDuration { requested: u32, max: u32 },

    #[error("Temporarily unavailable: {detail}")]
    Unavailable { detail: String },
}

impl RestoreDenial {
    pub fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied { .. } => "permission_denied",
            Self::LegalHold { .. } => "legal_hold",
            Self::NotFound { .. } => "not_found",
            Self::Corrupt { .. } => "corrupt",
            Self::InvalidDuration { .. } => "invalid_duration",
            Self::Unavailable { .. } => "unavailable",
        }
    }

    fn from_error(archive_id: &str, e: RetentionError) -> Self {
        match e {
            RetentionError::NotFound(_) => Self::NotFound {
                id: archive_id.to_string(),
            },
            RetentionError::IntegrityFailure { stage, detail } => Self::Corrupt { stage, detail },
            RetentionError::PermissionDenied(reason) => Self::PermissionDenied { reason },
            RetentionError::LegalHoldConflict { hold_ids, .. } => Self::LegalHold { hold_ids },
            other => Self::Unavailable {
                detail: other.to_string(),
            },
        }
    }
}

/// A staged restoration, without its content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedRestoration {
    pub staging_id: String,
    pub archive_id: String,
    pub entity_ref: EntityRef,
    pub requested_by: String,
    pub reason: String,
    pub staged_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub dependent_count: usize,
}

impl StagedRestoration {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

struct StagedEntry {
    info: StagedRestoration,
    bundle: ArchiveBundle,
}

/// Restoration service
pub struct RestorationService {
    store: Arc<ArchiveStore>,
    codec: Arc<ArchiveCodec>,
    holds: Arc<LegalHoldRegistry>,
    authorizer: Arc<dyn RestoreAuthorizer>,
    clock: Arc<dyn Clock>,
    config: RestorationConfig,
    staged: RwLock<HashMap<String, StagedEntry>>,
}

impl RestorationService {
    pub fn new(
        store: Arc<ArchiveStore>,
        codec: Arc<ArchiveCodec>,
        holds: Arc<LegalHoldRegistry>,
        authorizer: Arc<dyn RestoreAuthorizer>,
        clock: Arc<dyn Clock>,
        config: RestorationConfig,
    ) -> Self {
        Self {
            store,
            codec,
            holds,
            authorizer,
            clock,
            config,
            staged: RwLock::new(HashMap::new()),
        }
    }

    /// Decrypt an archive into the staging area for `duration_hours`
    pub async fn request_restore(
        &self,
        archive_id: &str,
        duration_hours: u32,
        requester: &RequesterContext,
    ) -> Result<StagedRestoration, RestoreDenial> {
        let max = self.config.max_duration_hours;
        if duration_hours == 0 || duration_hours > max {
            return Err(RestoreDenial::InvalidDuration {
                requested: duration_hours,
                max,
            });
        }

        let record = self
            .store
            .record(archive_id)
            .await
            .map_err(|e| RestoreDenial::from_error(archive_id, e))?;
        match record.status {
            ArchiveStatus::Purged => {
                return Err(RestoreDenial::NotFound {
                    id: archive_id.to_string(),
                })
            }
            ArchiveStatus::Corrupt => {
                return Err(RestoreDenial::Corrupt {
                    stage: RestoreStage::Checksum,
                    detail: "Archive previously failed integrity verification".into(),
                })
            }
            _ => {}
        }

        if let Err(reason) = self.authorizer.authorize(requester, &record).await {
            warn!(archive_id, user = %requester.user_id, %reason, "Restore denied");
            return Err(RestoreDenial::PermissionDenied { reason });
        }

        let now = self.clock.now();
        let entity_ref = record.entity_ref();
        let restricting: Vec<String> = self
            .holds
            .active_holds_for(&record.hold_subject(&entity_ref), now)
            .await
            .into_iter()
            .filter(|h| h.restricts_access)
            .map(|h| h.hold_id)
            .collect();
        if !restricting.is_empty() {
            warn!(archive_id, entity = %entity_ref, holds = ?restricting, "Restore blocked by legal hold");
            return Err(RestoreDenial::LegalHold {
                hold_ids: restricting,
            });
        }

        let (record, ciphertext) = self
            .store
            .get(archive_id)
            .await
            .map_err(|e| RestoreDenial::from_error(archive_id, e))?;

        let bundle = match self.codec.restore(&record, ciphertext).await {
            Ok(bundle) => bundle,
            Err(RetentionError::IntegrityFailure { stage, detail }) => {
                error!(archive_id, entity = %entity_ref, %stage, %detail, "Restore failed integrity checks");
                if stage.indicates_corruption() {
                    if let Err(e) = self.store.mark_status(archive_id, ArchiveStatus::Corrupt).await {
                        warn!(archive_id, error = %e, "Failed to mark archive corrupt");
                    }
                }
                return Err(RestoreDenial::Corrupt { stage, detail });
            }
            Err(e) => return Err(RestoreDenial::from_error(archive_id, e)),
        };

        let staged = StagedRestoration {
            staging_id: uuid::Uuid::new_v4().to_string(),
            archive_id: archive_id.to_string(),
            entity_ref: entity_ref.clone(),
            requested_by: requester.user_id.clone(),
            reason: requester.reason.clone(),
            staged_at: now,
            expires_at: now + Duration::hours(i64::from(duration_hours)),
            dependent_count: bundle.dependents.len(),
        };

        // Status changes happen under the staging lock so the reaper never
        // resets an archive that is being staged again
        let mut staging = self.staged.write().await;
        if let Err(e) = self.store.mark_status(archive_id, ArchiveStatus::RestoredTemp).await {
            warn!(archive_id, error = %e, "Failed to mark archive restored");
        }
        staging.insert(
            staged.staging_id.clone(),
            StagedEntry {
                info: staged.clone(),
                bundle,
            },
        );
        drop(staging);

        info!(
            staging_id = %staged.staging_id,
            archive_id,
            entity = %entity_ref,
            user = %requester.user_id,
            reason = %requester.reason,
            expires_at = %staged.expires_at,
            "Archive restored to staging"
        );
        Ok(staged)
    }

    /// Staged content, while the window is open
    pub async fn fetch_staged(&self, staging_id: &str) -> Result<ArchiveBundle, RestoreDenial> {
        let now = self.clock.now();
        let staged = self.staged.read().await;
        match staged.get(staging_id) {
            Some(entry) if !entry.info.is_expired_at(now) => Ok(entry.bundle.clone()),
            _ => Err(RestoreDenial::NotFound {
                id: staging_id.to_string(),
            }),
        }
    }

    pub async fn list_staged(&self) -> Vec<StagedRestoration> {
        let mut list: Vec<StagedRestoration> = self
            .staged
            .read()
            .await
            .values()
            .map(|e| e.info.clone())
            .collect();
        list.sort_by_key(|s| s.expires_at);
        list
    }

    /// Drop expired stagings; returns the purged staging ids
    pub async fn purge_expired(&self) -> Vec<String> {
        let now = self.clock.now();
        let mut staged = self.staged.write().await;
        let purged: Vec<String> = staged
            .iter()
            .filter(|(_, e)| e.info.is_expired_at(now))
            .map(|(id, _)| id.clone())
            .collect();

        let mut archives: HashSet<String> = HashSet::new();
        for id in &purged {
            if let Some(entry) = staged.remove(id) {
                archives.insert(entry.info.archive_id);
            }
        }
        let still_staged: HashSet<&str> = staged.values().map(|e| e.info.archive_id.as_str()).collect();
        let released: Vec<String> = archives
            .into_iter()
            .filter(|a| !still_staged.contains(a.as_str()))
            .collect();

        // Lock held until the reset lands; a new staging waits for it
        for archive_id in &released {
            match self.store.record(archive_id).await {
                Ok(record) if record.status == ArchiveStatus::RestoredTemp => {
                    if let Err(e) = self.store.mark_status(archive_id, ArchiveStatus::Verified).await {
                        warn!(archive_id = %archive_id, error = %e, "Failed to reset archive status");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(archive_id = %archive_id, error = %e, "Staged archive record missing"),
            }
        }
        drop(staged);

        if !purged.is_empty() {
            info!(count = purged.len(), "Expired restorations purged");
        }
        purged
    }

    /// Reset archives left RESTORED_TEMP by an earlier process. Staging is
    /// in-memory only, so nothing survives a restart.
    pub async fn release_orphaned(&self) -> RetentionResult<usize> {
        let filter = ArchiveFilter::default().status(ArchiveStatus::RestoredTemp);
        let candidates: Vec<ArchivedRecord> = self
            .store
            .search_stream(filter, None, DEFAULT_PAGE_SIZE)
            .try_collect()
            .await?;

        let staging = self.staged.read().await;
        let staged: HashSet<&str> = staging.values().map(|e| e.info.archive_id.as_str()).collect();

        let mut released = 0;
        for record in candidates.iter().filter(|r| !staged.contains(r.id.as_str())) {
            self.store.mark_status(&record.id, ArchiveStatus::Verified).await?;
            released += 1;
        }
        drop(staging);
        if released > 0 {
            info!(count = released, "Released orphaned restorations");
        }
        Ok(released)
    }

    /// Start the expiry reaper on its own timer
    pub fn start_reaper(service: Arc<Self>, interval: std::time::Duration) -> ReaperHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let purged = service.purge_expired().await;
                        debug!(purged = purged.len(), "Restoration reaper tick");
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("Restoration reaper stopping");
                            break;
                        }
                    }
                }
            }
        });

        ReaperHandle { shutdown, join }
    }
}

/// Handle to a running reaper
pub struct ReaperHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReaperHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            warn!(error = %e, "Restoration reaper ended abnormally");
        }
    }
}
