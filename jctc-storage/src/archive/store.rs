//! Archive Store
//!
//! Persists sealed archives: ciphertext goes to a [`BlobStore`], the record
//! goes to the [`ArchiveIndex`]. A record is only visible once both writes
//! succeeded; a failed index append removes the blob again.

use chrono::{DateTime, Datelike, Utc};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use jctc_core::{
    ArchiveStatus, ArchivedRecord, ArchivedRecordDraft, Clock, EntityRef, EntityType, KeyManagement,
    RetentionError, RetentionResult,
};

use super::index::{ArchiveIndex, IndexKey};
use crate::backend::{sha256_hex, BlobStore, HealthStatus};
use crate::error::StorageError;
use crate::legal_hold::LegalHoldRegistry;

/// Default search page size
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Largest page a single search returns
pub const MAX_PAGE_SIZE: usize = 1000;

/// Archive blob extension
pub const ARCHIVE_EXTENSION: &str = "jca";

/// Search filter; unset fields match everything
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveFilter {
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<String>,
    pub case_id: Option<String>,
    pub status: Option<ArchiveStatus>,
    /// Inclusive lower bound on archival time
    pub archived_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on archival time
    pub archived_to: Option<DateTime<Utc>>,
}

impl ArchiveFilter {
    pub fn entity_type(mut self, entity_type: EntityType) -> Self {
        self.entity_type = Some(entity_type);
        self
    }

    pub fn entity_id(mut self, entity_id: &str) -> Self {
        self.entity_id = Some(entity_id.to_string());
        self
    }

    pub fn case_id(mut self, case_id: &str) -> Self {
        self.case_id = Some(case_id.to_string());
        self
    }

    pub fn status(mut self, status: ArchiveStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn archived_between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.archived_from = from;
        self.archived_to = to;
        self
    }

    pub fn matches(&self, record: &ArchivedRecord) -> bool {
        self.entity_type.map_or(true, |t| record.source_entity_type == t)
            && self
                .entity_id
                .as_deref()
                .map_or(true, |id| record.source_entity_id == id)
            && self
                .case_id
                .as_deref()
                .map_or(true, |c| record.case_id.as_deref() == Some(c))
            && self.status.map_or(true, |s| record.status == s)
            && self.archived_from.map_or(true, |t| record.archived_at >= t)
            && self.archived_to.map_or(true, |t| record.archived_at < t)
    }
}

/// One page of search results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPage {
    pub records: Vec<ArchivedRecord>,
    /// Opaque cursor for the next page, `None` when exhausted
    pub next_cursor: Option<String>,
}

/// Opaque search cursor: hex of `<archived_at>|<id>`
pub fn cursor_after(record: &ArchivedRecord) -> String {
    hex::encode(format!("{}|{}", record.archived_at.to_rfc3339(), record.id))
}

fn decode_cursor(cursor: &str) -> Result<IndexKey, StorageError> {
    let bytes = hex::decode(cursor).map_err(|_| StorageError::InvalidCursor(cursor.to_string()))?;
    let text = String::from_utf8(bytes).map_err(|_| StorageError::InvalidCursor(cursor.to_string()))?;
    let (at, id) = text
        .split_once('|')
        .ok_or_else(|| StorageError::InvalidCursor(cursor.to_string()))?;
    let at = DateTime::parse_from_rfc3339(at)
        .map_err(|_| StorageError::InvalidCursor(cursor.to_string()))?
        .with_timezone(&Utc);
    Ok((at, id.to_string()))
}

/// Separate approval required for secure deletion of an archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeAuthorization {
    pub approved_by: String,
    pub approval_ref: String,
    pub reason: String,
}

impl PurgeAuthorization {
    pub fn new(approved_by: &str, approval_ref: &str, reason: &str) -> Self {
        Self {
            approved_by: approved_by.to_string(),
            approval_ref: approval_ref.to_string(),
            reason: reason.to_string(),
        }
    }

    fn validate(&self) -> RetentionResult<()> {
        if self.approved_by.trim().is_empty() || self.approval_ref.trim().is_empty() {
            return Err(RetentionError::PermissionDenied(
                "Purge requires a named approver and approval reference".into(),
            ));
        }
        Ok(())
    }
}

/// Archive statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveStats {
    pub total_records: usize,
    pub by_status: BTreeMap<String, usize>,
    pub original_bytes: u64,
    pub compressed_bytes: u64,
}

/// Archive store
pub struct ArchiveStore {
    blobs: Arc<dyn BlobStore>,
    index: Arc<ArchiveIndex>,
    kms: Arc<dyn KeyManagement>,
    clock: Arc<dyn Clock>,
}

impl ArchiveStore {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        index: Arc<ArchiveIndex>,
        kms: Arc<dyn KeyManagement>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            blobs,
            index,
            kms,
            clock,
        }
    }

    pub fn index(&self) -> &Arc<ArchiveIndex> {
        &self.index
    }

    /// `YYYY/MM/<entity_type>/<entity_id>/<archive_id>.jca`
    pub fn storage_path(at: DateTime<Utc>, entity: &EntityRef, archive_id: &str) -> String {
        format!(
            "{:04}/{:02}/{}/{}/{}.{}",
            at.year(),
            at.month(),
            entity.entity_type.as_str(),
            path_segment(&entity.entity_id),
            archive_id,
            ARCHIVE_EXTENSION
        )
    }

    /// Persist a sealed archive
    pub async fn put(&self, draft: &ArchivedRecordDraft) -> RetentionResult<ArchivedRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        let archived_at = self.clock.now();
        let storage_path = Self::storage_path(archived_at, &draft.entity_ref, &id);

        let blob = self.blobs.put(&storage_path, &draft.ciphertext).await?;

        let record = ArchivedRecord {
            id: id.clone(),
            source_entity_type: draft.entity_ref.entity_type,
            source_entity_id: draft.entity_ref.entity_id.clone(),
            entity_version: draft.entity_version,
            case_id: draft.case_id.clone(),
            archived_at,
            storage_path: storage_path.clone(),
            sha256_checksum: draft.sha256_checksum.clone(),
            storage_checksum: blob.checksum,
            encryption_key_reference: draft.encryption_key_reference.to_string(),
            compressed_size: draft.compressed_size,
            original_size: draft.original_size,
            dependent_count: draft.dependent_count,
            status: ArchiveStatus::Active,
            last_verified_at: None,
            purged_at: None,
        };

        match self.index.upsert(record.clone()).await {
            Ok(()) => {}
            Err(StorageError::JournalUnsynced(detail)) => {
                // The entry is in the journal and will replay; the blob must stay
                warn!(archive_id = %id, error = %detail, "Index sync failed after append, archive kept");
            }
            Err(e) => {
                error!(archive_id = %id, error = %e, "Index append failed, removing blob");
                if let Err(cleanup) = self.blobs.delete(&storage_path).await {
                    warn!(path = %storage_path, error = %cleanup, "Failed to remove orphan blob");
                }
                return Err(e.into());
            }
        }

        info!(
            archive_id = %id,
            entity = %draft.entity_ref,
            version = draft.entity_version,
            size = draft.ciphertext.len(),
            "Archive stored"
        );
        Ok(record)
    }

    /// Journal a changed record; an unsynced append is already applied
    async fn record_update(&self, record: ArchivedRecord) -> RetentionResult<()> {
        let id = record.id.clone();
        match self.index.upsert(record).await {
            Err(StorageError::JournalUnsynced(detail)) => {
                warn!(archive_id = %id, error = %detail, "Index sync failed after status update");
                Ok(())
            }
            other => Ok(other?),
        }
    }

    pub async fn record(&self, id: &str) -> RetentionResult<ArchivedRecord> {
        self.index
            .get(id)
            .await
            .ok_or_else(|| RetentionError::NotFound(format!("Archive not found: {}", id)))
    }

    /// Fetch a record and its ciphertext
    pub async fn get(&self, id: &str) -> RetentionResult<(ArchivedRecord, Vec<u8>)> {
        let record = self.record(id).await?;
        if record.status == ArchiveStatus::Purged {
            return Err(RetentionError::NotFound(format!("Archive {} was purged", id)));
        }
        let ciphertext = self.blobs.get(&record.storage_path).await?;
        Ok((record, ciphertext))
    }

    /// One page of matching records
    pub async fn search(
        &self,
        filter: &ArchiveFilter,
        cursor: Option<&str>,
        limit: usize,
    ) -> RetentionResult<SearchPage> {
        let after = cursor.map(decode_cursor).transpose()?;
        let limit = limit.clamp(1, MAX_PAGE_SIZE);

        let mut records = self
            .index
            .scan_after(after.as_ref(), limit + 1, |r| filter.matches(r))
            .await;

        let next_cursor = if records.len() > limit {
            records.truncate(limit);
            records.last().map(cursor_after)
        } else {
            None
        };

        Ok(SearchPage {
            records,
            next_cursor,
        })
    }

    /// Lazily page through every matching record.
    ///
    /// Restart from any point by passing the cursor of the last record seen.
    pub fn search_stream<'a>(
        &'a self,
        filter: ArchiveFilter,
        cursor: Option<String>,
        page_size: usize,
    ) -> impl Stream<Item = RetentionResult<ArchivedRecord>> + 'a {
        struct Paging {
            filter: ArchiveFilter,
            cursor: Option<String>,
            buffer: std::vec::IntoIter<ArchivedRecord>,
            done: bool,
        }

        let initial = Paging {
            filter,
            cursor,
            buffer: Vec::new().into_iter(),
            done: false,
        };

        stream::unfold(initial, move |mut paging| async move {
            loop {
                if let Some(record) = paging.buffer.next() {
                    return Some((Ok(record), paging));
                }
                if paging.done {
                    return None;
                }
                match self
                    .search(&paging.filter, paging.cursor.as_deref(), page_size)
                    .await
                {
                    Ok(page) => {
                        paging.done = page.next_cursor.is_none();
                        paging.cursor = page.next_cursor;
                        paging.buffer = page.records.into_iter();
                    }
                    Err(e) => {
                        paging.done = true;
                        return Some((Err(e), paging));
                    }
                }
            }
        })
    }

    /// Latest live archive of an entity at a given version
    pub async fn find_for_entity(&self, entity: &EntityRef, version: u64) -> Option<ArchivedRecord> {
        self.index
            .for_entity(entity)
            .await
            .into_iter()
            .filter(|r| r.entity_version == version && r.status != ArchiveStatus::Purged)
            .last()
    }

    /// Compare the stored ciphertext against its checksum
    pub async fn verify_integrity(&self, id: &str) -> RetentionResult<bool> {
        let mut record = self.record(id).await?;
        if record.status == ArchiveStatus::Purged {
            return Err(RetentionError::NotFound(format!("Archive {} was purged", id)));
        }

        let valid = match self.blobs.get(&record.storage_path).await {
            Ok(bytes) => sha256_hex(&bytes) == record.storage_checksum,
            Err(StorageError::NotFound(_)) => {
                warn!(archive_id = %id, path = %record.storage_path, "Archive blob missing");
                false
            }
            Err(e) => return Err(e.into()),
        };

        record.last_verified_at = Some(self.clock.now());
        if !valid {
            record.status = ArchiveStatus::Corrupt;
            error!(archive_id = %id, entity = %record.entity_ref(), "Archive failed integrity check");
        } else if record.status != ArchiveStatus::RestoredTemp {
            record.status = ArchiveStatus::Verified;
        }
        self.record_update(record).await?;

        debug!(archive_id = %id, valid, "Integrity verified");
        Ok(valid)
    }

    /// Set the status of a record
    pub async fn mark_status(&self, id: &str, status: ArchiveStatus) -> RetentionResult<ArchivedRecord> {
        let mut record = self.record(id).await?;
        if record.status == ArchiveStatus::Purged {
            return Err(RetentionError::Validation(format!(
                "Archive {} is purged; status is final",
                id
            )));
        }
        if status == ArchiveStatus::Purged {
            return Err(RetentionError::Validation("Use purge to delete an archive".into()));
        }
        record.status = status;
        self.record_update(record.clone()).await?;
        Ok(record)
    }

    /// Securely delete an archive.
    ///
    /// The key is destroyed first, which makes the ciphertext unrecoverable
    /// even if blob removal fails.
    pub async fn purge(
        &self,
        id: &str,
        authorization: &PurgeAuthorization,
        holds: &LegalHoldRegistry,
    ) -> RetentionResult<ArchivedRecord> {
        authorization.validate()?;
        let mut record = self.record(id).await?;
        if record.status == ArchiveStatus::Purged {
            return Ok(record);
        }

        let now = self.clock.now();
        let entity = record.entity_ref();
        let blocking: Vec<String> = holds
            .active_holds_for(&record.hold_subject(&entity), now)
            .await
            .into_iter()
            .filter(|h| h.scope.blocks_delete())
            .map(|h| h.hold_id)
            .collect();
        if !blocking.is_empty() {
            return Err(RetentionError::LegalHoldConflict {
                entity: entity.to_string(),
                hold_ids: blocking,
            });
        }

        self.kms.destroy_key(&record.key_ref()).await?;

        record.status = ArchiveStatus::Purged;
        record.purged_at = Some(now);
        self.record_update(record.clone()).await?;

        if let Err(e) = self.blobs.delete(&record.storage_path).await {
            warn!(archive_id = %id, error = %e, "Blob removal failed after key destruction");
        }

        info!(
            archive_id = %id,
            entity = %entity,
            approved_by = %authorization.approved_by,
            approval_ref = %authorization.approval_ref,
            "Archive purged"
        );
        Ok(record)
    }

    pub async fn stats(&self) -> ArchiveStats {
        let by_status = self
            .index
            .status_counts()
            .await
            .into_iter()
            .map(|(status, count)| (status.to_string(), count))
            .collect();
        let (original_bytes, compressed_bytes) = self.index.byte_totals().await;
        ArchiveStats {
            total_records: self.index.len().await,
            by_status,
            original_bytes,
            compressed_bytes,
        }
    }

    pub async fn health_check(&self) -> RetentionResult<HealthStatus> {
        Ok(self.blobs.health_check().await?)
    }
}

/// Entity ids are free text; keep path segments filesystem-safe
fn path_segment(raw: &str) -> String {
    let segment: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    match segment.as_str() {
        "" | "." | ".." => format!("_{}", hex::encode(raw)),
        _ => segment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBlobStore;
    use chrono::TimeZone;
    use futures::StreamExt;
    use crate::archive::AppendFault;
    use jctc_core::{HoldReason, HoldScope, KeyRef, LegalHold, LocalKeyStore, ManualClock};

    struct Fixture {
        blobs: Arc<MemoryBlobStore>,
        kms: Arc<LocalKeyStore>,
        clock: Arc<ManualClock>,
        store: ArchiveStore,
    }

    fn fixture() -> Fixture {
        let blobs = Arc::new(MemoryBlobStore::new());
        let kms = Arc::new(LocalKeyStore::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 17, 9, 0, 0).unwrap()));
        let store = ArchiveStore::new(
            blobs.clone(),
            Arc::new(ArchiveIndex::in_memory()),
            kms.clone(),
            clock.clone(),
        );
        Fixture {
            blobs,
            kms,
            clock,
            store,
        }
    }

    async fn draft(kms: &LocalKeyStore, entity_id: &str) -> ArchivedRecordDraft {
        let key = kms.generate_key().await.unwrap();
        ArchivedRecordDraft {
            entity_ref: EntityRef::new(EntityType::Evidence, entity_id),
            entity_version: 1,
            case_id: Some("case-1".into()),
            ciphertext: format!("JCA1-{}", entity_id).into_bytes(),
            sha256_checksum: "00".into(),
            encryption_key_reference: key,
            compressed_size: 9,
            original_size: 30,
            dependent_count: 0,
            sealed_at: Utc::now(),
        }
    }

    #[test]
    fn test_storage_path_convention() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap();
        let path = ArchiveStore::storage_path(at, &EntityRef::new(EntityType::AuditLog, "a/../b"), "x");
        assert_eq!(path, "2024/03/audit_log/a_.._b/x.jca");
    }

    #[tokio::test]
    async fn test_put_get_and_find() {
        let f = fixture();
        let d = draft(&f.kms, "ev-1").await;
        let record = f.store.put(&d).await.unwrap();
        assert!(record.storage_path.starts_with("2024/05/evidence/ev-1/"));

        let (fetched, bytes) = f.store.get(&record.id).await.unwrap();
        assert_eq!(fetched, record);
        assert_eq!(bytes, d.ciphertext);

        let found = f.store.find_for_entity(&d.entity_ref, 1).await.unwrap();
        assert_eq!(found.id, record.id);
        assert!(f.store.find_for_entity(&d.entity_ref, 2).await.is_none());
    }

    #[tokio::test]
    async fn test_index_failure_removes_blob() {
        let f = fixture();
        f.store.index().fail_next_appends(1);

        let err = f.store.put(&draft(&f.kms, "ev-1").await).await.unwrap_err();
        assert!(err.is_transient());
        assert!(f.blobs.is_empty().await);
        assert!(f.store.index().is_empty().await);
    }

    #[tokio::test]
    async fn test_unsynced_index_append_keeps_blob() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(MemoryBlobStore::new());
        let kms = Arc::new(LocalKeyStore::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 17, 9, 0, 0).unwrap()));
        let (index, _) = ArchiveIndex::open(dir.path()).await.unwrap();
        let store = ArchiveStore::new(blobs.clone(), Arc::new(index), kms.clone(), clock);

        store.index().inject_append_fault(AppendFault::SyncFailure);
        let record = store.put(&draft(&kms, "ev-1").await).await.unwrap();
        assert_eq!(blobs.len().await, 1);
        drop(store);

        let (replayed, report) = ArchiveIndex::open(dir.path()).await.unwrap();
        assert_eq!(report.records, 1);
        let stored = replayed.get(&record.id).await.unwrap();
        assert!(blobs.get(&stored.storage_path).await.is_ok());
    }

    #[tokio::test]
    async fn test_verify_marks_corrupt() {
        let f = fixture();
        let record = f.store.put(&draft(&f.kms, "ev-1").await).await.unwrap();

        assert!(f.store.verify_integrity(&record.id).await.unwrap());
        assert_eq!(f.store.record(&record.id).await.unwrap().status, ArchiveStatus::Verified);

        f.blobs.corrupt(&record.storage_path, 2).await;
        assert!(!f.store.verify_integrity(&record.id).await.unwrap());
        assert_eq!(f.store.record(&record.id).await.unwrap().status, ArchiveStatus::Corrupt);
    }

    #[tokio::test]
    async fn test_search_pages_with_cursor() {
        let f = fixture();
        for i in 0..5 {
            f.store.put(&draft(&f.kms, &format!("ev-{i}")).await).await.unwrap();
            f.clock.advance(chrono::Duration::minutes(1));
        }

        let filter = ArchiveFilter::default().entity_type(EntityType::Evidence);
        let first = f.store.search(&filter, None, 2).await.unwrap();
        assert_eq!(first.records.len(), 2);
        let second = f
            .store
            .search(&filter, first.next_cursor.as_deref(), 2)
            .await
            .unwrap();
        assert_eq!(second.records[0].source_entity_id, "ev-2");

        let third = f
            .store
            .search(&filter, second.next_cursor.as_deref(), 2)
            .await
            .unwrap();
        assert_eq!(third.records.len(), 1);
        assert!(third.next_cursor.is_none());

        assert!(f.store.search(&filter, Some("not-hex"), 2).await.is_err());
    }

    #[tokio::test]
    async fn test_search_stream_is_finite_and_restartable() {
        let f = fixture();
        for i in 0..7 {
            f.store.put(&draft(&f.kms, &format!("ev-{i}")).await).await.unwrap();
            f.clock.advance(chrono::Duration::seconds(30));
        }

        let all: Vec<ArchivedRecord> = f
            .store
            .search_stream(ArchiveFilter::default(), None, 3)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(all.len(), 7);

        let resumed: Vec<ArchivedRecord> = f
            .store
            .search_stream(ArchiveFilter::default(), Some(cursor_after(&all[3])), 3)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(resumed.len(), 3);
        assert_eq!(resumed[0].id, all[4].id);
    }

    #[tokio::test]
    async fn test_purge_requires_authorization_and_respects_holds() {
        let f = fixture();
        let d = draft(&f.kms, "ev-1").await;
        let record = f.store.put(&d).await.unwrap();
        let holds = LegalHoldRegistry::new();

        let anonymous = PurgeAuthorization::new("", "", "cleanup");
        assert!(matches!(
            f.store.purge(&record.id, &anonymous, &holds).await,
            Err(RetentionError::PermissionDenied(_))
        ));

        holds
            .apply_hold(
                LegalHold::new("hold-1", "Doe", HoldScope::AllData, HoldReason::Litigation)
                    .effective_from(f.clock.now() - chrono::Duration::days(1))
                    .with_entity(EntityRef::new(EntityType::Case, "case-1")),
            )
            .await
            .unwrap();
        let approved = PurgeAuthorization::new("records-officer", "CHG-1042", "retention complete");
        assert!(matches!(
            f.store.purge(&record.id, &approved, &holds).await,
            Err(RetentionError::LegalHoldConflict { .. })
        ));

        holds.close_hold("hold-1", "Settled", f.clock.now()).await.unwrap();
        let purged = f.store.purge(&record.id, &approved, &holds).await.unwrap();
        assert_eq!(purged.status, ArchiveStatus::Purged);
        assert!(!f.kms.contains(&KeyRef::new(purged.encryption_key_reference.clone())));
        assert!(f.blobs.is_empty().await);
        assert!(f.store.get(&record.id).await.is_err());
        assert_eq!(f.store.index().len().await, 1);
    }
}
