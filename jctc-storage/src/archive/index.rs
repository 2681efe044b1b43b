//! Archive Index
//!
//! In-memory maps of [`ArchivedRecord`]s backed by an append-only JSON-lines
//! journal. Every change to a record appends its full new state; on open the
//! journal is replayed and the last entry per archive id wins. Entries are
//! never removed: secure deletion leaves a `PURGED` tombstone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::io::SeekFrom;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use jctc_core::{ArchiveStatus, ArchivedRecord, EntityRef};

use crate::error::{StorageError, StorageResult};

/// Journal file name
pub const JOURNAL_FILE: &str = "archive-index.jsonl";

/// Search order key: archival time, then id
pub type IndexKey = (DateTime<Utc>, String);

/// Journal append fault, injected by tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendFault {
    /// Fail before anything reaches the journal
    Reject,
    /// Write half of the line, then fail
    TornWrite,
    /// Write the whole line, then fail the sync
    SyncFailure,
}

/// One journal line
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalEntry {
    seq: u64,
    recorded_at: DateTime<Utc>,
    record: ArchivedRecord,
}

#[derive(Default)]
struct IndexState {
    records: HashMap<String, ArchivedRecord>,
    by_entity: HashMap<EntityRef, BTreeSet<String>>,
    order: BTreeSet<IndexKey>,
}

impl IndexState {
    fn apply(&mut self, record: ArchivedRecord) {
        if !self.records.contains_key(&record.id) {
            self.by_entity
                .entry(record.entity_ref())
                .or_default()
                .insert(record.id.clone());
            self.order.insert((record.archived_at, record.id.clone()));
        }
        self.records.insert(record.id.clone(), record);
    }
}

/// Journal replay summary
#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    pub entries: usize,
    pub records: usize,
    pub skipped_lines: usize,
}

/// Archive index
pub struct ArchiveIndex {
    journal_path: Option<PathBuf>,
    journal: Mutex<Option<File>>,
    state: RwLock<IndexState>,
    next_seq: AtomicU64,
    /// Journal ends in a torn line that must be terminated first
    needs_separator: AtomicBool,
    #[cfg(any(test, feature = "fault-injection"))]
    faults: std::sync::Mutex<std::collections::VecDeque<AppendFault>>,
}

impl ArchiveIndex {
    /// Index without a journal (tests, dry tooling)
    pub fn in_memory() -> Self {
        Self {
            journal_path: None,
            journal: Mutex::new(None),
            state: RwLock::new(IndexState::default()),
            next_seq: AtomicU64::new(1),
            needs_separator: AtomicBool::new(false),
            #[cfg(any(test, feature = "fault-injection"))]
            faults: std::sync::Mutex::new(std::collections::VecDeque::new()),
        }
    }

    /// Open the journal in `dir`, replaying existing entries
    pub async fn open(dir: impl AsRef<Path>) -> StorageResult<(Self, ReplayReport)> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| StorageError::Index(format!("Failed to create index directory: {}", e)))?;

        let path = dir.join(JOURNAL_FILE);
        let mut index = Self::in_memory();
        let report = index.replay(&path).await?;
        index.journal_path = Some(path);

        info!(
            entries = report.entries,
            records = report.records,
            skipped = report.skipped_lines,
            "Archive index opened"
        );
        Ok((index, report))
    }

    async fn replay(&mut self, path: &Path) -> StorageResult<ReplayReport> {
        let mut report = ReplayReport::default();
        let file = match File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(StorageError::Index(format!("Failed to open journal: {}", e))),
        };

        let mut lines = BufReader::new(file).lines();
        let state = self.state.get_mut();
        let mut max_seq = 0;

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| StorageError::Index(format!("Failed to read journal line: {}", e)))?
        {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEntry>(&line) {
                Ok(entry) => {
                    max_seq = max_seq.max(entry.seq);
                    state.apply(entry.record);
                    report.entries += 1;
                }
                Err(e) => {
                    // A torn final write from a crash; everything before it is intact
                    warn!(error = %e, "Skipping unreadable journal line");
                    report.skipped_lines += 1;
                }
            }
        }

        report.records = state.records.len();
        self.next_seq.store(max_seq + 1, Ordering::SeqCst);
        self.needs_separator
            .store(!ends_with_newline(path).await, Ordering::SeqCst);
        Ok(report)
    }

    /// Reject the next `count` journal appends
    #[cfg(any(test, feature = "fault-injection"))]
    pub fn fail_next_appends(&self, count: usize) {
        for _ in 0..count {
            self.inject_append_fault(AppendFault::Reject);
        }
    }

    /// Queue a fault for an upcoming journal append
    #[cfg(any(test, feature = "fault-injection"))]
    pub fn inject_append_fault(&self, fault: AppendFault) {
        self.faults
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(fault);
    }

    #[cfg(any(test, feature = "fault-injection"))]
    fn take_fault(&self) -> Option<AppendFault> {
        self.faults
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
    }

    #[cfg(not(any(test, feature = "fault-injection")))]
    fn take_fault(&self) -> Option<AppendFault> {
        None
    }

    /// Durably record the new state of an archive.
    ///
    /// `StorageError::JournalUnsynced` means the entry was appended and
    /// applied but the sync failed; the caller must treat the record as
    /// written.
    pub async fn upsert(&self, record: ArchivedRecord) -> StorageResult<()> {
        let mut journal = self.journal.lock().await;
        let fault = self.take_fault();

        if fault == Some(AppendFault::Reject) {
            return Err(StorageError::Index(format!(
                "injected append failure for {}",
                record.id
            )));
        }

        if let Some(path) = &self.journal_path {
            let entry = JournalEntry {
                seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
                recorded_at: Utc::now(),
                record: record.clone(),
            };
            let mut line = Vec::new();
            if self.needs_separator.load(Ordering::SeqCst) {
                line.push(b'\n');
            }
            serde_json::to_writer(&mut line, &entry)
                .map_err(|e| StorageError::Index(format!("Failed to encode journal entry: {}", e)))?;
            line.push(b'\n');

            if journal.is_none() {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await
                    .map_err(|e| StorageError::Index(format!("Failed to open journal: {}", e)))?;
                *journal = Some(file);
            }
            if let Some(file) = journal.as_mut() {
                let written = match fault {
                    Some(AppendFault::TornWrite) => match file.write_all(&line[..line.len() / 2]).await {
                        Ok(()) => Err(std::io::Error::other("injected torn write")),
                        Err(e) => Err(e),
                    },
                    _ => file.write_all(&line).await,
                };
                if let Err(e) = written {
                    // Part of the line may be on disk: start the next entry on a fresh line
                    self.needs_separator.store(true, Ordering::SeqCst);
                    *journal = None;
                    return Err(StorageError::Index(format!("Failed to append journal: {}", e)));
                }
                self.needs_separator.store(false, Ordering::SeqCst);

                let synced = match fault {
                    Some(AppendFault::SyncFailure) => Err(std::io::Error::other("injected sync failure")),
                    _ => file.sync_data().await,
                };
                if let Err(e) = synced {
                    self.state.write().await.apply(record);
                    return Err(StorageError::JournalUnsynced(e.to_string()));
                }
            }
        }

        self.state.write().await.apply(record);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<ArchivedRecord> {
        self.state.read().await.records.get(id).cloned()
    }

    /// All archives ever written for an entity, oldest first
    pub async fn for_entity(&self, entity: &EntityRef) -> Vec<ArchivedRecord> {
        let state = self.state.read().await;
        let mut records: Vec<ArchivedRecord> = state
            .by_entity
            .get(entity)
            .into_iter()
            .flatten()
            .filter_map(|id| state.records.get(id))
            .cloned()
            .collect();
        records.sort_by(|a, b| (a.archived_at, &a.id).cmp(&(b.archived_at, &b.id)));
        records
    }

    /// Up to `limit` matching records strictly after `after`, in index order
    pub async fn scan_after<F>(&self, after: Option<&IndexKey>, limit: usize, mut predicate: F) -> Vec<ArchivedRecord>
    where
        F: FnMut(&ArchivedRecord) -> bool,
    {
        use std::ops::Bound;

        let state = self.state.read().await;
        let lower = match after {
            Some(key) => Bound::Excluded(key.clone()),
            None => Bound::Unbounded,
        };

        state
            .order
            .range((lower, Bound::Unbounded))
            .filter_map(|(_, id)| state.records.get(id))
            .filter(|r| predicate(r))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.records.is_empty()
    }

    /// Record count per status
    pub async fn status_counts(&self) -> BTreeMap<ArchiveStatus, usize> {
        let state = self.state.read().await;
        let mut counts = BTreeMap::new();
        for record in state.records.values() {
            *counts.entry(record.status).or_insert(0) += 1;
        }
        counts
    }

    /// (original bytes, compressed bytes) over non-purged archives
    pub async fn byte_totals(&self) -> (u64, u64) {
        let state = self.state.read().await;
        state
            .records
            .values()
            .filter(|r| r.status != ArchiveStatus::Purged)
            .fold((0, 0), |(o, c), r| (o + r.original_size, c + r.compressed_size))
    }
}

async fn ends_with_newline(path: &Path) -> bool {
    let Ok(mut file) = File::open(path).await else {
        return true;
    };
    if file.seek(SeekFrom::End(-1)).await.is_err() {
        // empty file
        return true;
    }
    let mut last = [0u8; 1];
    matches!(file.read_exact(&mut last).await, Ok(_) if last[0] == b'\n')
}
