//! Deadline notice ledger
//!
//! Remembers which deadline notices were delivered so a threshold fires
//! once per (entity, policy, threshold, deadline), no matter how many passes
//! see the entity inside the window. Backed by a JSON-lines file next to the
//! archive index when opened on a path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{info, warn};

use jctc_core::EntityRef;

use crate::error::{StorageError, StorageResult};

/// Ledger file name
pub const NOTICE_FILE: &str = "deadline-notices.jsonl";

/// Identity of one deadline notice
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoticeKey {
    pub entity_ref: EntityRef,
    pub policy_id: String,
    pub threshold_days: u32,
    /// A new deadline (e.g. a reopened and re-closed case) is a new notice
    pub deadline: DateTime<Utc>,
}

/// Delivered deadline notices
pub struct NoticeLedger {
    path: Option<PathBuf>,
    sent: Mutex<HashSet<NoticeKey>>,
}

impl NoticeLedger {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            sent: Mutex::new(HashSet::new()),
        }
    }

    /// Open the ledger in `dir`, loading delivered notices
    pub async fn open(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| StorageError::Index(format!("Failed to create notice directory: {}", e)))?;
        let path = dir.join(NOTICE_FILE);

        let mut sent = HashSet::new();
        match File::open(&path).await {
            Ok(file) => {
                let mut lines = BufReader::new(file).lines();
                while let Some(line) = lines
                    .next_line()
                    .await
                    .map_err(|e| StorageError::Index(format!("Failed to read notice ledger: {}", e)))?
                {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<NoticeKey>(&line) {
                        Ok(key) => {
                            sent.insert(key);
                        }
                        Err(e) => warn!(error = %e, "Skipping unreadable notice line"),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::Index(format!("Failed to open notice ledger: {}", e))),
        }

        info!(notices = sent.len(), "Deadline notice ledger opened");
        Ok(Self {
            path: Some(path),
            sent: Mutex::new(sent),
        })
    }

    /// Reserve a notice. False when it was already delivered or is being
    /// delivered by a concurrent pass.
    pub async fn claim(&self, key: &NoticeKey) -> bool {
        self.sent.lock().await.insert(key.clone())
    }

    /// Give a claim back after delivery failed
    pub async fn release(&self, key: &NoticeKey) {
        self.sent.lock().await.remove(key);
    }

    /// Record a delivered notice
    pub async fn confirm(&self, key: &NoticeKey) -> StorageResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut line = serde_json::to_vec(key)
            .map_err(|e| StorageError::Index(format!("Failed to encode notice: {}", e)))?;
        line.push(b'\n');

        // Held across the append so lines never interleave
        let _sent = self.sent.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| StorageError::Index(format!("Failed to open notice ledger: {}", e)))?;
        file.write_all(&line)
            .await
            .map_err(|e| StorageError::Index(format!("Failed to append notice: {}", e)))?;
        file.sync_data()
            .await
            .map_err(|e| StorageError::Index(format!("Failed to sync notice ledger: {}", e)))
    }

    pub async fn len(&self) -> usize {
        self.sent.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sent.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use jctc_core::EntityType;

    fn key(threshold_days: u32) -> NoticeKey {
        NoticeKey {
            entity_ref: EntityRef::new(EntityType::Party, "p-1"),
            policy_id: "parties".into(),
            threshold_days,
            deadline: Utc.with_ymd_and_hms(2024, 6, 20, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_claim_once() {
        let ledger = NoticeLedger::in_memory();
        assert!(ledger.claim(&key(30)).await);
        assert!(!ledger.claim(&key(30)).await);
        assert!(ledger.claim(&key(7)).await);

        ledger.release(&key(7)).await;
        assert!(ledger.claim(&key(7)).await);
    }

    #[tokio::test]
    async fn test_confirmed_notices_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ledger = NoticeLedger::open(dir.path()).await.unwrap();
            assert!(ledger.claim(&key(30)).await);
            ledger.confirm(&key(30)).await.unwrap();
        }

        let ledger = NoticeLedger::open(dir.path()).await.unwrap();
        assert_eq!(ledger.len().await, 1);
        assert!(!ledger.claim(&key(30)).await);
    }
}
