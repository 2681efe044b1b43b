//! Hold snapshot
//!
//! The CLI has no long-running registry, so the holds a run installs are
//! written to the data directory and loaded again by later commands.
//! Restore consults them before any plaintext is produced.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use jctc_core::LegalHold;
use jctc_storage::{RetentionEngine, StorageConfig};

use crate::error::{CliError, CliResult};

/// Snapshot file name inside the data directory
pub const HOLD_FILE: &str = "legal-holds.json";

pub fn snapshot_path(storage: &StorageConfig) -> PathBuf {
    storage.data_dir.join(HOLD_FILE)
}

/// Apply every hold in the snapshot to the engine registry.
///
/// A missing snapshot means no holds were ever installed. Holds the
/// registry already knows are left alone.
pub async fn load(engine: &RetentionEngine, path: &Path) -> CliResult<usize> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let holds: Vec<LegalHold> = serde_json::from_slice(&raw)
        .map_err(|e| CliError::config(format!("Hold snapshot {}: {}", path.display(), e)))?;

    let mut loaded = 0;
    for hold in holds {
        if engine.holds.get_hold(&hold.hold_id).await.is_some() {
            continue;
        }
        let hold_id = hold.hold_id.clone();
        engine
            .holds
            .apply_hold(hold)
            .await
            .map_err(|e| CliError::config(format!("Hold snapshot {}: {}: {}", path.display(), hold_id, e)))?;
        loaded += 1;
    }
    debug!(path = %path.display(), loaded, "Hold snapshot loaded");
    Ok(loaded)
}

/// Write every registered hold, closed ones included, to the snapshot
pub async fn save(engine: &RetentionEngine, path: &Path) -> CliResult<()> {
    let holds = engine.holds.list_holds(None).await;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&tmp, serde_json::to_vec_pretty(&holds)?).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    info!(path = %path.display(), holds = holds.len(), "Hold snapshot written");
    Ok(())
}
