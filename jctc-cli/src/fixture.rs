//! Fixture files
//!
//! A fixture describes the live population for a local retention pass:
//!
//! ```json
//! {
//!   "entities": [{ "entity_ref": { "entity_type": "CASE", "entity_id": "case-1" }, ... }],
//!   "policies": [{ "id": "cases-7y", "entity_type": "CASE", "retention_period": "YEARS_7", ... }],
//!   "holds": [{ "hold_id": "hold-1", "scope": "ALL_DATA", ... }]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use jctc_core::{EntitySnapshot, LegalHold, RetentionPolicy};
use jctc_storage::{InMemoryEntitySource, RetentionEngine};

use crate::error::{CliError, CliResult};

const FIXTURE_ACTOR: &str = "fixture";

/// Entities, policies and holds for one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Fixture {
    pub entities: Vec<EntitySnapshot>,
    pub policies: Vec<RetentionPolicy>,
    pub holds: Vec<LegalHold>,
}

impl Fixture {
    pub async fn load(path: &Path) -> CliResult<Self> {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|e| CliError::fixture(format!("Cannot read {}: {}", path.display(), e)))?;
        let fixture: Fixture = serde_json::from_slice(&raw)
            .map_err(|e| CliError::fixture(format!("{}: {}", path.display(), e)))?;
        debug!(
            path = %path.display(),
            entities = fixture.entities.len(),
            policies = fixture.policies.len(),
            holds = fixture.holds.len(),
            "Fixture loaded"
        );
        Ok(fixture)
    }

    /// Entity source seeded with the fixture's entities
    pub fn source(&self) -> InMemoryEntitySource {
        InMemoryEntitySource::from_snapshots(self.entities.iter().cloned())
    }

    /// Register policies (in file order, which fixes creation order) and
    /// holds. Holds already registered under the same id are kept as they are.
    pub async fn install(&self, engine: &RetentionEngine) -> CliResult<()> {
        for policy in &self.policies {
            engine
                .policies
                .create_policy(policy.clone(), FIXTURE_ACTOR)
                .await
                .map_err(|e| CliError::fixture(format!("Policy {}: {}", policy.id, e)))?;
        }
        for hold in &self.holds {
            if engine.holds.get_hold(&hold.hold_id).await.is_some() {
                debug!(hold_id = %hold.hold_id, "Hold already registered");
                continue;
            }
            engine
                .holds
                .apply_hold(hold.clone())
                .await
                .map_err(|e| CliError::fixture(format!("Hold {}: {}", hold.hold_id, e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jctc_core::{EntityType, RetentionPeriod};
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "entities": [
            {
                "entity_ref": { "entity_type": "CASE", "entity_id": "case-1" },
                "version": 3,
                "created_at": "2012-03-01T00:00:00Z",
                "fields": {
                    "closed_at": { "type": "timestamp", "value": "2014-06-30T00:00:00Z" },
                    "title": { "type": "text", "value": "State v. Doe" }
                }
            }
        ],
        "policies": [
            {
                "id": "cases-7y",
                "entity_type": "CASE",
                "retention_period": "YEARS_7",
                "auto_archive": true
            }
        ]
    }"#;

    #[tokio::test]
    async fn test_load_fixture() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let fixture = Fixture::load(file.path()).await.unwrap();
        assert_eq!(fixture.entities.len(), 1);
        assert_eq!(fixture.entities[0].entity_type(), EntityType::Case);
        assert_eq!(fixture.policies[0].retention_period, RetentionPeriod::Years7);
        assert!(fixture.policies[0].active);
        assert!(fixture.holds.is_empty());
    }

    #[tokio::test]
    async fn test_load_rejects_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ \"entities\": 12 }").unwrap();

        let err = Fixture::load(file.path()).await.unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
