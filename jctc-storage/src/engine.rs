//! Engine wiring
//!
//! Builds the retention components for a local deployment: filesystem
//! blobs, journal-backed index, file-backed development key store.

use std::sync::Arc;
use tracing::info;

use jctc_core::{ArchiveCodec, Clock, LocalKeyStore, RetentionResult};

use crate::alerts::{AlertDispatcher, LogAlertSink, OperatorQueue};
use crate::archive::{ArchiveIndex, ArchiveStore, ReplayReport};
use crate::backend::{BlobStore, LocalBlobStore, MemoryBlobStore};
use crate::config::RetentionConfig;
use crate::entity_source::EntitySource;
use crate::legal_hold::LegalHoldRegistry;
use crate::policy_store::PolicyStore;
use crate::restoration::{RestorationService, RestoreAuthorizer};
use crate::scheduler::{NoticeLedger, RetentionScheduler, SchedulerDeps};

/// Wired retention components
#[derive(Clone)]
pub struct RetentionEngine {
    pub config: RetentionConfig,
    pub policies: Arc<PolicyStore>,
    pub holds: Arc<LegalHoldRegistry>,
    pub kms: Arc<LocalKeyStore>,
    pub codec: Arc<ArchiveCodec>,
    pub store: Arc<ArchiveStore>,
    pub alerts: Arc<OperatorQueue>,
    pub scheduler: Arc<RetentionScheduler>,
    pub restoration: Arc<RestorationService>,
}

impl RetentionEngine {
    /// Open the engine on `config.storage.data_dir`
    pub async fn open_local(
        config: RetentionConfig,
        source: Arc<dyn EntitySource>,
        authorizer: Arc<dyn RestoreAuthorizer>,
        clock: Arc<dyn Clock>,
    ) -> RetentionResult<(Self, ReplayReport)> {
        let blobs = Arc::new(LocalBlobStore::new(config.storage.blob_dir()).await?);
        let (index, replay) = ArchiveIndex::open(config.storage.index_dir()).await?;
        let kms = Arc::new(LocalKeyStore::open(config.storage.key_file()).await?);
        let notices = Arc::new(NoticeLedger::open(config.storage.index_dir()).await?);

        info!(
            data_dir = %config.storage.data_dir.display(),
            archives = replay.records,
            skipped_lines = replay.skipped_lines,
            "Retention engine opened"
        );

        let engine = Self::assemble(
            config,
            blobs,
            Arc::new(index),
            kms,
            notices,
            source,
            authorizer,
            clock,
        );
        engine.restoration.release_orphaned().await?;
        Ok((engine, replay))
    }

    /// Engine backed entirely by memory
    pub fn in_memory(
        config: RetentionConfig,
        source: Arc<dyn EntitySource>,
        authorizer: Arc<dyn RestoreAuthorizer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::assemble(
            config,
            Arc::new(MemoryBlobStore::new()),
            Arc::new(ArchiveIndex::in_memory()),
            Arc::new(LocalKeyStore::new()),
            Arc::new(NoticeLedger::in_memory()),
            source,
            authorizer,
            clock,
        )
    }

    fn assemble(
        config: RetentionConfig,
        blobs: Arc<dyn BlobStore>,
        index: Arc<ArchiveIndex>,
        kms: Arc<LocalKeyStore>,
        notices: Arc<NoticeLedger>,
        source: Arc<dyn EntitySource>,
        authorizer: Arc<dyn RestoreAuthorizer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let policies = Arc::new(PolicyStore::new(clock.clone()));
        let holds = Arc::new(LegalHoldRegistry::new());
        let codec = Arc::new(ArchiveCodec::new(kms.clone()));
        let store = Arc::new(ArchiveStore::new(blobs, index, kms.clone(), clock.clone()));
        let alerts = Arc::new(OperatorQueue::new());
        let dispatcher = AlertDispatcher::new()
            .with_sink(Arc::new(LogAlertSink))
            .with_sink(alerts.clone());

        let scheduler = Arc::new(RetentionScheduler::new(
            SchedulerDeps {
                policies: policies.clone(),
                holds: holds.clone(),
                source,
                codec: codec.clone(),
                store: store.clone(),
                alerts: Arc::new(dispatcher),
                notices,
                clock: clock.clone(),
            },
            config.scheduler.clone(),
        ));

        let restoration = Arc::new(RestorationService::new(
            store.clone(),
            codec.clone(),
            holds.clone(),
            authorizer,
            clock,
            config.restoration.clone(),
        ));

        Self {
            config,
            policies,
            holds,
            kms,
            codec,
            store,
            alerts,
            scheduler,
            restoration,
        }
    }
}
