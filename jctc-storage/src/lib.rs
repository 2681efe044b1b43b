//! JCTC Retention Storage & Orchestration
//!
//! Everything in the retention engine that touches state: archive storage,
//! the legal-hold registry, the policy store, the scheduler that drives
//! retention passes, and the restoration workflow.
//!
//! # Components
//!
//! - **backend**: blob stores (local filesystem, in-memory)
//! - **archive**: journal-backed index and the [`ArchiveStore`]
//! - **legal_hold**: [`LegalHoldRegistry`] and the per-pass hold cache
//! - **scheduler**: [`RetentionScheduler`] passes and background driver
//! - **restoration**: [`RestorationService`] staging with expiry
//!
//! # Usage
//!
//! ```ignore
//! use jctc_storage::{PassOptions, RetentionConfig, RetentionEngine, RoleAuthorizer};
//!
//! let (engine, _) = RetentionEngine::open_local(
//!     RetentionConfig::from_env(),
//!     source,
//!     Arc::new(RoleAuthorizer::default()),
//!     Arc::new(SystemClock),
//! )
//! .await?;
//! let report = engine.scheduler.run_pass(PassOptions::dry_run()).await?;
//! ```

pub mod alerts;
pub mod archive;
pub mod backend;
pub mod config;
pub mod engine;
pub mod entity_source;
pub mod error;
pub mod legal_hold;
pub mod policy_store;
pub mod restoration;
pub mod scheduler;
pub mod telemetry;

pub use alerts::{
    AlertDispatcher, AlertKind, AlertSeverity, AlertSink, LogAlertSink, OperatorAlert, OperatorQueue,
};
pub use archive::{
    AppendFault, ArchiveFilter, ArchiveIndex, ArchiveStats, ArchiveStore, PurgeAuthorization, ReplayReport,
    SearchPage,
};
pub use backend::{BackendType, BlobInfo, BlobStore, HealthStatus, LocalBlobStore, MemoryBlobStore};
pub use config::{ConfigIssue, RestorationConfig, RetentionConfig, SchedulerConfig, StorageConfig};
pub use engine::RetentionEngine;
pub use entity_source::{DeletionReceipt, EntitySource, InMemoryEntitySource, ACCESS_TARGET_FIELD};
pub use error::{StorageError, StorageResult};
pub use legal_hold::{LegalHoldRegistry, LegalHoldStats, PassHoldCache};
pub use policy_store::{PolicyStore, PolicyUpdate};
pub use restoration::{
    ReaperHandle, RequesterContext, RestorationService, RestoreAuthorizer, RestoreDenial,
    RoleAuthorizer, StagedRestoration,
};
pub use scheduler::{
    EntityFailure, NoticeKey, NoticeLedger, PassCounts, PassOptions, PassReport, RetentionScheduler,
    SchedulerCommand, SchedulerDeps, SchedulerState,
};
pub use telemetry::{init_logging, LogConfig, LogFormat, LogLevel};
