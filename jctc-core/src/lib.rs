//! JCTC Retention Core
//!
//! Domain model and pure decision logic of the JCTC retention & archival
//! engine. Records of a cybercrime case (cases, evidence, parties, tasks,
//! users, audit and access logs) are kept for a legally mandated period,
//! then archived or securely deleted, unless a legal hold suspends that.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      jctc-storage                             │
//! │  RetentionScheduler · ArchiveStore · RestorationService       │
//! └──────────────┬──────────────────────────────┬─────────────────┘
//!                │ evaluate                     │ archive / restore
//! ┌──────────────▼───────────────┐  ┌───────────▼─────────────────┐
//! │  EligibilityEvaluator        │  │  ArchiveCodec               │
//! │  policies + holds → action   │  │  JSON → zstd → AES-256-GCM  │
//! └──────────────────────────────┘  └───────────┬─────────────────┘
//!                                               │ per-archive keys
//!                                   ┌───────────▼─────────────────┐
//!                                   │  KeyManagement              │
//!                                   └─────────────────────────────┘
//! ```
//!
//! # Core Types
//!
//! - [`EntitySnapshot`]: point-in-time view of a record
//! - [`RetentionPolicy`]: how long a class of records is kept
//! - [`LegalHold`]: suspension of retention for covered records
//! - [`EligibilityDecision`]: what should happen to one record now
//! - [`ArchivedRecord`]: index entry of a sealed archive

pub mod clock;
pub mod crypto;
pub mod error;
pub mod evaluator;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use crypto::{
    ArchiveCodec, KeyHandle, KeyManagement, KeyMaterial, KeyRef, KeyStoreError, LocalKeyStore,
};
pub use error::{ErrorKind, RestoreStage, RetentionError, RetentionResult};
pub use evaluator::EligibilityEvaluator;
pub use types::{
    ArchiveBundle, ArchiveStatus, ArchivedRecord, ArchivedRecordDraft, ClassScope, Condition,
    ConditionOperator, DecisionReason, EligibilityDecision, EntityRef, EntitySnapshot, EntityType,
    FieldValue, HoldReason, HoldScope, HoldSubject, LegalHold, LegalHoldAuditAction,
    LegalHoldStatus, LifecycleAction, PolicyAuditAction, PolicyConflict, RetentionPeriod,
    RetentionPolicy,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
