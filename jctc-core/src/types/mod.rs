//! Retention Domain Types

pub mod archive;
pub mod condition;
pub mod decision;
pub mod entity;
pub mod legal_hold;
pub mod policy;

pub use archive::{ArchiveStatus, ArchivedRecord, ArchivedRecordDraft};
pub use condition::{Condition, ConditionOperator};
pub use decision::{DecisionReason, EligibilityDecision, LifecycleAction, PolicyConflict};
pub use entity::{ArchiveBundle, EntityRef, EntitySnapshot, EntityType, FieldValue, HoldSubject};
pub use legal_hold::{
    ClassScope, HoldReason, HoldScope, LegalHold, LegalHoldAuditAction, LegalHoldAuditEntry,
    LegalHoldStatus,
};
pub use policy::{PolicyAuditAction, PolicyAuditEntry, RetentionPeriod, RetentionPolicy};
