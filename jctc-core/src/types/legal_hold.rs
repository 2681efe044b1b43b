//! Legal Holds
//!
//! A legal hold suspends normal retention for the records it covers.
//! Holds expire on their own once `expiration_date` passes, or are closed
//! explicitly; either way they are kept for audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::entity::{EntityRef, EntityType, HoldSubject};

/// What part of the covered records a hold preserves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HoldScope {
    AllData,
    MetadataOnly,
    AccessLogs,
    Custom,
}

impl HoldScope {
    /// Whether the hold forbids deleting the primary record
    pub fn blocks_delete(&self) -> bool {
        matches!(self, Self::AllData | Self::MetadataOnly)
    }

    /// Whether the hold forbids archiving the primary record.
    ///
    /// A metadata-only hold lets content move to the archive when the
    /// governing policy opts in with `legal_hold_override`.
    pub fn blocks_archive(&self, legal_hold_override: bool) -> bool {
        match self {
            Self::AllData => true,
            Self::MetadataOnly => !legal_hold_override,
            Self::AccessLogs | Self::Custom => false,
        }
    }

    /// Whether access-log sub-records must survive deletion
    pub fn protects_access_logs(&self) -> bool {
        matches!(self, Self::AccessLogs | Self::Custom)
    }
}

/// Why the hold was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HoldReason {
    Litigation,
    Regulatory,
    Internal,
    Preservation,
}

/// Legal hold status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegalHoldStatus {
    Active,
    Closed,
}

/// Class-level coverage: every entity of a type, optionally within one case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassScope {
    pub entity_type: EntityType,
    #[serde(default)]
    pub case_id: Option<String>,
}

impl ClassScope {
    pub fn covers(&self, subject: &HoldSubject<'_>) -> bool {
        if subject.entity_ref.entity_type != self.entity_type {
            return false;
        }
        match &self.case_id {
            Some(case_id) => subject.case_id == Some(case_id.as_str()),
            None => true,
        }
    }
}

/// Legal hold audit action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegalHoldAuditAction {
    Applied,
    Closed,
    Extended,
    EntityAdded,
}

/// Legal hold audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegalHoldAuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: LegalHoldAuditAction,
    pub details: String,
}

/// Legal hold record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegalHold {
    pub hold_id: String,
    pub title: String,
    pub scope: HoldScope,
    pub reason: HoldReason,
    /// Individually covered entities
    #[serde(default)]
    pub entities: BTreeSet<EntityRef>,
    #[serde(default)]
    pub class_scopes: Vec<ClassScope>,
    pub effective_date: DateTime<Utc>,
    /// `None` = indefinite
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
    /// Also forbids restoring covered archives
    #[serde(default)]
    pub restricts_access: bool,
    #[serde(default)]
    pub issued_by: String,
    pub status: LegalHoldStatus,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub close_reason: Option<String>,
    #[serde(default)]
    pub audit_entries: Vec<LegalHoldAuditEntry>,
}

impl LegalHold {
    /// Create a hold effective immediately
    pub fn new(hold_id: &str, title: &str, scope: HoldScope, reason: HoldReason) -> Self {
        let mut hold = Self {
            hold_id: hold_id.to_string(),
            title: title.to_string(),
            scope,
            reason,
            entities: BTreeSet::new(),
            class_scopes: Vec::new(),
            effective_date: Utc::now(),
            expiration_date: None,
            restricts_access: false,
            issued_by: String::new(),
            status: LegalHoldStatus::Active,
            closed_at: None,
            close_reason: None,
            audit_entries: Vec::new(),
        };

        hold.add_audit_entry(LegalHoldAuditAction::Applied, "Legal hold applied");

        hold
    }

    pub fn with_entity(mut self, entity: EntityRef) -> Self {
        self.entities.insert(entity);
        self
    }

    pub fn with_class_scope(mut self, entity_type: EntityType, case_id: Option<&str>) -> Self {
        self.class_scopes.push(ClassScope {
            entity_type,
            case_id: case_id.map(str::to_string),
        });
        self
    }

    pub fn effective_from(mut self, at: DateTime<Utc>) -> Self {
        self.effective_date = at;
        self
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expiration_date = Some(at);
        self
    }

    pub fn restricting_access(mut self) -> Self {
        self.restricts_access = true;
        self
    }

    pub fn issued_by(mut self, authority: &str) -> Self {
        self.issued_by = authority.to_string();
        self
    }

    /// Check whether the hold is in force at `as_of`
    pub fn is_active_at(&self, as_of: DateTime<Utc>) -> bool {
        if self.status != LegalHoldStatus::Active {
            return false;
        }
        if as_of < self.effective_date {
            return false;
        }
        match self.expiration_date {
            Some(expiration) => expiration > as_of,
            None => true,
        }
    }

    /// Whether the hold names the subject directly or by class
    pub fn covers_directly(&self, subject: &HoldSubject<'_>) -> bool {
        self.entities.contains(subject.entity_ref)
            || self.class_scopes.iter().any(|c| c.covers(subject))
    }

    /// Whether an all-data hold on the owning case extends to the subject
    pub fn cascades_to(&self, subject: &HoldSubject<'_>) -> bool {
        if self.scope != HoldScope::AllData || !subject.entity_ref.entity_type.cascades_from_case() {
            return false;
        }
        match subject.case_id {
            Some(case_id) => self
                .entities
                .contains(&EntityRef::new(EntityType::Case, case_id)),
            None => false,
        }
    }

    pub fn covers(&self, subject: &HoldSubject<'_>) -> bool {
        self.covers_directly(subject) || self.cascades_to(subject)
    }

    /// Case ids this hold names explicitly
    pub fn case_ids(&self) -> impl Iterator<Item = &str> {
        self.entities
            .iter()
            .filter(|e| e.entity_type == EntityType::Case)
            .map(|e| e.entity_id.as_str())
    }

    /// Close the hold
    pub fn close(&mut self, reason: &str, at: DateTime<Utc>) {
        self.status = LegalHoldStatus::Closed;
        self.closed_at = Some(at);
        self.close_reason = Some(reason.to_string());

        self.add_audit_entry(LegalHoldAuditAction::Closed, reason);
    }

    /// Extend or set the expiration date
    pub fn extend(&mut self, until: Option<DateTime<Utc>>) {
        self.expiration_date = until;
        let details = match until {
            Some(t) => format!("Extended until: {}", t),
            None => "Extended indefinitely".to_string(),
        };
        self.add_audit_entry(LegalHoldAuditAction::Extended, &details);
    }

    /// Add an entity; returns false if it was already covered
    pub fn add_entity(&mut self, entity: EntityRef) -> bool {
        let details = format!("Added entity: {}", entity);
        if self.entities.insert(entity) {
            self.add_audit_entry(LegalHoldAuditAction::EntityAdded, &details);
            true
        } else {
            false
        }
    }

    fn add_audit_entry(&mut self, action: LegalHoldAuditAction, details: &str) {
        self.audit_entries.push(LegalHoldAuditEntry {
            timestamp: Utc::now(),
            action,
            details: details.to_string(),
        });
    }
}
