//! Entity Snapshots
//!
//! Typed, point-in-time views of case-management records as seen by the
//! retention engine. The live relational store is an external collaborator;
//! the engine only ever sees these snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::RetentionError;

/// Record classes subject to retention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Case,
    Evidence,
    Party,
    Task,
    User,
    AuditLog,
    AccessLog,
}

impl EntityType {
    /// All entity types, in declaration order
    pub const ALL: [EntityType; 7] = [
        EntityType::Case,
        EntityType::Evidence,
        EntityType::Party,
        EntityType::Task,
        EntityType::User,
        EntityType::AuditLog,
        EntityType::AccessLog,
    ];

    /// Get string representation (used in storage paths)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Case => "case",
            Self::Evidence => "evidence",
            Self::Party => "party",
            Self::Task => "task",
            Self::User => "user",
            Self::AuditLog => "audit_log",
            Self::AccessLog => "access_log",
        }
    }

    /// Snapshot field holding the date retention is measured from
    pub fn reference_field(&self) -> &'static str {
        match self {
            Self::Case | Self::Evidence => "closed_at",
            Self::User => "last_access_at",
            Self::Party | Self::Task | Self::AuditLog | Self::AccessLog => "created_at",
        }
    }

    /// Whether a hold on the owning case extends to this type
    pub fn cascades_from_case(&self) -> bool {
        matches!(self, Self::Evidence | Self::Party | Self::Task)
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = RetentionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        EntityType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| RetentionError::Validation(format!("Unknown entity type: {}", s)))
    }
}

/// Reference to a single entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

/// Typed field value of an entity snapshot
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Numeric view (integers widen to f64)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Timestamp view; RFC 3339 text is accepted
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(t) => Some(*t),
            Self::Text(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether a NaN or infinite float appears anywhere in the value
    pub fn has_non_finite(&self) -> bool {
        match self {
            Self::Float(f) => !f.is_finite(),
            Self::List(items) => items.iter().any(FieldValue::has_non_finite),
            _ => false,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<FieldValue>> From<Vec<T>> for FieldValue {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

/// Point-in-time snapshot of an entity
///
/// Fields live in an ordered map so the canonical encoding is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_ref: EntityRef,
    /// Owning case for case-linked records
    #[serde(default)]
    pub case_id: Option<String>,
    /// Monotonic record version from the live store
    pub version: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl EntitySnapshot {
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            entity_ref: EntityRef::new(entity_type, entity_id),
            case_id: None,
            version: 1,
            created_at,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_case(mut self, case_id: impl Into<String>) -> Self {
        self.case_id = Some(case_id.into());
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn with_field(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_ref.entity_type
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_ref.entity_id
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Date the retention period is measured from.
    ///
    /// `None` while the reference event has not happened yet (an open case
    /// has no `closed_at`) or the field is not a timestamp.
    pub fn reference_date(&self) -> Option<DateTime<Utc>> {
        match self.entity_type().reference_field() {
            "created_at" => Some(self.created_at),
            field => self.field(field).and_then(FieldValue::as_timestamp),
        }
    }

    /// First float field that JSON cannot carry (NaN or infinite)
    pub fn non_finite_field(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|(_, value)| value.has_non_finite())
            .map(|(name, _)| name.as_str())
    }

    /// Case this record belongs to (a case owns itself)
    pub fn owning_case(&self) -> Option<&str> {
        match self.entity_type() {
            EntityType::Case => Some(self.entity_id()),
            _ => self.case_id.as_deref(),
        }
    }

    /// Subject used for legal-hold coverage checks
    pub fn hold_subject(&self) -> HoldSubject<'_> {
        HoldSubject {
            entity_ref: &self.entity_ref,
            case_id: self.owning_case(),
        }
    }
}

/// Minimal identity needed to decide legal-hold coverage
#[derive(Debug, Clone, Copy)]
pub struct HoldSubject<'a> {
    pub entity_ref: &'a EntityRef,
    pub case_id: Option<&'a str>,
}

/// An entity together with the dependent records archived alongside it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveBundle {
    pub entity: EntitySnapshot,
    #[serde(default)]
    pub dependents: Vec<EntitySnapshot>,
}

impl ArchiveBundle {
    pub fn new(entity: EntitySnapshot, dependents: Vec<EntitySnapshot>) -> Self {
        Self { entity, dependents }
    }

    pub fn entity_ref(&self) -> &EntityRef {
        &self.entity.entity_ref
    }
}
