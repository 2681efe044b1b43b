//! Policy Conditions
//!
//! Conditions are a small expression tree of field comparisons joined by
//! conjunction, evaluated against an [`EntitySnapshot`].

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::entity::{EntitySnapshot, FieldValue};

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Field equals one element of a list value
    In,
    NotIn,
    /// Text contains substring, or list contains element
    Contains,
    Exists,
    NotExists,
}

/// Condition expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// Leaf comparison of a snapshot field against a literal
    Compare {
        field: String,
        operator: ConditionOperator,
        #[serde(default)]
        value: FieldValue,
    },
    /// Every nested condition must hold (empty = true)
    All { conditions: Vec<Condition> },
}

impl Condition {
    /// Create a leaf comparison
    pub fn compare(field: &str, operator: ConditionOperator, value: impl Into<FieldValue>) -> Self {
        Condition::Compare {
            field: field.to_string(),
            operator,
            value: value.into(),
        }
    }

    pub fn eq(field: &str, value: impl Into<FieldValue>) -> Self {
        Self::compare(field, ConditionOperator::Eq, value)
    }

    pub fn exists(field: &str) -> Self {
        Self::compare(field, ConditionOperator::Exists, FieldValue::Null)
    }

    pub fn all(conditions: Vec<Condition>) -> Self {
        Condition::All { conditions }
    }

    /// Evaluate against a snapshot
    pub fn evaluate(&self, entity: &EntitySnapshot) -> bool {
        match self {
            Condition::All { conditions } => conditions.iter().all(|c| c.evaluate(entity)),
            Condition::Compare {
                field,
                operator,
                value,
            } => {
                let actual = resolve_field(entity, field);
                apply(*operator, actual.as_ref(), value)
            }
        }
    }

    /// Number of leaf comparisons
    pub fn leaf_count(&self) -> usize {
        match self {
            Condition::Compare { .. } => 1,
            Condition::All { conditions } => conditions.iter().map(Condition::leaf_count).sum(),
        }
    }
}

/// Resolve a field name, including the snapshot's built-in attributes
fn resolve_field(entity: &EntitySnapshot, field: &str) -> Option<FieldValue> {
    match field {
        "entity_id" => Some(FieldValue::Text(entity.entity_id().to_string())),
        "case_id" => entity.case_id.clone().map(FieldValue::Text),
        "version" => Some(FieldValue::Integer(entity.version as i64)),
        "created_at" if !entity.fields.contains_key("created_at") => {
            Some(FieldValue::Timestamp(entity.created_at))
        }
        _ => entity.field(field).cloned(),
    }
}

fn apply(operator: ConditionOperator, actual: Option<&FieldValue>, expected: &FieldValue) -> bool {
    let present = actual.filter(|v| !v.is_null());

    match operator {
        ConditionOperator::Exists => present.is_some(),
        ConditionOperator::NotExists => present.is_none(),
        ConditionOperator::Eq => values_equal(actual.unwrap_or(&FieldValue::Null), expected),
        ConditionOperator::Ne => !values_equal(actual.unwrap_or(&FieldValue::Null), expected),
        ConditionOperator::Gt => ordered(present, expected, |o| o == Ordering::Greater),
        ConditionOperator::Gte => ordered(present, expected, |o| o != Ordering::Less),
        ConditionOperator::Lt => ordered(present, expected, |o| o == Ordering::Less),
        ConditionOperator::Lte => ordered(present, expected, |o| o != Ordering::Greater),
        ConditionOperator::In => match (present, expected) {
            (Some(v), FieldValue::List(items)) => items.iter().any(|i| values_equal(v, i)),
            _ => false,
        },
        ConditionOperator::NotIn => match expected {
            FieldValue::List(items) => match present {
                Some(v) => !items.iter().any(|i| values_equal(v, i)),
                None => true,
            },
            _ => false,
        },
        ConditionOperator::Contains => match (present, expected) {
            (Some(FieldValue::Text(haystack)), FieldValue::Text(needle)) => {
                haystack.contains(needle.as_str())
            }
            (Some(FieldValue::List(items)), needle) => items.iter().any(|i| values_equal(i, needle)),
            _ => false,
        },
    }
}

fn ordered(
    actual: Option<&FieldValue>,
    expected: &FieldValue,
    accept: impl Fn(Ordering) -> bool,
) -> bool {
    actual
        .and_then(|a| compare_values(a, expected))
        .map(accept)
        .unwrap_or(false)
}

fn values_equal(a: &FieldValue, b: &FieldValue) -> bool {
    match (a, b) {
        (FieldValue::List(x), FieldValue::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        _ => compare_values(a, b) == Some(Ordering::Equal),
    }
}

/// Order two values of compatible types; `None` when incomparable
fn compare_values(a: &FieldValue, b: &FieldValue) -> Option<Ordering> {
    match (a, b) {
        (FieldValue::Null, FieldValue::Null) => Some(Ordering::Equal),
        (FieldValue::Bool(x), FieldValue::Bool(y)) => Some(x.cmp(y)),
        (FieldValue::Integer(x), FieldValue::Integer(y)) => Some(x.cmp(y)),
        (FieldValue::Text(x), FieldValue::Text(y)) => Some(x.cmp(y)),
        (FieldValue::Timestamp(x), FieldValue::Timestamp(y)) => Some(x.cmp(y)),
        (FieldValue::Timestamp(_), FieldValue::Text(_))
        | (FieldValue::Text(_), FieldValue::Timestamp(_)) => {
            let x = a.as_timestamp()?;
            let y = b.as_timestamp()?;
            Some(x.cmp(&y))
        }
        _ => {
            let x = a.as_f64()?;
            let y = b.as_f64()?;
            x.partial_cmp(&y)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::entity::EntityType;
    use chrono::{Duration, Utc};

    fn evidence() -> EntitySnapshot {
        EntitySnapshot::new(EntityType::Evidence, "ev-100", Utc::now() - Duration::days(10))
            .with_case("case-7")
            .with_field("classification", "digital")
            .with_field("size_mb", 512i64)
            .with_field("tags", vec!["malware", "ransomware"])
            .with_field("sealed", true)
    }

    #[test]
    fn test_equality_and_inequality() {
        let e = evidence();
        assert!(Condition::eq("classification", "digital").evaluate(&e));
        assert!(!Condition::eq("classification", "physical").evaluate(&e));
        assert!(Condition::compare("classification", ConditionOperator::Ne, "physical").evaluate(&e));
        assert!(Condition::eq("case_id", "case-7").evaluate(&e));
    }

    #[test]
    fn test_numeric_comparisons_mix_int_and_float() {
        let e = evidence();
        assert!(Condition::compare("size_mb", ConditionOperator::Gt, 100.5).evaluate(&e));
        assert!(Condition::compare("size_mb", ConditionOperator::Lte, 512i64).evaluate(&e));
        assert!(!Condition::compare("size_mb", ConditionOperator::Lt, 512i64).evaluate(&e));
    }

    #[test]
    fn test_type_mismatch_is_false() {
        let e = evidence();
        assert!(!Condition::compare("classification", ConditionOperator::Gt, 3i64).evaluate(&e));
        assert!(!Condition::compare("missing", ConditionOperator::Gte, 0i64).evaluate(&e));
    }

    #[test]
    fn test_membership_and_contains() {
        let e = evidence();
        assert!(Condition::compare(
            "classification",
            ConditionOperator::In,
            vec!["digital", "mobile"]
        )
        .evaluate(&e));
        assert!(Condition::compare("tags", ConditionOperator::Contains, "malware").evaluate(&e));
        assert!(Condition::compare("classification", ConditionOperator::Contains, "git").evaluate(&e));
        assert!(Condition::compare("missing", ConditionOperator::NotIn, vec!["a"]).evaluate(&e));
    }

    #[test]
    fn test_existence() {
        let e = evidence().with_field("disposed_at", FieldValue::Null);
        assert!(Condition::exists("sealed").evaluate(&e));
        assert!(!Condition::exists("disposed_at").evaluate(&e));
        assert!(Condition::compare("disposed_at", ConditionOperator::NotExists, FieldValue::Null)
            .evaluate(&e));
    }

    #[test]
    fn test_nested_all() {
        let e = evidence();
        let cond = Condition::all(vec![
            Condition::eq("sealed", true),
            Condition::all(vec![Condition::eq("classification", "digital")]),
        ]);
        assert!(cond.evaluate(&e));
        assert_eq!(cond.leaf_count(), 2);
        assert!(Condition::all(vec![]).evaluate(&e));
    }

    #[test]
    fn test_timestamp_against_rfc3339_text() {
        let e = EntitySnapshot::new(EntityType::Case, "c", Utc::now())
            .with_field("closed_at", Utc::now() - Duration::days(365 * 9));
        assert!(Condition::compare("closed_at", ConditionOperator::Lt, "2024-01-01T00:00:00Z")
            .evaluate(&e));
    }

    #[test]
    fn test_condition_serde_shape() {
        let json = r#"{"kind":"compare","field":"status","operator":"eq","value":{"type":"text","value":"closed"}}"#;
        let cond: Condition = serde_json::from_str(json).unwrap();
        assert_eq!(cond, Condition::eq("status", "closed"));
    }
}
