//! Operator Alerts
//!
//! Notices raised by the scheduler for records officers: approaching
//! deadlines, hold conflicts, ambiguous policies and escalated failures.
//! Delivery is a collaborator behind [`AlertSink`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use jctc_core::EntityRef;

/// Alert severity level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Alert kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Retention deadline within a notification threshold
    DeadlineApproaching,
    /// Lifecycle action blocked by a legal hold
    LegalHoldConflict,
    /// Several policies disagree for one record
    PolicyConflict,
    /// Deadline passed but the policy automates nothing
    ManualActionRequired,
    /// Key management unreachable after retries
    KeyUnavailable,
    /// Archive failed an integrity check
    IntegrityFailure,
    /// Lifecycle action failed permanently
    ActionFailed,
}

/// An alert for operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorAlert {
    pub alert_id: String,
    pub raised_at: DateTime<Utc>,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub entity: Option<EntityRef>,
    pub title: String,
    pub message: String,
    /// Hold ids, policy ids or archive ids involved
    #[serde(default)]
    pub related_refs: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub acknowledged: bool,
    #[serde(default)]
    pub acknowledged_by: Option<String>,
}

impl OperatorAlert {
    pub fn new(kind: AlertKind, severity: AlertSeverity, title: &str, message: &str, at: DateTime<Utc>) -> Self {
        Self {
            alert_id: uuid::Uuid::new_v4().to_string(),
            raised_at: at,
            kind,
            severity,
            entity: None,
            title: title.to_string(),
            message: message.to_string(),
            related_refs: Vec::new(),
            metadata: HashMap::new(),
            acknowledged: false,
            acknowledged_by: None,
        }
    }

    pub fn for_entity(mut self, entity: &EntityRef) -> Self {
        self.entity = Some(entity.clone());
        self
    }

    pub fn with_refs(mut self, refs: impl IntoIterator<Item = String>) -> Self {
        self.related_refs.extend(refs);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Alert delivery
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn raise(&self, alert: &OperatorAlert) -> Result<(), String>;

    fn name(&self) -> &str;
}

/// Writes alerts to the log
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn raise(&self, alert: &OperatorAlert) -> Result<(), String> {
        let entity = alert.entity.as_ref().map(ToString::to_string).unwrap_or_default();
        match alert.severity {
            AlertSeverity::Critical | AlertSeverity::Error => error!(
                alert_id = %alert.alert_id,
                kind = ?alert.kind,
                entity = %entity,
                title = %alert.title,
                message = %alert.message,
                "Operator alert"
            ),
            AlertSeverity::Warning => warn!(
                alert_id = %alert.alert_id,
                kind = ?alert.kind,
                entity = %entity,
                title = %alert.title,
                message = %alert.message,
                "Operator alert"
            ),
            AlertSeverity::Info => info!(
                alert_id = %alert.alert_id,
                kind = ?alert.kind,
                entity = %entity,
                title = %alert.title,
                "Operator notice"
            ),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// In-process alert queue for operator review
#[derive(Default)]
pub struct OperatorQueue {
    alerts: RwLock<Vec<OperatorAlert>>,
}

impl OperatorQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<OperatorAlert> {
        self.alerts.read().await.clone()
    }

    pub async fn of_kind(&self, kind: AlertKind) -> Vec<OperatorAlert> {
        self.alerts
            .read()
            .await
            .iter()
            .filter(|a| a.kind == kind)
            .cloned()
            .collect()
    }

    pub async fn pending(&self) -> Vec<OperatorAlert> {
        self.alerts
            .read()
            .await
            .iter()
            .filter(|a| !a.acknowledged)
            .cloned()
            .collect()
    }

    pub async fn acknowledge(&self, alert_id: &str, by: &str) -> bool {
        let mut alerts = self.alerts.write().await;
        match alerts.iter_mut().find(|a| a.alert_id == alert_id) {
            Some(alert) => {
                alert.acknowledged = true;
                alert.acknowledged_by = Some(by.to_string());
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.alerts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.alerts.read().await.is_empty()
    }
}

#[async_trait]
impl AlertSink for OperatorQueue {
    async fn raise(&self, alert: &OperatorAlert) -> Result<(), String> {
        self.alerts.write().await.push(alert.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "queue"
    }
}

/// Fans an alert out to several sinks
#[derive(Default)]
pub struct AlertDispatcher {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl AlertDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl AlertSink for AlertDispatcher {
    async fn raise(&self, alert: &OperatorAlert) -> Result<(), String> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.raise(alert).await {
                warn!(sink = sink.name(), alert_id = %alert.alert_id, error = %e, "Alert sink failed");
                failures.push(format!("{}: {}", sink.name(), e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.join("; "))
        }
    }

    fn name(&self) -> &str {
        "dispatcher"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jctc_core::EntityType;

    #[tokio::test]
    async fn test_queue_and_acknowledge() {
        let queue = Arc::new(OperatorQueue::new());
        let dispatcher = AlertDispatcher::new()
            .with_sink(Arc::new(LogAlertSink))
            .with_sink(queue.clone());

        let alert = OperatorAlert::new(
            AlertKind::LegalHoldConflict,
            AlertSeverity::Warning,
            "Archival blocked",
            "Evidence under litigation hold",
            Utc::now(),
        )
        .for_entity(&EntityRef::new(EntityType::Evidence, "ev-1"))
        .with_refs(vec!["hold-1".to_string()]);

        dispatcher.raise(&alert).await.unwrap();
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.of_kind(AlertKind::LegalHoldConflict).await.len(), 1);
        assert!(queue.of_kind(AlertKind::PolicyConflict).await.is_empty());

        assert!(queue.acknowledge(&alert.alert_id, "officer").await);
        assert!(queue.pending().await.is_empty());
        assert!(!queue.acknowledge("missing", "officer").await);
    }
}
