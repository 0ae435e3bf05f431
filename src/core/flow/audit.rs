#![allow(clippy::result_large_err)] // Audit helpers return AppError for consistent diagnostics.

use crate::core::error::AppError;
use crate::core::flow::dispatcher::NodeOutcome;
use crate::core::flow::state::{ExecutionLogEntry, LogCompletion, LogStatus};
use crate::core::flow::store::ExecutionLogStore;
use crate::core::flow::template::Node;
use crate::core::types::ErrorCategory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Error details kept in an audit snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditError {
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl From<&AppError> for AuditError {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.code.clone(),
            category: err.category,
            message: err.message.clone(),
            context: err
                .context
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        }
    }
}

impl From<AuditError> for AppError {
    fn from(recorded: AuditError) -> Self {
        let mut err = AppError::new(recorded.category, recorded.message).with_code(recorded.code);
        for (key, value) in &recorded.context {
            err.add_context(key, value);
        }
        err
    }
}

/// Contents of `audit_snapshot` on a closed log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSnapshot {
    /// Node config with every expression resolved at dispatch time.
    pub node_config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<NodeOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AuditError>,
    pub duration_ms: i64,
}

impl AuditSnapshot {
    /// Parse a stored snapshot; `None` for entries written without one.
    pub fn from_entry(entry: &ExecutionLogEntry) -> Option<Self> {
        serde_json::from_value(entry.audit_snapshot.clone()).ok()
    }
}

/// Writes one log entry per node attempt: opened before dispatch, closed after.
#[derive(Clone)]
pub struct AuditLogWriter {
    store: Arc<dyn ExecutionLogStore>,
}

impl AuditLogWriter {
    pub fn new(store: Arc<dyn ExecutionLogStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ExecutionLogStore> {
        &self.store
    }

    pub async fn open(
        &self,
        execution_id: Uuid,
        step: u64,
        node: &Node,
        started_at: DateTime<Utc>,
    ) -> Result<ExecutionLogEntry, AppError> {
        self.store
            .open_entry(ExecutionLogEntry {
                id: 0,
                flow_execution_id: execution_id,
                step,
                node_id: node.id.clone(),
                node_type: node.kind.as_str().to_string(),
                status: LogStatus::Running,
                started_at,
                finished_at: None,
                error_message: None,
                audit_snapshot: Value::Null,
            })
            .await
    }

    pub async fn record_outcome(
        &self,
        entry: &ExecutionLogEntry,
        node_config: Value,
        outcome: &NodeOutcome,
    ) -> Result<(), AppError> {
        let finished_at = Utc::now();
        let snapshot = AuditSnapshot {
            node_config,
            outcome: Some(outcome.clone()),
            error: None,
            duration_ms: (finished_at - entry.started_at).num_milliseconds(),
        };
        self.close(entry, LogStatus::Success, None, snapshot, finished_at)
            .await
    }

    pub async fn record_error(
        &self,
        entry: &ExecutionLogEntry,
        node_config: Value,
        err: &AppError,
    ) -> Result<(), AppError> {
        let finished_at = Utc::now();
        let snapshot = AuditSnapshot {
            node_config,
            outcome: None,
            error: Some(AuditError::from(err)),
            duration_ms: (finished_at - entry.started_at).num_milliseconds(),
        };
        self.close(
            entry,
            LogStatus::Error,
            Some(err.message.clone()),
            snapshot,
            finished_at,
        )
        .await
    }

    async fn close(
        &self,
        entry: &ExecutionLogEntry,
        status: LogStatus,
        error_message: Option<String>,
        snapshot: AuditSnapshot,
        finished_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let audit_snapshot = serde_json::to_value(&snapshot)?;
        self.store
            .close_entry(
                entry.flow_execution_id,
                entry.id,
                LogCompletion {
                    status,
                    finished_at,
                    error_message,
                    audit_snapshot,
                },
            )
            .await
    }
}
