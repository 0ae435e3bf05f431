//! Persistence seams for templates, executions and the per-node execution log.

use crate::core::error::AppError;
use crate::core::flow::state::{Execution, ExecutionLogEntry, LogCompletion};
use crate::core::flow::template::TemplateVersion;
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub mod file;

pub use file::{FileExecutionLogStore, FileExecutionStore, FileTemplateStore};

/// Read-only source of immutable template versions.
#[async_trait]
pub trait TemplateStore: Send + Sync + 'static {
    async fn get_template_version(&self, id: &str) -> Result<Arc<TemplateVersion>, AppError>;
}

/// Durable execution snapshots. The engine assumes exclusive access per invocation.
#[async_trait]
pub trait ExecutionStore: Send + Sync + 'static {
    async fn load(&self, id: Uuid) -> Result<Execution, AppError>;
    async fn save(&self, execution: &Execution) -> Result<(), AppError>;
    async fn list(&self) -> Result<Vec<Execution>, AppError>;

    /// Save a new execution, refusing to overwrite an existing id.
    async fn create(&self, execution: &Execution) -> Result<(), AppError> {
        if self.load(execution.id).await.is_ok() {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!("execution {} already exists", execution.id),
            )
            .with_code("FLOW-STORE-409"));
        }
        self.save(execution).await
    }
}

/// Append-only log with one entry per node attempt.
#[async_trait]
pub trait ExecutionLogStore: Send + Sync + 'static {
    /// Persist a new `running` entry and return it with its assigned id.
    async fn open_entry(&self, entry: ExecutionLogEntry) -> Result<ExecutionLogEntry, AppError>;
    async fn close_entry(
        &self,
        execution_id: Uuid,
        entry_id: u64,
        completion: LogCompletion,
    ) -> Result<(), AppError>;
    async fn entries(&self, execution_id: Uuid) -> Result<Vec<ExecutionLogEntry>, AppError>;

    /// Latest entry recorded for the given step, if any.
    async fn entry_for_step(
        &self,
        execution_id: Uuid,
        step: u64,
    ) -> Result<Option<ExecutionLogEntry>, AppError> {
        Ok(self
            .entries(execution_id)
            .await?
            .into_iter()
            .filter(|entry| entry.step == step)
            .max_by_key(|entry| entry.id))
    }
}

pub(crate) fn not_found(what: &str, id: impl std::fmt::Display) -> AppError {
    AppError::new(
        ErrorCategory::InfrastructureError,
        format!("{} {} not found", what, id),
    )
    .with_code("FLOW-STORE-404")
}

pub(crate) fn apply_completion(entry: &mut ExecutionLogEntry, completion: LogCompletion) {
    entry.status = completion.status;
    entry.finished_at = Some(completion.finished_at);
    entry.error_message = completion.error_message;
    entry.audit_snapshot = completion.audit_snapshot;
}

#[derive(Default)]
pub struct InMemoryTemplateStore {
    templates: RwLock<HashMap<String, Arc<TemplateVersion>>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, template: TemplateVersion) {
        self.templates
            .write()
            .await
            .insert(template.id.clone(), Arc::new(template));
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn get_template_version(&self, id: &str) -> Result<Arc<TemplateVersion>, AppError> {
        self.templates
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("template version", id))
    }
}

#[derive(Default)]
pub struct InMemoryExecutionStore {
    executions: RwLock<HashMap<Uuid, Execution>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn load(&self, id: Uuid) -> Result<Execution, AppError> {
        self.executions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("execution", id))
    }

    async fn save(&self, execution: &Execution) -> Result<(), AppError> {
        self.executions
            .write()
            .await
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Execution>, AppError> {
        let mut executions: Vec<Execution> =
            self.executions.read().await.values().cloned().collect();
        executions.sort_by_key(|execution| execution.created_at);
        Ok(executions)
    }
}

#[derive(Default)]
pub struct InMemoryExecutionLogStore {
    entries: RwLock<HashMap<Uuid, Vec<ExecutionLogEntry>>>,
}

impl InMemoryExecutionLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionLogStore for InMemoryExecutionLogStore {
    async fn open_entry(&self, mut entry: ExecutionLogEntry) -> Result<ExecutionLogEntry, AppError> {
        let mut guard = self.entries.write().await;
        let log = guard.entry(entry.flow_execution_id).or_default();
        entry.id = log.len() as u64 + 1;
        log.push(entry.clone());
        Ok(entry)
    }

    async fn close_entry(
        &self,
        execution_id: Uuid,
        entry_id: u64,
        completion: LogCompletion,
    ) -> Result<(), AppError> {
        let mut guard = self.entries.write().await;
        let entry = guard
            .get_mut(&execution_id)
            .and_then(|log| log.iter_mut().find(|entry| entry.id == entry_id))
            .ok_or_else(|| not_found("log entry", entry_id))?;
        apply_completion(entry, completion);
        Ok(())
    }

    async fn entries(&self, execution_id: Uuid) -> Result<Vec<ExecutionLogEntry>, AppError> {
        Ok(self
            .entries
            .read()
            .await
            .get(&execution_id)
            .cloned()
            .unwrap_or_default())
    }
}
