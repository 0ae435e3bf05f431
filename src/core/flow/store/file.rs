#![allow(clippy::result_large_err)] // File stores return AppError to preserve structured diagnostic context.

use super::{apply_completion, not_found, ExecutionLogStore, ExecutionStore, TemplateStore};
use crate::core::error::AppError;
use crate::core::flow::state::{Execution, ExecutionLogEntry, LogCompletion};
use crate::core::flow::template::TemplateVersion;
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

const TEMPLATE_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Paths under `<state_dir>/executions/<execution_id>`.
pub struct ExecutionPaths {
    pub execution_dir: PathBuf,
    pub execution_file: PathBuf,
    pub log_file: PathBuf,
}

impl ExecutionPaths {
    pub fn new(state_dir: &Path, execution_id: &Uuid) -> Self {
        let execution_dir = Self::root(state_dir).join(execution_id.to_string());
        let execution_file = execution_dir.join("execution.json");
        let log_file = execution_dir.join("log.json");
        Self {
            execution_dir,
            execution_file,
            log_file,
        }
    }

    pub fn root(state_dir: &Path) -> PathBuf {
        state_dir.join("executions")
    }
}

/// Write through a temp file and rename so readers never see a torn document.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            AppError::new(
                ErrorCategory::IoError,
                format!("failed to create directory {}: {}", parent.display(), err),
            )
        })?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, data).map_err(|err| {
        AppError::new(
            ErrorCategory::IoError,
            format!("failed to write {}: {}", tmp_path.display(), err),
        )
    })?;
    fs::rename(&tmp_path, path).map_err(|err| {
        AppError::new(
            ErrorCategory::IoError,
            format!(
                "failed to rename {} -> {}: {}",
                tmp_path.display(),
                path.display(),
                err
            ),
        )
    })?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, AppError> {
    let bytes = fs::read(path).map_err(|err| {
        AppError::new(
            ErrorCategory::IoError,
            format!("failed to read {}: {}", path.display(), err),
        )
    })?;
    serde_json::from_slice(&bytes).map_err(|err| {
        AppError::new(
            ErrorCategory::SerializationError,
            format!("failed to deserialize {}: {}", path.display(), err),
        )
    })
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), AppError> {
    let content = serde_json::to_vec_pretty(value).map_err(|err| {
        AppError::new(
            ErrorCategory::SerializationError,
            format!("failed to serialize {}: {}", path.display(), err),
        )
    })?;
    atomic_write(path, &content)
}

/// Templates stored as `<dir>/<id>.yaml`, `.yml` or `.json`; cached once loaded.
pub struct FileTemplateStore {
    dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<TemplateVersion>>>,
}

impl FileTemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn locate(&self, id: &str) -> Option<PathBuf> {
        TEMPLATE_EXTENSIONS
            .iter()
            .map(|ext| self.dir.join(format!("{}.{}", id, ext)))
            .find(|path| path.is_file())
    }
}

#[async_trait]
impl TemplateStore for FileTemplateStore {
    async fn get_template_version(&self, id: &str) -> Result<Arc<TemplateVersion>, AppError> {
        if let Some(template) = self.cache.read().await.get(id) {
            return Ok(template.clone());
        }
        if id.contains('/') || id.contains('\\') || id.contains("..") {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!("template id '{}' contains invalid characters", id),
            ));
        }
        let path = self.locate(id).ok_or_else(|| not_found("template version", id))?;
        let template = TemplateVersion::load_from_file(&path)?;
        if template.id != id {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!(
                    "template file {} declares id '{}', expected '{}'",
                    path.display(),
                    template.id,
                    id
                ),
            ));
        }
        let template = Arc::new(template);
        self.cache
            .write()
            .await
            .insert(id.to_string(), template.clone());
        Ok(template)
    }
}

/// One `execution.json` per execution under the state directory.
pub struct FileExecutionStore {
    state_dir: PathBuf,
}

impl FileExecutionStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }
}

#[async_trait]
impl ExecutionStore for FileExecutionStore {
    async fn load(&self, id: Uuid) -> Result<Execution, AppError> {
        let paths = ExecutionPaths::new(&self.state_dir, &id);
        if !paths.execution_file.exists() {
            return Err(not_found("execution", id));
        }
        read_json(&paths.execution_file)
    }

    async fn save(&self, execution: &Execution) -> Result<(), AppError> {
        let paths = ExecutionPaths::new(&self.state_dir, &execution.id);
        write_json(&paths.execution_file, execution)
    }

    async fn list(&self) -> Result<Vec<Execution>, AppError> {
        let root = ExecutionPaths::root(&self.state_dir);
        let mut executions = Vec::new();
        if !root.exists() {
            return Ok(executions);
        }
        let entries = fs::read_dir(&root).map_err(|err| {
            AppError::new(
                ErrorCategory::IoError,
                format!("failed to list {}: {}", root.display(), err),
            )
        })?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Ok(id) = Uuid::parse_str(&name) {
                let paths = ExecutionPaths::new(&self.state_dir, &id);
                if paths.execution_file.exists() {
                    executions.push(read_json::<Execution>(&paths.execution_file)?);
                }
            }
        }
        executions.sort_by_key(|execution| execution.created_at);
        Ok(executions)
    }
}

/// `log.json` per execution, rewritten atomically on every change.
pub struct FileExecutionLogStore {
    state_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileExecutionLogStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn read_log(&self, execution_id: &Uuid) -> Result<Vec<ExecutionLogEntry>, AppError> {
        let paths = ExecutionPaths::new(&self.state_dir, execution_id);
        if !paths.log_file.exists() {
            return Ok(Vec::new());
        }
        read_json(&paths.log_file)
    }

    fn write_log(&self, execution_id: &Uuid, entries: &[ExecutionLogEntry]) -> Result<(), AppError> {
        let paths = ExecutionPaths::new(&self.state_dir, execution_id);
        write_json(&paths.log_file, &entries)
    }
}

#[async_trait]
impl ExecutionLogStore for FileExecutionLogStore {
    async fn open_entry(&self, mut entry: ExecutionLogEntry) -> Result<ExecutionLogEntry, AppError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_log(&entry.flow_execution_id)?;
        entry.id = entries.iter().map(|e| e.id).max().unwrap_or(0) + 1;
        entries.push(entry.clone());
        self.write_log(&entry.flow_execution_id, &entries)?;
        Ok(entry)
    }

    async fn close_entry(
        &self,
        execution_id: Uuid,
        entry_id: u64,
        completion: LogCompletion,
    ) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_log(&execution_id)?;
        let entry = entries
            .iter_mut()
            .find(|entry| entry.id == entry_id)
            .ok_or_else(|| not_found("log entry", entry_id))?;
        apply_completion(entry, completion);
        self.write_log(&execution_id, &entries)
    }

    async fn entries(&self, execution_id: Uuid) -> Result<Vec<ExecutionLogEntry>, AppError> {
        self.read_log(&execution_id)
    }
}
