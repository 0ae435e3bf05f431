#![allow(clippy::result_large_err)]

use super::FlowConfig;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use std::env;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "clinic-flow.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load config from workspace root (workspace/clinic-flow.toml)
    /// Environment variables override config file values
    pub fn load_from_workspace(workspace_path: &Path) -> Result<FlowConfig, AppError> {
        let config_path = workspace_path.join(CONFIG_FILE_NAME);
        let mut config = Self::load_from_file(&config_path)?.unwrap_or_default();

        Self::apply_env_overrides(&mut config);
        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Returns Ok(None) if file doesn't exist
    pub fn load_from_file(path: &Path) -> Result<Option<FlowConfig>, AppError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::new(
                ErrorCategory::IoError,
                format!("Failed to read config file {}: {}", path.display(), e),
            )
        })?;

        let config: FlowConfig = toml::from_str(&content).map_err(|e| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("Failed to parse config file {}: {}", path.display(), e),
            )
        })?;

        Ok(Some(config))
    }

    fn apply_env_overrides(config: &mut FlowConfig) {
        if let Ok(value) = env::var("CLINIC_FLOW_MAX_STEPS") {
            if let Ok(max_steps) = value.trim().parse::<usize>() {
                config.engine.max_steps = max_steps;
            }
        }

        if let Ok(value) = env::var("CLINIC_FLOW_MEMBER_BATCH_LIMIT") {
            if let Ok(limit) = value.trim().parse::<usize>() {
                config.engine.member_batch_limit = limit;
            }
        }

        if let Ok(state_dir) = env::var("CLINIC_FLOW_STATE_DIR") {
            config.storage.state_dir = PathBuf::from(state_dir);
        }

        if let Ok(templates_dir) = env::var("CLINIC_FLOW_TEMPLATES_DIR") {
            config.storage.templates_dir = PathBuf::from(templates_dir);
        }
    }

    /// Get documentation for supported environment variables
    pub fn env_var_documentation() -> &'static [&'static str] {
        &[
            "CLINIC_FLOW_MAX_STEPS - Override the per-invocation step budget (default: 100)",
            "CLINIC_FLOW_MEMBER_BATCH_LIMIT - Override the role assignee cap (default: 50)",
            "CLINIC_FLOW_STATE_DIR - Override the execution state directory (default: .clinic-flow/state)",
            "CLINIC_FLOW_TEMPLATES_DIR - Override the template directory (default: templates)",
        ]
    }

    pub fn validate_config(config: &FlowConfig) -> Result<(), AppError> {
        if config.engine.max_steps == 0 {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                "engine.max_steps must be greater than zero",
            ));
        }

        if config.engine.member_batch_limit == 0 {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                "engine.member_batch_limit must be greater than zero",
            ));
        }

        if config.engine.note_timestamp_format.trim().is_empty() {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                "engine.note_timestamp_format cannot be empty",
            ));
        }

        if chrono::format::StrftimeItems::new(&config.engine.note_timestamp_format)
            .any(|item| matches!(item, chrono::format::Item::Error))
        {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!(
                    "engine.note_timestamp_format '{}' is not a valid strftime pattern",
                    config.engine.note_timestamp_format
                ),
            ));
        }

        if config.storage.state_dir.as_os_str().is_empty() {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                "storage.state_dir cannot be empty",
            ));
        }

        Ok(())
    }

    /// Resolve a configured path against the workspace root.
    pub fn resolve_path(workspace_path: &Path, configured: &Path) -> PathBuf {
        if configured.is_absolute() {
            configured.to_path_buf()
        } else {
            workspace_path.join(configured)
        }
    }
}
