use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Engine configuration loaded from clinic-flow.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FlowConfig {
    /// Execution loop configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Storage locations
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Execution loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Steps allowed per invocation before the execution is dead-lettered
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Upper bound on role-based assignee fan-out
    #[serde(default = "default_member_batch_limit")]
    pub member_batch_limit: usize,

    /// chrono format used for the timestamp prefix of written notes
    #[serde(default = "default_note_timestamp_format")]
    pub note_timestamp_format: String,
}

/// Storage locations, relative to the workspace unless absolute
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,

    /// JSON snapshot backing the in-memory clinic collaborators used by the CLI
    #[serde(default = "default_clinic_fixture")]
    pub clinic_fixture: PathBuf,
}

fn default_max_steps() -> usize {
    100
}

fn default_member_batch_limit() -> usize {
    50
}

fn default_note_timestamp_format() -> String {
    "%Y-%m-%d %H:%M".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".clinic-flow/state")
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}

fn default_clinic_fixture() -> PathBuf {
    PathBuf::from(".clinic-flow/clinic.json")
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_steps: default_max_steps(),
            member_batch_limit: default_member_batch_limit(),
            note_timestamp_format: default_note_timestamp_format(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            state_dir: default_state_dir(),
            templates_dir: default_templates_dir(),
            clinic_fixture: default_clinic_fixture(),
        }
    }
}


pub mod loader;

pub use loader::ConfigLoader;
