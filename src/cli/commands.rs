use crate::cli::args::{RunArgs, ShowArgs, StartArgs, ValidateArgs};
use crate::core::config::{ConfigLoader, FlowConfig};
use crate::core::flow::clinic::{ClinicServices, InMemoryClinic};
use crate::core::flow::store::{
    ExecutionLogStore, ExecutionStore, FileExecutionLogStore, FileExecutionStore, FileTemplateStore,
    TemplateStore,
};
use crate::core::flow::template::{IssueSeverity, TemplateVersion};
use crate::core::flow::{FlowEngine, RunOptions, Trigger};
use crate::Result;
use anyhow::{anyhow, Context};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Engine wired to the workspace's file stores and clinic fixture.
struct WorkspaceEngine {
    engine: FlowEngine,
    clinic: Arc<InMemoryClinic>,
    clinic_fixture: PathBuf,
}

impl WorkspaceEngine {
    fn open(workspace: &Path) -> Result<Self> {
        let config: FlowConfig = ConfigLoader::load_from_workspace(workspace)?;
        let state_dir = ConfigLoader::resolve_path(workspace, &config.storage.state_dir);
        let templates_dir = ConfigLoader::resolve_path(workspace, &config.storage.templates_dir);
        let clinic_fixture = ConfigLoader::resolve_path(workspace, &config.storage.clinic_fixture);

        let clinic = Arc::new(InMemoryClinic::load(&clinic_fixture)?);
        let templates: Arc<dyn TemplateStore> = Arc::new(FileTemplateStore::new(templates_dir));
        let executions: Arc<dyn ExecutionStore> =
            Arc::new(FileExecutionStore::new(state_dir.clone()));
        let logs: Arc<dyn ExecutionLogStore> = Arc::new(FileExecutionLogStore::new(state_dir));
        let engine = FlowEngine::with_builtins(
            templates,
            executions,
            logs,
            ClinicServices::from_backend(clinic.clone()),
            config.engine,
        );
        Ok(Self {
            engine,
            clinic,
            clinic_fixture,
        })
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Handles `clinic-flow start`.
pub async fn start(workspace: &Path, args: StartArgs) -> Result<()> {
    let workspace = WorkspaceEngine::open(workspace)?;
    let payload = match &args.payload {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read payload {}", path.display()))?;
            let value: Value = serde_json::from_str(&content)
                .with_context(|| format!("failed to parse payload {}", path.display()))?;
            if !value.is_object() {
                return Err(anyhow!("payload {} must be a JSON object", path.display()));
            }
            value
        }
        None => json!({}),
    };
    let trigger = Trigger {
        trigger_type: args.trigger_type,
        entity_type: args.entity_type,
        entity_id: args.entity_id,
        clinic_id: args.clinic_id,
        payload,
    };
    let execution = workspace
        .engine
        .start_execution(&args.template, trigger)
        .await?;
    println!("{}", execution.id);
    Ok(())
}

/// Handles `clinic-flow run`.
pub async fn run(workspace: &Path, args: RunArgs) -> Result<()> {
    let workspace = WorkspaceEngine::open(workspace)?;
    let options = RunOptions {
        max_steps: args.max_steps,
        resume_mode: args.resume,
        response_text: args.response_text,
    };
    let outcome = workspace
        .engine
        .run_execution(args.execution_id, options)
        .await;
    // Handlers may have changed the clinic even when the run itself errored.
    let saved = workspace.clinic.save(&workspace.clinic_fixture).await;
    if let (Err(_), Err(save_err)) = (&outcome, &saved) {
        tracing::error!(error = %save_err, "failed to save clinic fixture after a failed run");
    }
    let execution = outcome?;
    saved?;
    print_json(&execution)
}

/// Handles `clinic-flow show`.
pub async fn show(workspace: &Path, args: ShowArgs) -> Result<()> {
    let workspace = WorkspaceEngine::open(workspace)?;
    let execution = workspace
        .engine
        .executions()
        .load(args.execution_id)
        .await?;
    let log = workspace.engine.logs().entries(args.execution_id).await?;
    print_json(&json!({"execution": execution, "log": log}))
}

/// Handles `clinic-flow validate`.
pub async fn validate(args: ValidateArgs) -> Result<()> {
    let template = TemplateVersion::load_from_file(&args.file)?;
    let issues = template.issues();
    for issue in &issues {
        let label = match issue.severity {
            IssueSeverity::Error => "error",
            IssueSeverity::Warning => "warning",
        };
        println!("{}: {}", label, issue);
    }
    let errors = issues
        .iter()
        .filter(|issue| issue.severity == IssueSeverity::Error)
        .count();
    if errors > 0 {
        return Err(anyhow!(
            "template {} has {} structural error(s)",
            args.file.display(),
            errors
        ));
    }
    println!(
        "template '{}' is valid ({} nodes, entry '{}')",
        template.id,
        template.nodes.len(),
        template.entry_node_id
    );
    Ok(())
}
