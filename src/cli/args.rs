use crate::core::flow::ResumeMode;
use clap::Args;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Template version id, resolved inside the templates directory
    #[arg(long, value_name = "ID")]
    pub template: String,

    /// Event that triggered the execution (e.g. lead_created)
    #[arg(long, value_name = "TYPE")]
    pub trigger_type: String,

    /// Entity type the trigger refers to (appointment, lead_intake, conversation, ...)
    #[arg(long, value_name = "TYPE")]
    pub entity_type: Option<String>,

    /// Integer id of the trigger entity
    #[arg(long, value_name = "ID")]
    pub entity_id: Option<i64>,

    /// Clinic the execution belongs to
    #[arg(long, value_name = "ID")]
    pub clinic_id: Option<i64>,

    /// JSON file whose object becomes the trigger payload
    #[arg(long, value_name = "FILE")]
    pub payload: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Execution to run or resume
    #[arg(value_name = "EXECUTION_ID")]
    pub execution_id: Uuid,

    /// Step budget for this invocation (default: engine.max_steps)
    #[arg(long, value_name = "N", value_parser = parse_step_budget)]
    pub max_steps: Option<usize>,

    /// Resume a waiting execution: timeout or response
    #[arg(long, value_name = "MODE")]
    pub resume: Option<ResumeMode>,

    /// Inbound reply merged into the listened node's output (with --resume response)
    #[arg(long, value_name = "TEXT", requires = "resume")]
    pub response_text: Option<String>,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Execution to inspect
    #[arg(value_name = "EXECUTION_ID")]
    pub execution_id: Uuid,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Template document (YAML or JSON)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

fn parse_step_budget(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("step budget must be at least 1".to_string()),
        Ok(steps) => Ok(steps),
        Err(err) => Err(err.to_string()),
    }
}
