use crate::cli::Command;
use std::env;

/// Environment variable marking scheduler-driven, non-interactive invocations.
pub const BATCH_ENV: &str = "CLINIC_FLOW_BATCH";

/// Execution contexts that influence how logging is routed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionContext {
    /// An operator driving the CLI from a terminal.
    LocalDev,
    /// A scheduler or worker resuming executions; quiet on the console.
    Batch,
}

impl ExecutionContext {
    /// Returns `true` when console sinks should be disabled.
    pub fn disables_console(self) -> bool {
        matches!(self, ExecutionContext::Batch)
    }
}

/// Derive the active execution context from a parsed CLI command plus overrides.
pub fn detect_context(command: &Command) -> ExecutionContext {
    if batch_override_enabled() {
        return match command {
            Command::Validate(_) => ExecutionContext::LocalDev,
            _ => ExecutionContext::Batch,
        };
    }
    ExecutionContext::LocalDev
}

fn batch_override_enabled() -> bool {
    env::var(BATCH_ENV)
        .map(|value| value.trim() == "1")
        .unwrap_or(false)
}
