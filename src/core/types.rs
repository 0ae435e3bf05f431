use serde::{Deserialize, Serialize};

/// Error category enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Missing or invalid node configuration.
    ConfigurationError,
    /// No clinic entity matched the runtime targets.
    TargetResolutionError,
    /// A collaborator (store, directory, notification sink) failed.
    InfrastructureError,
    /// The template graph references a node that does not exist.
    GraphIntegrityError,
    /// The per-invocation step budget was exhausted.
    StepBudgetError,
    ValidationError,
    SerializationError,
    IoError,
    InternalError,
}

impl ErrorCategory {
    /// Node-level errors may be routed through an `on_fail` port; the others end the execution.
    pub fn is_routable(&self) -> bool {
        !matches!(
            self,
            ErrorCategory::GraphIntegrityError | ErrorCategory::StepBudgetError
        )
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Error severity enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Error,
    Warning,
    Info,
}
