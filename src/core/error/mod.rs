use crate::core::types::{ErrorCategory, ErrorSeverity};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug)]
pub struct AppError {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub code: String,
    pub message: String,
    pub context: HashMap<String, String>,
    pub occurred_at: DateTime<Utc>,
    pub source: Option<anyhow::Error>,
}

impl AppError {
    pub fn new<T: Into<String>>(category: ErrorCategory, message: T) -> Self {
        let severity = match category {
            ErrorCategory::StepBudgetError => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        };
        AppError {
            category,
            severity,
            code: default_code(category).to_string(),
            message: message.into(),
            context: HashMap::new(),
            occurred_at: Utc::now(),
            source: None,
        }
    }

    pub fn with_source<T: Into<String>>(
        category: ErrorCategory,
        message: T,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        let mut error = AppError::new(category, message);
        error.source = Some(anyhow::anyhow!(source));
        error
    }

    /// Missing or invalid node configuration.
    pub fn configuration<T: Into<String>>(message: T) -> Self {
        AppError::new(ErrorCategory::ConfigurationError, message)
    }

    /// No entity matched the node's runtime targets.
    pub fn target_resolution<T: Into<String>>(message: T) -> Self {
        AppError::new(ErrorCategory::TargetResolutionError, message)
    }

    /// A collaborator call failed.
    pub fn infrastructure<T: Into<String>>(message: T) -> Self {
        AppError::new(ErrorCategory::InfrastructureError, message)
    }

    pub fn with_context<T: Into<String>>(mut self, context: T) -> Self {
        self.context.insert("context".to_string(), context.into());
        self
    }

    pub fn with_code<T: Into<String>>(mut self, code: T) -> Self {
        self.code = code.into();
        self
    }

    pub fn add_context(&mut self, key: &str, value: &str) {
        self.context.insert(key.to_string(), value.to_string());
    }

    pub fn severity(&self) -> ErrorSeverity {
        self.severity
    }

    /// Whether the loop may redirect this error through a node's `on_fail` port.
    pub fn is_routable(&self) -> bool {
        self.category.is_routable()
    }
}

fn default_code(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::ConfigurationError => "FLOW-CFG-000",
        ErrorCategory::TargetResolutionError => "FLOW-TGT-000",
        ErrorCategory::InfrastructureError => "FLOW-INFRA-000",
        ErrorCategory::GraphIntegrityError => "FLOW-GRAPH-000",
        ErrorCategory::StepBudgetError => "FLOW-STEP-000",
        ErrorCategory::ValidationError => "FLOW-VAL-000",
        ErrorCategory::SerializationError => "FLOW-SER-000",
        ErrorCategory::IoError => "IO_ERROR",
        ErrorCategory::InternalError => "FLOW-INT-000",
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.category, self.message)?;
        if !self.context.is_empty() {
            write!(f, " (Context: {:?})", self.context)?;
        }
        if let Some(ref source) = self.source {
            write!(f, "\nCaused by: {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError {
            category: ErrorCategory::InternalError,
            severity: ErrorSeverity::Error,
            code: "ANYHOW_ERROR".to_string(),
            message: e.to_string(),
            context: HashMap::new(),
            occurred_at: Utc::now(),
            source: Some(e),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError {
            category: ErrorCategory::IoError,
            severity: ErrorSeverity::Error,
            code: "IO_ERROR".to_string(),
            message: e.to_string(),
            context: HashMap::new(),
            occurred_at: Utc::now(),
            source: Some(anyhow::anyhow!(e)),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::new(
            ErrorCategory::SerializationError,
            format!("json serialization failed: {}", e),
        )
    }
}
