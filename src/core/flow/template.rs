#![allow(clippy::result_large_err)] // Template APIs return AppError to preserve structured validation context without boxing.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

/// Named output ports understood by the built-in handlers.
pub mod ports {
    pub const ON_SUCCESS: &str = "on_success";
    pub const ON_FAIL: &str = "on_fail";
    pub const ON_TRUE: &str = "on_true";
    pub const ON_FALSE: &str = "on_false";
    pub const ON_RESPONSE: &str = "on_response";
    pub const ON_NO_RESPONSE: &str = "on_no_response";
    pub const ON_TIMEOUT: &str = "on_timeout";
    pub const ON_COMPLETE: &str = "on_complete";
}

fn default_config_value() -> Value {
    Value::Object(Map::new())
}

/// Closed set of node kinds, parsed from the dotted `category/kind` type tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    WriteNote,
    ChangeStatus,
    CreateTask,
    SendWhatsapp,
    SendEmail,
    ApiCall,
    FixedDelay,
    WaitUntil,
    WaitResponse,
    FieldCheck,
    ResponseCheck,
    /// Any tag without a handler; executed as a no-op for forward compatibility.
    Other(String),
}

impl NodeKind {
    /// Every kind with a dedicated handler.
    pub const KNOWN: [NodeKind; 11] = [
        NodeKind::WriteNote,
        NodeKind::ChangeStatus,
        NodeKind::CreateTask,
        NodeKind::SendWhatsapp,
        NodeKind::SendEmail,
        NodeKind::ApiCall,
        NodeKind::FixedDelay,
        NodeKind::WaitUntil,
        NodeKind::WaitResponse,
        NodeKind::FieldCheck,
        NodeKind::ResponseCheck,
    ];

    pub fn parse(tag: &str) -> Self {
        match tag.trim() {
            "action/write_note" => NodeKind::WriteNote,
            "action/change_status" => NodeKind::ChangeStatus,
            "action/create_task" => NodeKind::CreateTask,
            "action/send_whatsapp" => NodeKind::SendWhatsapp,
            "action/send_email" => NodeKind::SendEmail,
            "action/api_call" => NodeKind::ApiCall,
            "delay/fixed" => NodeKind::FixedDelay,
            "delay/wait_until" => NodeKind::WaitUntil,
            "delay/wait_response" => NodeKind::WaitResponse,
            "condition/field_check" => NodeKind::FieldCheck,
            "condition/response_check" => NodeKind::ResponseCheck,
            other => NodeKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            NodeKind::WriteNote => "action/write_note",
            NodeKind::ChangeStatus => "action/change_status",
            NodeKind::CreateTask => "action/create_task",
            NodeKind::SendWhatsapp => "action/send_whatsapp",
            NodeKind::SendEmail => "action/send_email",
            NodeKind::ApiCall => "action/api_call",
            NodeKind::FixedDelay => "delay/fixed",
            NodeKind::WaitUntil => "delay/wait_until",
            NodeKind::WaitResponse => "delay/wait_response",
            NodeKind::FieldCheck => "condition/field_check",
            NodeKind::ResponseCheck => "condition/response_check",
            NodeKind::Other(tag) => tag.as_str(),
        }
    }

    /// Category half of the type tag (`action`, `delay`, `condition`, ...).
    pub fn category(&self) -> &str {
        let tag = self.as_str();
        tag.split_once('/').map(|(category, _)| category).unwrap_or(tag)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, NodeKind::Other(_))
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for NodeKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NodeKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(NodeKind::parse(&tag))
    }
}

/// One step of an automation template.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default = "default_config_value")]
    pub config: Value,
    /// Port name to target node id; a missing or empty target terminates the execution.
    #[serde(default)]
    pub outputs: IndexMap<String, Option<String>>,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Node {
            id: id.into(),
            kind,
            config: default_config_value(),
            outputs: IndexMap::new(),
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_port(mut self, port: &str, target: impl Into<String>) -> Self {
        self.outputs.insert(port.to_string(), Some(target.into()));
        self
    }

    /// Target of the named port, if it is wired.
    pub fn port(&self, name: &str) -> Option<&str> {
        self.outputs
            .get(name)
            .and_then(|target| target.as_deref())
            .map(str::trim)
            .filter(|target| !target.is_empty())
    }

    pub fn config_value(&self, key: &str) -> Option<&Value> {
        self.config.get(key).filter(|value| !value.is_null())
    }
}

/// Immutable, versioned automation graph.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TemplateVersion {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<u32>,
    pub entry_node_id: String,
    pub nodes: Vec<Node>,
}

impl TemplateVersion {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// Load a template document (YAML or JSON) from disk.
    pub fn load_from_file(path: &Path) -> Result<Self, AppError> {
        let text = fs::read_to_string(path).map_err(|err| {
            AppError::new(
                ErrorCategory::IoError,
                format!("failed to read {}: {}", path.display(), err),
            )
        })?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let parsed = if is_json {
            serde_json::from_str::<TemplateVersion>(&text).map_err(|err| err.to_string())
        } else {
            serde_yaml::from_str::<TemplateVersion>(&text).map_err(|err| err.to_string())
        };
        parsed.map_err(|err| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("failed to parse {}: {}", path.display(), err),
            )
            .with_code("FLOW-TPL-001")
        })
    }

    /// Structural problems: duplicate ids, dangling entry or ports, unhandled types.
    pub fn issues(&self) -> Vec<TemplateIssue> {
        let mut issues = Vec::new();
        if self.nodes.is_empty() {
            issues.push(TemplateIssue::error(None, "template must define at least one node"));
        }
        let mut ids = HashSet::new();
        for node in &self.nodes {
            if node.id.trim().is_empty() {
                issues.push(TemplateIssue::error(None, "node id cannot be empty"));
            }
            if !ids.insert(node.id.as_str()) {
                issues.push(TemplateIssue::error(
                    Some(&node.id),
                    format!("duplicate node id: {}", node.id),
                ));
            }
        }
        if !ids.contains(self.entry_node_id.as_str()) {
            issues.push(TemplateIssue::error(
                None,
                format!(
                    "entry_node_id '{}' is not present in template nodes",
                    self.entry_node_id
                ),
            ));
        }
        for node in &self.nodes {
            if !node.config.is_object() {
                issues.push(TemplateIssue::error(
                    Some(&node.id),
                    "node config must be an object",
                ));
            }
            for (port, _) in &node.outputs {
                if let Some(target) = node.port(port) {
                    if !ids.contains(target) {
                        issues.push(TemplateIssue::error(
                            Some(&node.id),
                            format!("port '{}' references unknown node: {}", port, target),
                        ));
                    }
                }
            }
            if !node.kind.is_known() {
                issues.push(TemplateIssue::warning(
                    Some(&node.id),
                    format!("node type '{}' has no handler and runs as a no-op", node.kind),
                ));
            }
        }
        issues
    }

    /// Fail on the first error-level issue.
    pub fn validate(&self) -> Result<(), AppError> {
        let errors: Vec<String> = self
            .issues()
            .into_iter()
            .filter(|issue| issue.severity == IssueSeverity::Error)
            .map(|issue| issue.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::new(ErrorCategory::GraphIntegrityError, errors.join("; "))
                .with_code("FLOW-GRAPH-002")
                .with_context(format!("template {}", self.id)))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateIssue {
    pub severity: IssueSeverity,
    pub node_id: Option<String>,
    pub message: String,
}

impl TemplateIssue {
    fn error(node_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Error,
            node_id: node_id.map(str::to_string),
            message: message.into(),
        }
    }

    fn warning(node_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Warning,
            node_id: node_id.map(str::to_string),
            message: message.into(),
        }
    }
}

impl fmt::Display for TemplateIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node_id {
            Some(node_id) => write!(f, "[{}] {}", node_id, self.message),
            None => f.write_str(&self.message),
        }
    }
}
