use crate::core::flow::template::TemplateVersion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Execution lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Running,
    Waiting,
    Completed,
    Failed,
    DeadLetter,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Waiting => "waiting",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::DeadLetter => "dead_letter",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::DeadLetter
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which branch a waiting node should take when resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResumeMode {
    Timeout,
    Response,
}

impl FromStr for ResumeMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "timeout" => Ok(ResumeMode::Timeout),
            "response" => Ok(ResumeMode::Response),
            other => Err(format!(
                "invalid resume mode '{}'; expected timeout or response",
                other
            )),
        }
    }
}

impl fmt::Display for ResumeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResumeMode::Timeout => f.write_str("timeout"),
            ResumeMode::Response => f.write_str("response"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitKind {
    Fixed,
    WaitUntil,
    WaitResponse,
}

/// What a waiting execution is parked on and where each resume mode leads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingMeta {
    pub kind: WaitKind,
    /// Node that produced the wait; the resume anchor.
    pub node_id: String,
    /// Node whose output receives the inbound `response_text`.
    #[serde(default)]
    pub listens_to_node_id: Option<String>,
    #[serde(default)]
    pub on_complete: Option<String>,
    #[serde(default)]
    pub on_response: Option<String>,
    #[serde(default)]
    pub on_timeout: Option<String>,
}

impl WaitingMeta {
    /// Port target to follow when resuming with `mode`.
    pub fn resume_target(&self, mode: ResumeMode) -> Option<String> {
        let preferred = match mode {
            ResumeMode::Response => self.on_response.clone(),
            ResumeMode::Timeout => self.on_timeout.clone(),
        };
        match self.kind {
            WaitKind::WaitResponse => preferred,
            WaitKind::Fixed | WaitKind::WaitUntil => preferred.or_else(|| self.on_complete.clone()),
        }
    }
}

/// Trigger metadata supplied when an execution is created.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trigger {
    pub trigger_type: String,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub entity_id: Option<i64>,
    #[serde(default)]
    pub clinic_id: Option<i64>,
    #[serde(default)]
    pub payload: Value,
}

/// One triggered instance of a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub template_version_id: String,
    pub status: ExecutionStatus,
    pub context: Value,
    pub current_node_id: Option<String>,
    #[serde(default)]
    pub wait_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub waiting_meta: Option<WaitingMeta>,
    pub trigger_type: String,
    #[serde(default)]
    pub trigger_entity_type: Option<String>,
    #[serde(default)]
    pub trigger_entity_id: Option<i64>,
    #[serde(default)]
    pub clinic_id: Option<i64>,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Durably completed steps; the next step number is `step_count + 1`.
    #[serde(default)]
    pub step_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Execution {
    /// Initial `running` state positioned on the template's entry node.
    pub fn start(template: &TemplateVersion, trigger: Trigger) -> Self {
        let now = Utc::now();
        let mut context = match &trigger.payload {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        context.insert(
            "trigger".to_string(),
            serde_json::json!({
                "type": trigger.trigger_type,
                "entity_type": trigger.entity_type,
                "entity_id": trigger.entity_id,
                "clinic_id": trigger.clinic_id,
                "data": trigger.payload,
            }),
        );
        Execution {
            id: Uuid::new_v4(),
            template_version_id: template.id.clone(),
            status: ExecutionStatus::Running,
            context: Value::Object(context),
            current_node_id: Some(template.entry_node_id.clone()),
            wait_until: None,
            waiting_meta: None,
            trigger_type: trigger.trigger_type,
            trigger_entity_type: trigger.entity_type,
            trigger_entity_id: trigger.entity_id,
            clinic_id: trigger.clinic_id,
            last_error: None,
            step_count: 0,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Park the execution on its current node.
    pub fn suspend(&mut self, wait_until: Option<DateTime<Utc>>, meta: WaitingMeta) {
        self.status = ExecutionStatus::Waiting;
        self.wait_until = wait_until;
        self.waiting_meta = Some(meta);
    }

    pub fn clear_wait(&mut self) {
        self.wait_until = None;
        self.waiting_meta = None;
    }

    /// Move to a terminal status and clear the node pointer.
    pub fn finish(&mut self, status: ExecutionStatus, error: Option<String>) {
        self.status = status;
        self.clear_wait();
        if status != ExecutionStatus::DeadLetter {
            self.current_node_id = None;
        }
        if error.is_some() {
            self.last_error = error;
        }
        self.finished_at = Some(Utc::now());
    }

    /// Both halves of the waiting invariant hold.
    pub fn is_consistently_waiting(&self) -> bool {
        self.status == ExecutionStatus::Waiting
            && self.current_node_id.is_some()
            && (self.wait_until.is_some()
                || self
                    .waiting_meta
                    .as_ref()
                    .and_then(|meta| meta.listens_to_node_id.as_ref())
                    .is_some())
    }
}

/// Status of a per-node log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Running,
    Success,
    Error,
}

/// Append-only record of one node execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub id: u64,
    pub flow_execution_id: Uuid,
    pub step: u64,
    pub node_id: String,
    pub node_type: String,
    pub status: LogStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub audit_snapshot: Value,
}

/// Fields written when a log entry is closed.
#[derive(Debug, Clone)]
pub struct LogCompletion {
    pub status: LogStatus,
    pub finished_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub audit_snapshot: Value,
}
