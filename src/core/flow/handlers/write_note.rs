use crate::core::error::AppError;
use crate::core::flow::clinic::{ClinicEvent, ClinicServices, NoteTarget};
use crate::core::flow::dispatcher::{NodeContext, NodeHandler, NodeOutcome};
use crate::core::flow::template::{ports, Node, NodeKind};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt::Write;

/// Appends a timestamped line to every note-bearing entity the execution targets.
pub struct WriteNoteHandler {
    services: ClinicServices,
    timestamp_format: String,
}

impl WriteNoteHandler {
    pub fn new(services: ClinicServices, timestamp_format: String) -> Self {
        Self {
            services,
            timestamp_format,
        }
    }
}

#[async_trait]
impl NodeHandler for WriteNoteHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::WriteNote
    }

    async fn process(&self, node: &Node, ctx: &NodeContext<'_>) -> Result<NodeOutcome, AppError> {
        let content = ctx.config_string(node, "content");
        if content.is_empty() {
            return Err(AppError::configuration("write_note requires non-empty content")
                .with_code("FLOW-CFG-001"));
        }

        let targets = ctx.targets();
        let candidates = [
            (NoteTarget::Conversation, targets.conversation_id),
            (NoteTarget::LeadIntake, targets.lead_intake_id),
            (NoteTarget::Appointment, targets.appointment_id),
        ];
        let mut line = String::new();
        write!(line, "[{}] {}", ctx.now.format(&self.timestamp_format), content).map_err(|_| {
            AppError::configuration(format!(
                "invalid note timestamp format '{}'",
                self.timestamp_format
            ))
            .with_code("FLOW-CFG-007")
        })?;

        let mut written: Vec<Value> = Vec::new();
        let mut failures: Vec<(Value, AppError)> = Vec::new();
        for (target, id) in candidates {
            let Some(id) = id else { continue };
            if let Err(err) = self.services.entities.append_note(target, id, &line).await {
                tracing::warn!(node_id = %node.id, target = target.as_str(), id, error = %err, "note target failed");
                failures.push((json!({"type": target.as_str(), "id": id}), err));
                continue;
            }
            written.push(json!({"type": target.as_str(), "id": id}));

            if target == NoteTarget::Conversation {
                if let Some(clinic_id) = targets.clinic_id {
                    self.services
                        .broadcast_best_effort(
                            clinic_id,
                            ClinicEvent {
                                event: "note_written".to_string(),
                                payload: json!({
                                    "conversation_id": id,
                                    "execution_id": ctx.execution.id,
                                    "node_id": node.id,
                                    "content": line,
                                }),
                            },
                        )
                        .await;
                }
            }
        }

        let failed_targets: Vec<Value> = failures
            .iter()
            .map(|(target, err)| {
                let mut entry = target.clone();
                entry["code"] = json!(err.code);
                entry["error"] = json!(err.message);
                entry
            })
            .collect();

        // Any written note makes the node succeed; only an all-failed write is an error.
        if written.is_empty() {
            if let Some((_, mut err)) = failures.into_iter().next() {
                err.add_context("failed_targets", &Value::Array(failed_targets).to_string());
                return Err(err);
            }
        }

        let output = if written.is_empty() {
            tracing::debug!(node_id = %node.id, "write_note found no note target");
            json!({"status": "skipped_no_target"})
        } else if failed_targets.is_empty() {
            json!({"status": "written", "targets": written, "content": content})
        } else {
            json!({
                "status": "partial",
                "targets": written,
                "failed_targets": failed_targets,
                "content": content,
            })
        };
        Ok(NodeOutcome::success(output, node.port(ports::ON_SUCCESS)))
    }
}
