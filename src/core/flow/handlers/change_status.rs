use crate::core::error::AppError;
use crate::core::flow::clinic::{ClinicServices, StatusTarget};
use crate::core::flow::dispatcher::{NodeContext, NodeHandler, NodeOutcome};
use crate::core::flow::template::{ports, Node, NodeKind};
use async_trait::async_trait;
use serde_json::json;

/// Moves the targeted appointment, or failing that the lead, to a new status.
pub struct ChangeStatusHandler {
    services: ClinicServices,
}

impl ChangeStatusHandler {
    pub fn new(services: ClinicServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl NodeHandler for ChangeStatusHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::ChangeStatus
    }

    async fn process(&self, node: &Node, ctx: &NodeContext<'_>) -> Result<NodeOutcome, AppError> {
        let new_status = ctx.config_string(node, "new_status").to_lowercase();
        if new_status.is_empty() {
            return Err(AppError::configuration("change_status requires new_status")
                .with_code("FLOW-CFG-002"));
        }

        let targets = ctx.targets();
        let (target, id) = match (targets.appointment_id, targets.lead_intake_id) {
            (Some(id), _) => (StatusTarget::Appointment, id),
            (None, Some(id)) => (StatusTarget::LeadIntake, id),
            (None, None) => {
                return Err(AppError::target_resolution(
                    "change_status found no appointment or lead to update",
                )
                .with_code("FLOW-TGT-001"));
            }
        };

        if !target.accepts(&new_status) {
            return Err(AppError::configuration(format!(
                "'{}' is not a valid {} status; expected one of {}",
                new_status,
                target,
                target.allowed_statuses().join(", ")
            ))
            .with_code("FLOW-CFG-003"));
        }

        let previous = self
            .services
            .entities
            .current_status(target, id)
            .await?
            .ok_or_else(|| {
                AppError::target_resolution(format!("{} {} does not exist", target, id))
                    .with_code("FLOW-TGT-002")
            })?;
        self.services
            .entities
            .update_status(target, id, &new_status)
            .await?;

        Ok(NodeOutcome::success(
            json!({
                "status": "updated",
                "target_type": target.as_str(),
                "target_id": id,
                "previous_status": previous,
                "new_status": new_status,
            }),
            node.port(ports::ON_SUCCESS),
        ))
    }
}
