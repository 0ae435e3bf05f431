use crate::core::error::AppError;
use crate::core::flow::dispatcher::{NodeContext, NodeHandler, NodeOutcome};
use crate::core::flow::template::{ports, Node, NodeKind};
use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

/// Placeholder for outbound integrations: always succeeds with a synthesized id.
pub struct StubActionHandler {
    kind: NodeKind,
}

impl StubActionHandler {
    pub fn new(kind: NodeKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl NodeHandler for StubActionHandler {
    fn kind(&self) -> NodeKind {
        self.kind.clone()
    }

    async fn process(&self, node: &Node, ctx: &NodeContext<'_>) -> Result<NodeOutcome, AppError> {
        let output = match self.kind {
            NodeKind::SendWhatsapp => json!({
                "status": "queued",
                "channel": "whatsapp",
                "message_id": format!("stub-wa-{}", Uuid::new_v4()),
                "to": ctx.config(node, "to"),
            }),
            NodeKind::SendEmail => json!({
                "status": "queued",
                "channel": "email",
                "message_id": format!("stub-email-{}", Uuid::new_v4()),
                "to": ctx.config(node, "to"),
            }),
            _ => json!({
                "status": "stubbed",
                "request_id": format!("stub-api-{}", Uuid::new_v4()),
                "response": {"ok": true, "status_code": 200},
            }),
        };
        tracing::debug!(node_id = %node.id, node_type = %self.kind, "stub action completed");
        Ok(NodeOutcome::success(output, node.port(ports::ON_SUCCESS)))
    }
}
