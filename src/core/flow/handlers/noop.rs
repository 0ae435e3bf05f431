use crate::core::error::AppError;
use crate::core::flow::dispatcher::{NodeContext, NodeHandler, NodeOutcome};
use crate::core::flow::template::{ports, Node, NodeKind};
use async_trait::async_trait;
use serde_json::json;

/// Forward-compatible fallback for node types without a handler.
pub struct NoOpHandler;

impl Default for NoOpHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl NoOpHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NodeHandler for NoOpHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Other("noop".to_string())
    }

    async fn process(&self, node: &Node, _ctx: &NodeContext<'_>) -> Result<NodeOutcome, AppError> {
        Ok(NodeOutcome::success(
            json!({"status": "skipped", "reason": "unhandled_node_type", "node_type": node.kind.as_str()}),
            node.port(ports::ON_SUCCESS),
        ))
    }
}
