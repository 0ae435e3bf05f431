#![allow(clippy::result_large_err)] // Handler trait and registry return AppError directly for structured diagnostics without boxing.

use crate::core::error::AppError;
use crate::core::flow::context::{resolve, resolve_integer, resolve_string};
use crate::core::flow::handlers::noop::NoOpHandler;
use crate::core::flow::state::{Execution, WaitingMeta};
use crate::core::flow::targets::{resolve_targets, RuntimeTargets};
use crate::core::flow::template::{Node, NodeKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Result of processing one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeOutcome {
    Success {
        output: Value,
        next_node_id: Option<String>,
    },
    Waiting {
        output: Value,
        wait_until: Option<DateTime<Utc>>,
        waiting_meta: WaitingMeta,
    },
}

impl NodeOutcome {
    pub fn success(output: Value, next_node_id: Option<&str>) -> Self {
        NodeOutcome::Success {
            output,
            next_node_id: next_node_id.map(str::to_string),
        }
    }

    pub fn output(&self) -> &Value {
        match self {
            NodeOutcome::Success { output, .. } | NodeOutcome::Waiting { output, .. } => output,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NodeOutcome::Success { .. } => "success",
            NodeOutcome::Waiting { .. } => "waiting",
        }
    }
}

/// Read-only view of the execution handed to a handler.
pub struct NodeContext<'a> {
    pub execution: &'a Execution,
    pub step: u64,
    pub now: DateTime<Utc>,
}

impl<'a> NodeContext<'a> {
    pub fn new(execution: &'a Execution, step: u64, now: DateTime<Utc>) -> Self {
        Self {
            execution,
            step,
            now,
        }
    }

    pub fn context(&self) -> &Value {
        &self.execution.context
    }

    pub fn targets(&self) -> RuntimeTargets {
        resolve_targets(self.execution, &self.execution.context)
    }

    /// Resolved config value; `Value::Null` when absent.
    pub fn config(&self, node: &Node, key: &str) -> Value {
        node.config_value(key)
            .map(|raw| resolve(raw, self.context()))
            .unwrap_or(Value::Null)
    }

    pub fn config_string(&self, node: &Node, key: &str) -> String {
        resolve_string(node.config_value(key), self.context())
    }

    pub fn config_integer(&self, node: &Node, key: &str) -> Option<i64> {
        resolve_integer(node.config_value(key), self.context())
    }
}

/// Resolve every top-level config entry, for the audit snapshot.
pub fn resolve_config(node: &Node, context: &Value) -> Value {
    match &node.config {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), resolve(value, context)))
                .collect::<Map<String, Value>>(),
        ),
        other => other.clone(),
    }
}

/// Trait implemented by node handlers.
#[async_trait]
pub trait NodeHandler: Send + Sync + 'static {
    /// Node kind this handler serves.
    fn kind(&self) -> NodeKind;

    /// Perform the node's effect and report where the walk continues.
    async fn process(&self, node: &Node, ctx: &NodeContext<'_>) -> Result<NodeOutcome, AppError>;
}

/// Builder used to register handlers before the engine starts.
pub struct HandlerRegistryBuilder {
    handlers: HashMap<NodeKind, Arc<dyn NodeHandler>>,
}

impl Default for HandlerRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistryBuilder {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register<T: NodeHandler>(&mut self, handler: T) -> &mut Self {
        let kind = handler.kind();
        if self.handlers.contains_key(&kind) {
            panic!("duplicate node handler registered: {}", kind);
        }
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            inner: Arc::new(self.handlers),
            fallback: Arc::new(NoOpHandler::new()),
        }
    }
}

/// Immutable kind-to-handler table; unregistered kinds fall through to a no-op.
#[derive(Clone)]
pub struct HandlerRegistry {
    inner: Arc<HashMap<NodeKind, Arc<dyn NodeHandler>>>,
    fallback: Arc<dyn NodeHandler>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistryBuilder::new().build()
    }

    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::new()
    }

    pub fn get(&self, kind: &NodeKind) -> Option<Arc<dyn NodeHandler>> {
        self.inner.get(kind).cloned()
    }

    pub fn contains(&self, kind: &NodeKind) -> bool {
        self.inner.contains_key(kind)
    }

    /// Handler for `kind`, or the no-op fallback.
    pub fn handler_for(&self, kind: &NodeKind) -> Arc<dyn NodeHandler> {
        match self.get(kind) {
            Some(handler) => handler,
            None => {
                tracing::warn!(node_type = %kind, "no handler registered; running as no-op");
                self.fallback.clone()
            }
        }
    }

    pub async fn dispatch(
        &self,
        node: &Node,
        ctx: &NodeContext<'_>,
    ) -> Result<NodeOutcome, AppError> {
        self.handler_for(&node.kind).process(node, ctx).await
    }
}
