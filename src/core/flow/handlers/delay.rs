use crate::core::error::AppError;
use crate::core::flow::context::{value_as_integer, value_to_text};
use crate::core::flow::dispatcher::{NodeContext, NodeHandler, NodeOutcome};
use crate::core::flow::duration::{parse_datetime, unit_duration};
use crate::core::flow::state::{WaitKind, WaitingMeta};
use crate::core::flow::template::{ports, Node, NodeKind};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

fn waiting_meta(node: &Node, kind: WaitKind, listens_to_node_id: Option<String>) -> WaitingMeta {
    let port = |name: &str| node.port(name).map(str::to_string);
    WaitingMeta {
        kind,
        node_id: node.id.clone(),
        listens_to_node_id,
        on_complete: port(ports::ON_COMPLETE),
        on_response: port(ports::ON_RESPONSE),
        on_timeout: port(ports::ON_TIMEOUT),
    }
}

/// Duration from an `amount` key and a `unit` key; `None` when the amount is absent.
fn configured_duration(
    node: &Node,
    ctx: &NodeContext<'_>,
    amount_key: &str,
    unit_keys: &[&str],
) -> Result<Option<Duration>, AppError> {
    let amount = ctx.config(node, amount_key);
    if amount.is_null() {
        return Ok(None);
    }
    let unit = unit_keys
        .iter()
        .map(|key| ctx.config_string(node, key))
        .find(|unit| !unit.is_empty())
        .unwrap_or_else(|| "minutes".to_string());
    value_as_integer(&amount)
        .and_then(|amount| unit_duration(amount, &unit))
        .map(Some)
        .ok_or_else(|| {
            AppError::configuration(format!(
                "{} '{}' with unit '{}' is not a valid duration",
                amount_key, amount, unit
            ))
            .with_code("FLOW-CFG-006")
        })
}

/// Suspends for a fixed duration, then follows `on_complete`.
pub struct FixedDelayHandler;

impl Default for FixedDelayHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl FixedDelayHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NodeHandler for FixedDelayHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::FixedDelay
    }

    async fn process(&self, node: &Node, ctx: &NodeContext<'_>) -> Result<NodeOutcome, AppError> {
        let duration = configured_duration(node, ctx, "duration", &["unit"])?.ok_or_else(|| {
            AppError::configuration("delay/fixed requires duration").with_code("FLOW-CFG-006")
        })?;
        let wait_until = ctx.now + duration;
        Ok(NodeOutcome::Waiting {
            output: json!({"wait_until": wait_until, "duration_seconds": duration.num_seconds()}),
            wait_until: Some(wait_until),
            waiting_meta: waiting_meta(node, WaitKind::Fixed, None),
        })
    }
}

/// Suspends until a resolved timestamp, then follows `on_complete`.
pub struct WaitUntilHandler;

impl Default for WaitUntilHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitUntilHandler {
    pub fn new() -> Self {
        Self
    }
}

fn as_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => parse_datetime(text),
        Value::Number(_) => value_as_integer(value).and_then(|secs| DateTime::from_timestamp(secs, 0)),
        _ => None,
    }
}

#[async_trait]
impl NodeHandler for WaitUntilHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::WaitUntil
    }

    async fn process(&self, node: &Node, ctx: &NodeContext<'_>) -> Result<NodeOutcome, AppError> {
        let resolved = ctx.config(node, "datetime_expression");
        let parsed = as_timestamp(&resolved);
        if parsed.is_none() {
            tracing::warn!(
                node_id = %node.id,
                expression = %value_to_text(&resolved).unwrap_or_default(),
                "wait_until expression did not resolve to a timestamp; resuming immediately"
            );
        }
        let wait_until = parsed.unwrap_or(ctx.now);
        Ok(NodeOutcome::Waiting {
            output: json!({"wait_until": wait_until, "resolved": parsed.is_some()}),
            wait_until: Some(wait_until),
            waiting_meta: waiting_meta(node, WaitKind::WaitUntil, None),
        })
    }
}

/// Parks until an inbound response arrives or an optional timeout fires.
pub struct WaitResponseHandler;

impl Default for WaitResponseHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitResponseHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NodeHandler for WaitResponseHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::WaitResponse
    }

    async fn process(&self, node: &Node, ctx: &NodeContext<'_>) -> Result<NodeOutcome, AppError> {
        let mut listens_to = ctx.config_string(node, "listens_to_node_id");
        if listens_to.is_empty() {
            listens_to = node.id.clone();
        }
        let timeout = configured_duration(node, ctx, "timeout_duration", &["timeout_unit", "unit"])?;
        let wait_until = timeout.map(|duration| ctx.now + duration);
        Ok(NodeOutcome::Waiting {
            output: json!({"listens_to_node_id": listens_to, "timeout_at": wait_until}),
            wait_until,
            waiting_meta: waiting_meta(node, WaitKind::WaitResponse, Some(listens_to)),
        })
    }
}
