use crate::core::error::AppError;
use crate::core::flow::context::{node_output, value_as_number, value_to_text};
use crate::core::flow::dispatcher::{NodeContext, NodeHandler, NodeOutcome};
use crate::core::flow::template::{ports, Node, NodeKind};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOperator {
    Equals,
    NotEquals,
    Exists,
    Contains,
    GreaterThan,
    LessThan,
}

impl FieldOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldOperator::Equals => "equals",
            FieldOperator::NotEquals => "not_equals",
            FieldOperator::Exists => "exists",
            FieldOperator::Contains => "contains",
            FieldOperator::GreaterThan => "greater_than",
            FieldOperator::LessThan => "less_than",
        }
    }

    /// Apply the operator; numeric when both sides are numeric, textual otherwise.
    pub fn evaluate(&self, left: &Value, right: &Value) -> bool {
        match self {
            FieldOperator::Equals => values_equal(left, right),
            FieldOperator::NotEquals => !values_equal(left, right),
            FieldOperator::Exists => match left {
                Value::Null => false,
                Value::String(text) => !text.trim().is_empty(),
                _ => true,
            },
            FieldOperator::Contains => match left {
                Value::Array(items) => items.iter().any(|item| values_equal(item, right)),
                Value::Null => false,
                other => comparable_text(other).contains(&comparable_text(right)),
            },
            FieldOperator::GreaterThan => compare(left, right) == Some(Ordering::Greater),
            FieldOperator::LessThan => compare(left, right) == Some(Ordering::Less),
        }
    }
}

impl FromStr for FieldOperator {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "" | "equals" | "eq" | "==" => Ok(FieldOperator::Equals),
            "not_equals" | "neq" | "!=" => Ok(FieldOperator::NotEquals),
            "exists" => Ok(FieldOperator::Exists),
            "contains" => Ok(FieldOperator::Contains),
            "greater_than" | "gt" | ">" => Ok(FieldOperator::GreaterThan),
            "less_than" | "lt" | "<" => Ok(FieldOperator::LessThan),
            other => Err(AppError::configuration(format!(
                "unknown field_check operator '{}'",
                other
            ))
            .with_code("FLOW-CFG-008")),
        }
    }
}

fn comparable_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
        scalar => value_to_text(scalar).unwrap_or_default(),
    }
}

fn numeric_pair(left: &Value, right: &Value) -> Option<(f64, f64)> {
    Some((value_as_number(left)?, value_as_number(right)?))
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match numeric_pair(left, right) {
        Some((a, b)) => a == b,
        None => comparable_text(left) == comparable_text(right),
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    if left.is_null() || right.is_null() {
        return None;
    }
    match numeric_pair(left, right) {
        Some((a, b)) => a.partial_cmp(&b),
        None => Some(comparable_text(left).cmp(&comparable_text(right))),
    }
}

/// Compares a resolved field against a value and branches `on_true` / `on_false`.
pub struct FieldCheckHandler;

impl Default for FieldCheckHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldCheckHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NodeHandler for FieldCheckHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::FieldCheck
    }

    async fn process(&self, node: &Node, ctx: &NodeContext<'_>) -> Result<NodeOutcome, AppError> {
        let operator: FieldOperator = ctx.config_string(node, "operator").parse()?;
        let field_value = ctx.config(node, "field");
        let compare_value = ctx.config(node, "value");
        let result = operator.evaluate(&field_value, &compare_value);
        let port = if result { ports::ON_TRUE } else { ports::ON_FALSE };
        Ok(NodeOutcome::success(
            json!({
                "result": result,
                "operator": operator.as_str(),
                "field_value": field_value,
                "compare_value": compare_value,
            }),
            node.port(port),
        ))
    }
}

/// Branches on whether a waited-on node has received a non-empty response.
pub struct ResponseCheckHandler;

impl Default for ResponseCheckHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCheckHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NodeHandler for ResponseCheckHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::ResponseCheck
    }

    async fn process(&self, node: &Node, ctx: &NodeContext<'_>) -> Result<NodeOutcome, AppError> {
        let listens_to = ctx.config_string(node, "listens_to_node_id");
        if listens_to.is_empty() {
            return Err(
                AppError::configuration("response_check requires listens_to_node_id")
                    .with_code("FLOW-CFG-009"),
            );
        }
        let response_text = node_output(ctx.context(), &listens_to)
            .and_then(|output| output.get("response_text"))
            .and_then(value_to_text)
            .filter(|text| !text.is_empty());
        let has_response = response_text.is_some();
        let port = if has_response {
            ports::ON_RESPONSE
        } else {
            ports::ON_NO_RESPONSE
        };
        Ok(NodeOutcome::success(
            json!({
                "has_response": has_response,
                "listens_to_node_id": listens_to,
                "response_text": response_text,
            }),
            node.port(port),
        ))
    }
}
