use crate::core::error::AppError;
use crate::core::flow::clinic::{ClinicServices, Notification};
use crate::core::flow::dispatcher::{NodeContext, NodeHandler, NodeOutcome};
use crate::core::flow::duration::parse_offset;
use crate::core::flow::template::{ports, Node, NodeKind};
use async_trait::async_trait;
use serde_json::{json, Value};

const DEFAULT_TITLE: &str = "Tarea pendiente";
const DEFAULT_PRIORITY: &str = "normal";

/// Who a task is assigned to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Assignee {
    User(i64),
    Role {
        role: String,
        subrole: Option<String>,
    },
}

/// Creates one task notification per assignee within the target clinic.
pub struct CreateTaskHandler {
    services: ClinicServices,
    member_batch_limit: usize,
}

impl CreateTaskHandler {
    pub fn new(services: ClinicServices, member_batch_limit: usize) -> Self {
        Self {
            services,
            member_batch_limit,
        }
    }

    fn assignee(node: &Node, ctx: &NodeContext<'_>) -> Result<Assignee, AppError> {
        if let Some(user_id) = ctx.config_integer(node, "assignee_user_id") {
            return Ok(Assignee::User(user_id));
        }
        let role = ctx.config_string(node, "assignee_role");
        if !role.is_empty() {
            let subrole = ctx.config_string(node, "assignee_subrole");
            return Ok(Assignee::Role {
                role,
                subrole: (!subrole.is_empty()).then_some(subrole),
            });
        }
        Err(
            AppError::configuration("create_task requires assignee_user_id or assignee_role")
                .with_code("FLOW-CFG-004"),
        )
    }

    async fn resolve_users(&self, clinic_id: i64, assignee: &Assignee) -> Result<Vec<i64>, AppError> {
        match assignee {
            Assignee::User(user_id) => {
                if self
                    .services
                    .directory
                    .is_clinic_member(clinic_id, *user_id)
                    .await?
                {
                    Ok(vec![*user_id])
                } else {
                    Err(AppError::target_resolution(format!(
                        "user {} is not a member of clinic {}",
                        user_id, clinic_id
                    ))
                    .with_code("FLOW-TGT-004"))
                }
            }
            Assignee::Role { role, subrole } => {
                self.services
                    .directory
                    .list_clinic_members(
                        clinic_id,
                        Some(role.as_str()),
                        subrole.as_deref(),
                        self.member_batch_limit,
                    )
                    .await
            }
        }
    }
}

#[async_trait]
impl NodeHandler for CreateTaskHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::CreateTask
    }

    async fn process(&self, node: &Node, ctx: &NodeContext<'_>) -> Result<NodeOutcome, AppError> {
        let clinic_id = ctx.targets().clinic_id.ok_or_else(|| {
            AppError::target_resolution("create_task could not resolve a clinic id")
                .with_code("FLOW-TGT-003")
        })?;
        let assignee = Self::assignee(node, ctx)?;

        let due_in = ctx.config_string(node, "due_in");
        let due_at = if due_in.is_empty() {
            None
        } else {
            let offset = parse_offset(&due_in).ok_or_else(|| {
                AppError::configuration(format!("create_task due_in '{}' is not a duration", due_in))
                    .with_code("FLOW-CFG-005")
            })?;
            Some(ctx.now + offset)
        };

        let users = self.resolve_users(clinic_id, &assignee).await?;
        if users.is_empty() {
            return Err(AppError::target_resolution(format!(
                "create_task found no assignees in clinic {}",
                clinic_id
            ))
            .with_code("FLOW-TGT-005"));
        }

        let mut title = ctx.config_string(node, "title");
        if title.is_empty() {
            title = DEFAULT_TITLE.to_string();
        }
        let description = ctx.config_string(node, "description");
        let mut priority = ctx.config_string(node, "priority");
        if priority.is_empty() {
            priority = DEFAULT_PRIORITY.to_string();
        }

        let mut notified: Vec<i64> = Vec::new();
        let mut failures: Vec<(i64, AppError)> = Vec::new();
        for user_id in &users {
            let result = self
                .services
                .notifications
                .create_notification(Notification {
                    user_id: *user_id,
                    clinic_id,
                    title: title.clone(),
                    message: description.clone(),
                    data: json!({
                        "type": "task",
                        "execution_id": ctx.execution.id,
                        "node_id": node.id,
                        "priority": priority,
                        "due_at": due_at,
                    }),
                })
                .await;
            match result {
                Ok(()) => notified.push(*user_id),
                Err(err) => {
                    tracing::warn!(node_id = %node.id, user_id = *user_id, error = %err, "task notification failed");
                    failures.push((*user_id, err));
                }
            }
        }

        let failed_assignees: Vec<Value> = failures
            .iter()
            .map(|(user_id, err)| json!({"user_id": user_id, "code": err.code, "error": err.message}))
            .collect();

        // Partial delivery succeeds; only a fan-out that reached nobody is an error.
        if notified.is_empty() {
            if let Some((_, mut err)) = failures.into_iter().next() {
                err.add_context("failed_assignees", &Value::Array(failed_assignees).to_string());
                return Err(err);
            }
        }

        let mut output = json!({
            "status": "created",
            "clinic_id": clinic_id,
            "assignees": notified,
            "notifications_created": notified.len(),
            "title": title,
            "priority": priority,
            "due_at": due_at,
        });
        if !failed_assignees.is_empty() {
            output["status"] = json!("partial");
            output["failed_assignees"] = Value::Array(failed_assignees);
        }
        Ok(NodeOutcome::success(output, node.port(ports::ON_SUCCESS)))
    }
}
