#![allow(clippy::result_large_err)] // Executor functions return AppError directly to preserve diagnostic context.

use crate::core::config::EngineConfig;
use crate::core::error::AppError;
use crate::core::flow::audit::{AuditLogWriter, AuditSnapshot};
use crate::core::flow::clinic::ClinicServices;
use crate::core::flow::context::record_node_output;
use crate::core::flow::dispatcher::{resolve_config, HandlerRegistry, NodeContext, NodeOutcome};
use crate::core::flow::handlers::register_builtins;
use crate::core::flow::state::{Execution, ExecutionStatus, LogStatus, ResumeMode, Trigger};
use crate::core::flow::store::{ExecutionLogStore, ExecutionStore, TemplateStore};
use crate::core::flow::template::{ports, Node, TemplateVersion};
use crate::core::types::ErrorCategory;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// Per-invocation options for [`FlowEngine::run_execution`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides the configured step budget for this invocation.
    pub max_steps: Option<usize>,
    pub resume_mode: Option<ResumeMode>,
    /// Inbound reply text; only used with [`ResumeMode::Response`].
    pub response_text: Option<String>,
}

impl RunOptions {
    pub fn resume(mode: ResumeMode) -> Self {
        Self {
            resume_mode: Some(mode),
            ..Self::default()
        }
    }

    pub fn respond(text: impl Into<String>) -> Self {
        Self {
            resume_mode: Some(ResumeMode::Response),
            response_text: Some(text.into()),
            ..Self::default()
        }
    }
}

/// Drives executions through their template graph, one durable step at a time.
pub struct FlowEngine {
    templates: Arc<dyn TemplateStore>,
    executions: Arc<dyn ExecutionStore>,
    audit: AuditLogWriter,
    registry: HandlerRegistry,
    config: EngineConfig,
}

impl FlowEngine {
    pub fn new(
        templates: Arc<dyn TemplateStore>,
        executions: Arc<dyn ExecutionStore>,
        logs: Arc<dyn ExecutionLogStore>,
        registry: HandlerRegistry,
        config: EngineConfig,
    ) -> Self {
        Self {
            templates,
            executions,
            audit: AuditLogWriter::new(logs),
            registry,
            config,
        }
    }

    /// Engine with every built-in handler wired to `services`.
    pub fn with_builtins(
        templates: Arc<dyn TemplateStore>,
        executions: Arc<dyn ExecutionStore>,
        logs: Arc<dyn ExecutionLogStore>,
        services: ClinicServices,
        config: EngineConfig,
    ) -> Self {
        let mut builder = HandlerRegistry::builder();
        register_builtins(&mut builder, services, &config);
        Self::new(templates, executions, logs, builder.build(), config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn executions(&self) -> &Arc<dyn ExecutionStore> {
        &self.executions
    }

    pub fn logs(&self) -> &Arc<dyn ExecutionLogStore> {
        self.audit.store()
    }

    /// Create a `running` execution positioned on the template's entry node.
    pub async fn start_execution(
        &self,
        template_version_id: &str,
        trigger: Trigger,
    ) -> Result<Execution, AppError> {
        let template = self.templates.get_template_version(template_version_id).await?;
        template.validate()?;
        let execution = Execution::start(&template, trigger);
        self.executions.create(&execution).await?;
        tracing::info!(
            execution_id = %execution.id,
            template = %template.id,
            trigger_type = %execution.trigger_type,
            "execution created"
        );
        Ok(execution)
    }

    /// Run or resume an execution until it completes, fails, suspends or exhausts its budget.
    ///
    /// Node failures are absorbed into the execution state. Only a zero step budget
    /// and failures to load or persist the execution and its log are returned as `Err`.
    pub async fn run_execution(
        &self,
        execution_id: Uuid,
        options: RunOptions,
    ) -> Result<Execution, AppError> {
        let span = tracing::info_span!("run_execution", execution_id = %execution_id);
        self.run_inner(execution_id, options).instrument(span).await
    }

    async fn run_inner(
        &self,
        execution_id: Uuid,
        options: RunOptions,
    ) -> Result<Execution, AppError> {
        if options.max_steps == Some(0) {
            return Err(AppError::configuration("max_steps must be greater than 0")
                .with_code("FLOW-CFG-010"));
        }
        let mut execution = self.executions.load(execution_id).await?;
        if execution.status.is_terminal() {
            tracing::debug!(status = %execution.status, "execution already terminal");
            return Ok(execution);
        }

        let now = Utc::now();
        let resume_mode = match (execution.status, options.resume_mode) {
            (ExecutionStatus::Waiting, None) => {
                tracing::debug!("execution is waiting and no resume mode was given");
                return Ok(execution);
            }
            (ExecutionStatus::Waiting, Some(ResumeMode::Timeout))
                if execution.wait_until.is_some_and(|due| due > now) =>
            {
                tracing::debug!(wait_until = ?execution.wait_until, "timeout resume before due time");
                return Ok(execution);
            }
            (ExecutionStatus::Waiting, Some(mode)) => Some(mode),
            _ => None,
        };

        let template = match self
            .templates
            .get_template_version(&execution.template_version_id)
            .await
        {
            Ok(template) => template,
            Err(err) => {
                let err = AppError::new(
                    ErrorCategory::GraphIntegrityError,
                    format!(
                        "template version '{}' could not be loaded: {}",
                        execution.template_version_id, err.message
                    ),
                )
                .with_code("FLOW-GRAPH-003");
                tracing::error!(error = %err, "execution failed");
                execution.finish(ExecutionStatus::Failed, Some(err.to_string()));
                execution.updated_at = Utc::now();
                self.executions.save(&execution).await?;
                return Ok(execution);
            }
        };

        if let Some(mode) = resume_mode {
            apply_resume(
                &mut execution,
                &template,
                mode,
                options.response_text.as_deref(),
                now,
            );
            tracing::info!(resume_mode = %mode, next_node = ?execution.current_node_id, "execution resumed");
            self.executions.save(&execution).await?;
        }

        let max_steps = options.max_steps.unwrap_or(self.config.max_steps);
        let mut steps_taken = 0usize;
        while execution.status == ExecutionStatus::Running {
            let Some(node_id) = execution.current_node_id.clone() else {
                tracing::info!(steps = execution.step_count, "execution completed");
                execution.finish(ExecutionStatus::Completed, None);
                execution.updated_at = Utc::now();
                self.executions.save(&execution).await?;
                break;
            };

            if steps_taken >= max_steps {
                let err = AppError::new(
                    ErrorCategory::StepBudgetError,
                    format!(
                        "step budget of {} exhausted before node '{}'",
                        max_steps, node_id
                    ),
                )
                .with_code("FLOW-STEP-001");
                tracing::warn!(error = %err, "execution dead-lettered");
                execution.finish(ExecutionStatus::DeadLetter, Some(err.to_string()));
                execution.updated_at = Utc::now();
                self.executions.save(&execution).await?;
                break;
            }

            let Some(node) = template.node(&node_id) else {
                let err = AppError::new(
                    ErrorCategory::GraphIntegrityError,
                    format!(
                        "node '{}' does not exist in template '{}'",
                        node_id, template.id
                    ),
                )
                .with_code("FLOW-GRAPH-001");
                tracing::error!(error = %err, "execution failed");
                execution.finish(ExecutionStatus::Failed, Some(err.to_string()));
                execution.updated_at = Utc::now();
                self.executions.save(&execution).await?;
                break;
            };

            steps_taken += 1;
            let step = execution.step_count + 1;
            let result = self.execute_step(&execution, node, step).await?;
            execution.step_count = step;
            apply_step_result(&mut execution, node, result);
            execution.updated_at = Utc::now();
            self.executions.save(&execution).await?;
        }

        Ok(execution)
    }

    /// Dispatch one step, or recover it from the log when a previous invocation
    /// already got that far.
    async fn execute_step(
        &self,
        execution: &Execution,
        node: &Node,
        step: u64,
    ) -> Result<Result<NodeOutcome, AppError>, AppError> {
        if let Some(entry) = self.audit.store().entry_for_step(execution.id, step).await? {
            if entry.node_id == node.id {
                let snapshot = AuditSnapshot::from_entry(&entry);
                match entry.status {
                    LogStatus::Success => {
                        if let Some(outcome) = snapshot.and_then(|s| s.outcome) {
                            tracing::info!(step, node_id = %node.id, "replaying logged outcome");
                            return Ok(Ok(outcome));
                        }
                    }
                    LogStatus::Error => {
                        let err = snapshot
                            .and_then(|s| s.error)
                            .map(AppError::from)
                            .unwrap_or_else(|| {
                                AppError::infrastructure(
                                    entry.error_message.clone().unwrap_or_default(),
                                )
                            });
                        tracing::info!(step, node_id = %node.id, "replaying logged error");
                        return Ok(Err(err));
                    }
                    LogStatus::Running => {
                        let err = AppError::infrastructure(format!(
                            "step {} at node '{}' was interrupted before completing",
                            step, node.id
                        ))
                        .with_code("FLOW-INFRA-409");
                        tracing::warn!(step, node_id = %node.id, "interrupted step will not be re-dispatched");
                        self.audit
                            .record_error(&entry, resolve_config(node, &execution.context), &err)
                            .await?;
                        return Ok(Err(err));
                    }
                }
            }
        }

        let started_at = Utc::now();
        let entry = self
            .audit
            .open(execution.id, step, node, started_at)
            .await?;
        let node_config = resolve_config(node, &execution.context);
        let ctx = NodeContext::new(execution, step, started_at);
        tracing::debug!(step, node_id = %node.id, node_type = %node.kind, "dispatching node");
        let result = self.registry.dispatch(node, &ctx).await;
        match &result {
            Ok(outcome) => {
                self.audit
                    .record_outcome(&entry, node_config, outcome)
                    .await?
            }
            Err(err) => {
                tracing::warn!(step, node_id = %node.id, error = %err, "node failed");
                self.audit.record_error(&entry, node_config, err).await?
            }
        }
        Ok(result)
    }
}

/// Apply a resume: merge any response, pick the branch, and return to `running`.
fn apply_resume(
    execution: &mut Execution,
    template: &TemplateVersion,
    mode: ResumeMode,
    response_text: Option<&str>,
    now: DateTime<Utc>,
) {
    let meta = execution.waiting_meta.clone();
    let anchor = meta
        .as_ref()
        .map(|meta| meta.node_id.clone())
        .or_else(|| execution.current_node_id.clone());

    if mode == ResumeMode::Response {
        if let Some(text) = response_text {
            let listened = meta
                .as_ref()
                .and_then(|meta| meta.listens_to_node_id.clone())
                .or_else(|| anchor.clone());
            if let Some(listened) = listened {
                record_node_output(
                    &mut execution.context,
                    &listened,
                    &json!({"response_text": text, "responded_at": now}),
                );
            }
        }
    }

    let next = match &meta {
        Some(meta) => meta.resume_target(mode),
        None => anchor
            .as_deref()
            .and_then(|id| template.node(id))
            .and_then(|node| {
                let preferred = match mode {
                    ResumeMode::Response => ports::ON_RESPONSE,
                    ResumeMode::Timeout => ports::ON_TIMEOUT,
                };
                node.port(preferred).or_else(|| node.port(ports::ON_COMPLETE))
            })
            .map(str::to_string),
    };

    if let Some(anchor) = &anchor {
        record_node_output(
            &mut execution.context,
            anchor,
            &json!({"status": "resumed", "resume_mode": mode, "resumed_at": now}),
        );
    }
    execution.current_node_id = next;
    execution.status = ExecutionStatus::Running;
    execution.clear_wait();
    execution.updated_at = now;
}

/// Fold one step's result into the execution state.
fn apply_step_result(
    execution: &mut Execution,
    node: &Node,
    result: Result<NodeOutcome, AppError>,
) {
    let at = Utc::now();
    match result {
        Ok(NodeOutcome::Success {
            output,
            next_node_id,
        }) => {
            record_node_output(&mut execution.context, &node.id, &output);
            record_node_output(
                &mut execution.context,
                &node.id,
                &json!({"status": "success", "at": at}),
            );
            execution.current_node_id = next_node_id;
        }
        Ok(NodeOutcome::Waiting {
            output,
            wait_until,
            waiting_meta,
        }) => {
            record_node_output(&mut execution.context, &node.id, &output);
            record_node_output(
                &mut execution.context,
                &node.id,
                &json!({"status": "waiting", "at": at}),
            );
            tracing::info!(node_id = %node.id, wait_until = ?wait_until, "execution suspended");
            execution.suspend(wait_until, waiting_meta);
        }
        Err(err) => {
            record_node_output(
                &mut execution.context,
                &node.id,
                &json!({
                    "status": "error",
                    "error_message": err.message,
                    "error_code": err.code,
                    "at": at,
                }),
            );
            execution.last_error = Some(err.to_string());
            match node.port(ports::ON_FAIL).filter(|_| err.is_routable()) {
                Some(target) => {
                    tracing::info!(node_id = %node.id, on_fail = %target, "routing error through on_fail");
                    execution.current_node_id = Some(target.to_string());
                }
                None => {
                    tracing::error!(node_id = %node.id, error = %err, "execution failed");
                    execution.finish(ExecutionStatus::Failed, Some(err.to_string()));
                }
            }
        }
    }
}
