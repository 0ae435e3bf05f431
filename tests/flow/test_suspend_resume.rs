use chrono::{Duration, TimeZone, Utc};
use clinic_flow::core::flow::clinic::{ClinicServices, InMemoryClinic};
use clinic_flow::core::flow::store::{
    ExecutionLogStore, ExecutionStore, InMemoryExecutionLogStore, InMemoryExecutionStore,
    InMemoryTemplateStore,
};
use clinic_flow::core::flow::{
    Execution, ExecutionStatus, FlowEngine, ResumeMode, RunOptions, TemplateVersion, Trigger,
    WaitKind,
};
use clinic_flow::core::EngineConfig;
use serde_json::{json, Value};
use std::sync::Arc;

const REMINDER_FLOW: &str = r#"
id: appointment_reminder
entry_node_id: wait
nodes:
  - id: wait
    type: delay/fixed
    config:
      duration: 10
      unit: minutes
    outputs:
      on_complete: remind
  - id: remind
    type: action/send_whatsapp
    config:
      to: "{{ patient.phone }}"
"#;

const CONFIRMATION_FLOW: &str = r#"
id: appointment_confirmation
entry_node_id: send
nodes:
  - id: send
    type: action/send_whatsapp
    config:
      to: "{{ patient.phone }}"
      body: "Responda SI para confirmar su cita"
    outputs:
      on_success: await
  - id: await
    type: delay/wait_response
    config:
      listens_to_node_id: send
      timeout_duration: 2
      timeout_unit: days
    outputs:
      on_response: check
      on_timeout: followup
  - id: check
    type: condition/response_check
    config:
      listens_to_node_id: send
    outputs:
      on_response: confirm
      on_no_response: followup
  - id: confirm
    type: action/change_status
    config:
      new_status: confirmada
  - id: followup
    type: action/create_task
    config:
      title: "Llamar al paciente"
      assignee_role: recepcion
      due_in: "2 hours"
"#;

const OPEN_ENDED_WAIT_FLOW: &str = r#"
id: open_ended_wait
entry_node_id: await
nodes:
  - id: await
    type: delay/wait_response
    outputs:
      on_response: thanks
  - id: thanks
    type: action/send_email
"#;

const WAIT_UNTIL_FLOW: &str = r#"
id: wait_for_appointment
entry_node_id: until
nodes:
  - id: until
    type: delay/wait_until
    config:
      datetime_expression: "{{ appointment.starts_at }}"
    outputs:
      on_complete: done
  - id: done
    type: action/api_call
"#;

struct Harness {
    engine: FlowEngine,
    executions: Arc<InMemoryExecutionStore>,
    logs: Arc<InMemoryExecutionLogStore>,
    clinic: Arc<InMemoryClinic>,
}

impl Harness {
    async fn new(documents: &[&str]) -> Self {
        let templates = Arc::new(InMemoryTemplateStore::new());
        for document in documents {
            let template: TemplateVersion =
                serde_yaml::from_str(document).expect("template parses");
            templates.insert(template).await;
        }
        let executions = Arc::new(InMemoryExecutionStore::new());
        let logs = Arc::new(InMemoryExecutionLogStore::new());
        let clinic = Arc::new(InMemoryClinic::new());
        let engine = FlowEngine::with_builtins(
            templates,
            executions.clone(),
            logs.clone(),
            ClinicServices::from_backend(clinic.clone()),
            EngineConfig::default(),
        );
        Self {
            engine,
            executions,
            logs,
            clinic,
        }
    }

    async fn start_and_run(&self, template: &str, payload: Value) -> Execution {
        let trigger = Trigger {
            trigger_type: "appointment_created".to_string(),
            entity_type: Some("appointment".to_string()),
            entity_id: Some(11),
            clinic_id: Some(7),
            payload,
        };
        let execution = self
            .engine
            .start_execution(template, trigger)
            .await
            .expect("start execution");
        self.run(&execution, RunOptions::default()).await
    }

    async fn run(&self, execution: &Execution, options: RunOptions) -> Execution {
        self.engine
            .run_execution(execution.id, options)
            .await
            .expect("run execution")
    }

    /// Move the stored wait deadline into the past.
    async fn expire_wait(&self, execution: &Execution) {
        let mut stored = self.executions.load(execution.id).await.unwrap();
        stored.wait_until = Some(Utc::now() - Duration::seconds(1));
        self.executions.save(&stored).await.unwrap();
    }

    async fn log_len(&self, execution: &Execution) -> usize {
        self.logs.entries(execution.id).await.unwrap().len()
    }
}

fn output<'a>(execution: &'a Execution, node_id: &str) -> &'a Value {
    &execution.context["outputs"][node_id]
}

#[tokio::test]
async fn fixed_delay_suspends_then_resumes_on_timeout() {
    let harness = Harness::new(&[REMINDER_FLOW]).await;
    let before = Utc::now();
    let waiting = harness
        .start_and_run("appointment_reminder", json!({"patient": {"phone": "+34611111111"}}))
        .await;

    assert_eq!(waiting.status, ExecutionStatus::Waiting);
    assert_eq!(waiting.current_node_id.as_deref(), Some("wait"));
    assert!(waiting.is_consistently_waiting());
    let wait_until = waiting.wait_until.expect("wait_until");
    assert!(wait_until >= before + Duration::minutes(10));
    assert!(wait_until <= Utc::now() + Duration::minutes(10));
    let meta = waiting.waiting_meta.clone().expect("waiting meta");
    assert_eq!(meta.kind, WaitKind::Fixed);
    assert_eq!(meta.on_complete.as_deref(), Some("remind"));
    assert_eq!(output(&waiting, "wait")["status"], "waiting");
    assert_eq!(output(&waiting, "wait")["duration_seconds"], 600);

    // Too early: nothing changes.
    let early = harness
        .run(&waiting, RunOptions::resume(ResumeMode::Timeout))
        .await;
    assert_eq!(early.status, ExecutionStatus::Waiting);
    assert_eq!(early.wait_until, waiting.wait_until);
    assert_eq!(early.current_node_id.as_deref(), Some("wait"));
    assert_eq!(harness.log_len(&early).await, 1);

    harness.expire_wait(&waiting).await;
    let resumed = harness
        .run(&waiting, RunOptions::resume(ResumeMode::Timeout))
        .await;
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert!(resumed.wait_until.is_none());
    assert!(resumed.waiting_meta.is_none());
    assert_eq!(output(&resumed, "wait")["status"], "resumed");
    assert_eq!(output(&resumed, "wait")["resume_mode"], "timeout");
    assert_eq!(output(&resumed, "remind")["to"], "+34611111111");
    assert_eq!(resumed.step_count, 2);
    assert_eq!(harness.log_len(&resumed).await, 2);
}

#[tokio::test]
async fn waiting_execution_without_resume_mode_is_left_alone() {
    let harness = Harness::new(&[REMINDER_FLOW]).await;
    let waiting = harness
        .start_and_run("appointment_reminder", json!({}))
        .await;
    harness.expire_wait(&waiting).await;

    let untouched = harness.run(&waiting, RunOptions::default()).await;
    assert_eq!(untouched.status, ExecutionStatus::Waiting);
    assert_eq!(untouched.current_node_id.as_deref(), Some("wait"));
    assert_eq!(harness.log_len(&untouched).await, 1);
}

#[tokio::test]
async fn response_is_merged_into_listened_node_and_routes_on_response() {
    let harness = Harness::new(&[CONFIRMATION_FLOW]).await;
    harness.clinic.insert_appointment(11, "pendiente").await;
    let before = Utc::now();
    let waiting = harness
        .start_and_run(
            "appointment_confirmation",
            json!({"patient": {"phone": "+34622222222"}}),
        )
        .await;

    assert_eq!(waiting.status, ExecutionStatus::Waiting);
    assert_eq!(waiting.current_node_id.as_deref(), Some("await"));
    assert!(waiting.is_consistently_waiting());
    let meta = waiting.waiting_meta.clone().expect("waiting meta");
    assert_eq!(meta.kind, WaitKind::WaitResponse);
    assert_eq!(meta.listens_to_node_id.as_deref(), Some("send"));
    assert!(waiting.wait_until.expect("timeout") >= before + Duration::days(2));

    let resumed = harness
        .run(&waiting, RunOptions::respond("Si, confirmo"))
        .await;
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(output(&resumed, "send")["response_text"], "Si, confirmo");
    assert!(output(&resumed, "send")["responded_at"].is_string());
    assert_eq!(output(&resumed, "send")["channel"], "whatsapp");
    assert_eq!(output(&resumed, "await")["status"], "resumed");
    assert_eq!(output(&resumed, "await")["resume_mode"], "response");
    assert_eq!(output(&resumed, "check")["has_response"], true);
    assert_eq!(output(&resumed, "check")["response_text"], "Si, confirmo");
    assert_eq!(output(&resumed, "confirm")["new_status"], "confirmada");
    assert!(output(&resumed, "followup").is_null());

    let appointment = harness.clinic.snapshot().await.appointments[&11].clone();
    assert_eq!(appointment.status, "confirmada");
}

#[tokio::test]
async fn response_resume_without_text_takes_no_response_branch() {
    let harness = Harness::new(&[CONFIRMATION_FLOW]).await;
    harness.clinic.add_member(7, 100, "recepcion", None).await;
    let waiting = harness
        .start_and_run("appointment_confirmation", json!({}))
        .await;

    let resumed = harness
        .run(&waiting, RunOptions::resume(ResumeMode::Response))
        .await;
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(output(&resumed, "check")["has_response"], false);
    assert_eq!(output(&resumed, "followup")["assignees"], json!([100]));
}

#[tokio::test]
async fn wait_response_timeout_follows_on_timeout() {
    let harness = Harness::new(&[CONFIRMATION_FLOW]).await;
    harness.clinic.add_member(7, 100, "recepcion", None).await;
    harness.clinic.add_member(7, 101, "recepcion", Some("turno_tarde")).await;
    harness.clinic.add_member(7, 200, "doctor", None).await;
    harness.clinic.add_member(8, 300, "recepcion", None).await;
    let waiting = harness
        .start_and_run("appointment_confirmation", json!({}))
        .await;

    let early = harness
        .run(&waiting, RunOptions::resume(ResumeMode::Timeout))
        .await;
    assert_eq!(early.status, ExecutionStatus::Waiting);

    harness.expire_wait(&waiting).await;
    let resumed = harness
        .run(&waiting, RunOptions::resume(ResumeMode::Timeout))
        .await;
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert!(output(&resumed, "check").is_null());
    assert_eq!(output(&resumed, "followup")["notifications_created"], 2);
    assert_eq!(output(&resumed, "followup")["title"], "Llamar al paciente");

    let notifications = harness.clinic.snapshot().await.notifications;
    let users: Vec<i64> = notifications.iter().map(|n| n.user_id).collect();
    assert_eq!(users, vec![100, 101]);
    assert!(notifications.iter().all(|n| n.clinic_id == 7));
    assert_eq!(notifications[0].data["type"], "task");
    assert_eq!(notifications[0].data["node_id"], "followup");
}

#[tokio::test]
async fn open_ended_wait_response_parks_on_listener_only() {
    let harness = Harness::new(&[OPEN_ENDED_WAIT_FLOW]).await;
    let waiting = harness.start_and_run("open_ended_wait", json!({})).await;

    assert_eq!(waiting.status, ExecutionStatus::Waiting);
    assert!(waiting.wait_until.is_none());
    assert!(waiting.is_consistently_waiting());
    let meta = waiting.waiting_meta.clone().expect("waiting meta");
    assert_eq!(meta.listens_to_node_id.as_deref(), Some("await"));

    let resumed = harness.run(&waiting, RunOptions::respond("gracias")).await;
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(output(&resumed, "await")["response_text"], "gracias");
    assert_eq!(output(&resumed, "await")["status"], "resumed");
    assert_eq!(output(&resumed, "thanks")["channel"], "email");
}

#[tokio::test]
async fn wait_response_timeout_without_port_completes() {
    let harness = Harness::new(&[OPEN_ENDED_WAIT_FLOW]).await;
    let waiting = harness.start_and_run("open_ended_wait", json!({})).await;

    let resumed = harness
        .run(&waiting, RunOptions::resume(ResumeMode::Timeout))
        .await;
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert!(output(&resumed, "thanks").is_null());
}

#[tokio::test]
async fn wait_until_parks_until_resolved_timestamp() {
    let harness = Harness::new(&[WAIT_UNTIL_FLOW]).await;
    let waiting = harness
        .start_and_run(
            "wait_for_appointment",
            json!({"appointment": {"starts_at": "2030-01-15 09:30"}}),
        )
        .await;

    assert_eq!(waiting.status, ExecutionStatus::Waiting);
    assert_eq!(
        waiting.wait_until,
        Some(Utc.with_ymd_and_hms(2030, 1, 15, 9, 30, 0).unwrap())
    );
    assert_eq!(output(&waiting, "until")["resolved"], true);

    let early = harness
        .run(&waiting, RunOptions::resume(ResumeMode::Timeout))
        .await;
    assert_eq!(early.status, ExecutionStatus::Waiting);
}

#[tokio::test]
async fn unresolvable_wait_until_is_immediately_due() {
    let harness = Harness::new(&[WAIT_UNTIL_FLOW]).await;
    let waiting = harness
        .start_and_run("wait_for_appointment", json!({}))
        .await;

    assert_eq!(waiting.status, ExecutionStatus::Waiting);
    assert_eq!(output(&waiting, "until")["resolved"], false);
    assert!(waiting.wait_until.expect("wait_until") <= Utc::now());

    let resumed = harness
        .run(&waiting, RunOptions::resume(ResumeMode::Timeout))
        .await;
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(output(&resumed, "done")["status"], "success");
}

#[tokio::test]
async fn resuming_a_terminal_execution_is_a_noop() {
    let harness = Harness::new(&[WAIT_UNTIL_FLOW]).await;
    let waiting = harness
        .start_and_run("wait_for_appointment", json!({}))
        .await;
    let completed = harness
        .run(&waiting, RunOptions::resume(ResumeMode::Timeout))
        .await;
    assert_eq!(completed.status, ExecutionStatus::Completed);

    let again = harness
        .run(&completed, RunOptions::respond("hola"))
        .await;
    assert_eq!(again.status, ExecutionStatus::Completed);
    assert_eq!(again.updated_at, completed.updated_at);
    assert!(output(&again, "until")["response_text"].is_null());
    assert_eq!(harness.log_len(&again).await, 2);
}
