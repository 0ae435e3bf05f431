use chrono::Utc;
use clinic_flow::core::flow::clinic::{ClinicServices, InMemoryClinic};
use clinic_flow::core::flow::state::LogCompletion;
use clinic_flow::core::flow::store::file::ExecutionPaths;
use clinic_flow::core::flow::store::{
    ExecutionLogStore, ExecutionStore, FileExecutionLogStore, FileExecutionStore,
    FileTemplateStore, TemplateStore,
};
use clinic_flow::core::flow::{
    Execution, ExecutionLogEntry, ExecutionStatus, FlowEngine, LogStatus, RunOptions,
    TemplateVersion, Trigger,
};
use clinic_flow::core::EngineConfig;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

const CONFIRMATION_FLOW: &str = r#"
id: confirm_by_reply
entry_node_id: ask
nodes:
  - id: ask
    type: action/send_whatsapp
    config:
      to: "+34633333333"
    outputs:
      on_success: await
  - id: await
    type: delay/wait_response
    config:
      listens_to_node_id: ask
      timeout_duration: 3
      timeout_unit: hours
    outputs:
      on_response: check
  - id: check
    type: condition/response_check
    config:
      listens_to_node_id: ask
    outputs:
      on_response: confirm
  - id: confirm
    type: action/change_status
    config:
      new_status: confirmada
"#;

fn template(document: &str) -> TemplateVersion {
    serde_yaml::from_str(document).unwrap()
}

fn trigger() -> Trigger {
    Trigger {
        trigger_type: "appointment_created".to_string(),
        entity_type: Some("appointment".to_string()),
        entity_id: Some(21),
        clinic_id: Some(7),
        payload: json!({}),
    }
}

fn open_engine(workspace: &Path) -> (FlowEngine, Arc<InMemoryClinic>) {
    let clinic = Arc::new(InMemoryClinic::load(&workspace.join("clinic.json")).unwrap());
    let engine = FlowEngine::with_builtins(
        Arc::new(FileTemplateStore::new(workspace.join("templates"))),
        Arc::new(FileExecutionStore::new(workspace.join("state"))),
        Arc::new(FileExecutionLogStore::new(workspace.join("state"))),
        ClinicServices::from_backend(clinic.clone()),
        EngineConfig::default(),
    );
    (engine, clinic)
}

fn log_entry(execution_id: uuid::Uuid, step: u64, node_id: &str) -> ExecutionLogEntry {
    ExecutionLogEntry {
        id: 0,
        flow_execution_id: execution_id,
        step,
        node_id: node_id.to_string(),
        node_type: "action/api_call".to_string(),
        status: LogStatus::Running,
        started_at: Utc::now(),
        finished_at: None,
        error_message: None,
        audit_snapshot: Value::Null,
    }
}

#[tokio::test]
async fn execution_store_round_trips_and_lists_by_creation() {
    let dir = tempdir().unwrap();
    let store = FileExecutionStore::new(dir.path());
    let flow = template(CONFIRMATION_FLOW);

    let first = Execution::start(&flow, trigger());
    let mut second = Execution::start(&flow, trigger());
    second.created_at = first.created_at + chrono::Duration::seconds(5);
    store.create(&second).await.unwrap();
    store.create(&first).await.unwrap();

    let paths = ExecutionPaths::new(dir.path(), &first.id);
    assert!(paths.execution_file.is_file());
    assert!(!paths.execution_file.with_extension("tmp").exists());

    let loaded = store.load(first.id).await.unwrap();
    assert_eq!(loaded.id, first.id);
    assert_eq!(loaded.current_node_id.as_deref(), Some("ask"));
    assert_eq!(loaded.context["trigger"]["entity_id"], 21);

    let listed: Vec<_> = store.list().await.unwrap().iter().map(|e| e.id).collect();
    assert_eq!(listed, vec![first.id, second.id]);

    let duplicate = store.create(&first).await.unwrap_err();
    assert_eq!(duplicate.code, "FLOW-STORE-409");

    let missing = store.load(uuid::Uuid::new_v4()).await.unwrap_err();
    assert_eq!(missing.code, "FLOW-STORE-404");
}

#[tokio::test]
async fn log_store_persists_entries_across_instances() {
    let dir = tempdir().unwrap();
    let execution_id = uuid::Uuid::new_v4();

    let store = FileExecutionLogStore::new(dir.path());
    let first = store.open_entry(log_entry(execution_id, 1, "a")).await.unwrap();
    let second = store.open_entry(log_entry(execution_id, 2, "b")).await.unwrap();
    assert_eq!((first.id, second.id), (1, 2));
    store
        .close_entry(
            execution_id,
            first.id,
            LogCompletion {
                status: LogStatus::Success,
                finished_at: Utc::now(),
                error_message: None,
                audit_snapshot: json!({"duration_ms": 3}),
            },
        )
        .await
        .unwrap();

    let reopened = FileExecutionLogStore::new(dir.path());
    let entries = reopened.entries(execution_id).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].status, LogStatus::Success);
    assert_eq!(entries[0].audit_snapshot["duration_ms"], 3);
    assert_eq!(entries[1].status, LogStatus::Running);

    let step_two = reopened.entry_for_step(execution_id, 2).await.unwrap();
    assert_eq!(step_two.map(|entry| entry.node_id), Some("b".to_string()));
    assert!(reopened.entry_for_step(execution_id, 3).await.unwrap().is_none());

    let err = reopened
        .close_entry(
            execution_id,
            42,
            LogCompletion {
                status: LogStatus::Error,
                finished_at: Utc::now(),
                error_message: Some("boom".to_string()),
                audit_snapshot: Value::Null,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, "FLOW-STORE-404");
}

#[tokio::test]
async fn template_store_resolves_files_by_id() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("confirm_by_reply.yml"), CONFIRMATION_FLOW).unwrap();
    fs::write(
        dir.path().join("mislabelled.yaml"),
        "id: something_else\nentry_node_id: a\nnodes:\n  - id: a\n    type: action/api_call\n",
    )
    .unwrap();
    let store = FileTemplateStore::new(dir.path());

    let loaded = store.get_template_version("confirm_by_reply").await.unwrap();
    assert_eq!(loaded.nodes.len(), 4);

    // Cached versions survive removal of the backing file.
    fs::remove_file(dir.path().join("confirm_by_reply.yml")).unwrap();
    let cached = store.get_template_version("confirm_by_reply").await.unwrap();
    assert!(Arc::ptr_eq(&loaded, &cached));

    let mismatch = store.get_template_version("mislabelled").await.unwrap_err();
    assert!(mismatch.message.contains("declares id 'something_else'"));

    let traversal = store.get_template_version("../secrets").await.unwrap_err();
    assert!(traversal.message.contains("invalid characters"));

    let missing = store.get_template_version("nope").await.unwrap_err();
    assert_eq!(missing.code, "FLOW-STORE-404");
}

#[tokio::test]
async fn waiting_execution_resumes_in_a_fresh_engine() {
    let workspace = tempdir().unwrap();
    fs::create_dir_all(workspace.path().join("templates")).unwrap();
    fs::write(
        workspace.path().join("templates").join("confirm_by_reply.yaml"),
        CONFIRMATION_FLOW,
    )
    .unwrap();

    let execution_id = {
        let (engine, clinic) = open_engine(workspace.path());
        clinic.insert_appointment(21, "pendiente").await;
        let execution = engine.start_execution("confirm_by_reply", trigger()).await.unwrap();
        let waiting = engine
            .run_execution(execution.id, RunOptions::default())
            .await
            .unwrap();
        assert_eq!(waiting.status, ExecutionStatus::Waiting);
        clinic.save(&workspace.path().join("clinic.json")).await.unwrap();
        execution.id
    };

    let (engine, clinic) = open_engine(workspace.path());
    let stored = engine.executions().load(execution_id).await.unwrap();
    assert_eq!(stored.status, ExecutionStatus::Waiting);
    assert!(stored.is_consistently_waiting());

    let resumed = engine
        .run_execution(execution_id, RunOptions::respond("confirmo"))
        .await
        .unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(resumed.step_count, 4);
    assert_eq!(
        clinic.snapshot().await.appointments[&21].status,
        "confirmada"
    );

    let log = engine.logs().entries(execution_id).await.unwrap();
    let nodes: Vec<&str> = log.iter().map(|entry| entry.node_id.as_str()).collect();
    assert_eq!(nodes, vec!["ask", "await", "check", "confirm"]);
    assert!(log.iter().all(|entry| entry.status == LogStatus::Success));
}

#[tokio::test]
async fn missing_clinic_fixture_starts_empty() {
    let dir = tempdir().unwrap();
    let clinic = InMemoryClinic::load(&dir.path().join("absent.json")).unwrap();
    let snapshot = clinic.snapshot().await;
    assert!(snapshot.appointments.is_empty());
    assert!(snapshot.members.is_empty());
}
