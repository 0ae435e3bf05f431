use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const REMINDER_FLOW: &str = r#"
id: reminder
entry_node_id: confirm
nodes:
  - id: confirm
    type: action/change_status
    config:
      new_status: confirmada
    outputs:
      on_success: wait
  - id: wait
    type: delay/fixed
    config:
      duration: 1
      unit: days
    outputs:
      on_complete: remind
  - id: remind
    type: action/send_whatsapp
"#;

const BROKEN_FLOW: &str = r#"
id: broken
entry_node_id: nowhere
nodes:
  - id: a
    type: action/api_call
"#;

const CLINIC_FIXTURE: &str = r#"{
  "appointments": {"31": {"status": "pendiente"}}
}"#;

fn clinic_flow(workspace: &Path) -> Command {
    let mut cmd = Command::cargo_bin("clinic-flow").unwrap();
    cmd.arg("--workspace").arg(workspace);
    cmd.env("CLINIC_FLOW_BATCH", "1");
    cmd
}

fn setup_workspace(workspace: &Path) {
    fs::create_dir_all(workspace.join("templates")).unwrap();
    fs::write(workspace.join("templates/reminder.yaml"), REMINDER_FLOW).unwrap();
    fs::create_dir_all(workspace.join(".clinic-flow")).unwrap();
    fs::write(workspace.join(".clinic-flow/clinic.json"), CLINIC_FIXTURE).unwrap();
}

fn stdout_json(output: std::process::Output) -> Value {
    assert!(output.status.success(), "{:?}", output);
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

#[test]
fn test_subcommand_help() {
    let cases = [
        ("start", "Create an execution from a template"),
        ("run", "Run or resume an execution"),
        ("show", "Print an execution and its node log"),
        ("validate", "Check a template document"),
    ];
    for (subcommand, expected) in cases {
        let mut cmd = Command::cargo_bin("clinic-flow").unwrap();
        cmd.arg(subcommand).arg("-h");
        cmd.assert()
            .success()
            .stdout(predicate::str::contains(expected));
    }
}

#[test]
fn test_validate_accepts_and_rejects_templates() {
    let workspace = tempdir().unwrap();
    setup_workspace(workspace.path());
    fs::write(workspace.path().join("broken.yaml"), BROKEN_FLOW).unwrap();

    clinic_flow(workspace.path())
        .arg("validate")
        .arg(workspace.path().join("templates/reminder.yaml"))
        .assert()
        .success()
        .stdout(predicate::str::contains("template 'reminder' is valid (3 nodes"));

    clinic_flow(workspace.path())
        .arg("validate")
        .arg(workspace.path().join("broken.yaml"))
        .assert()
        .failure()
        .stdout(predicate::str::contains("error: entry_node_id 'nowhere'"));
}

#[test]
fn test_response_text_requires_resume() {
    let workspace = tempdir().unwrap();
    clinic_flow(workspace.path())
        .args([
            "run",
            "6f1c2a4e-8a53-4c1d-9a43-1f8b2c7d9e10",
            "--response-text",
            "hola",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--resume"));
}

#[test]
fn test_start_run_show_lifecycle() {
    let workspace = tempdir().unwrap();
    setup_workspace(workspace.path());

    let started = clinic_flow(workspace.path())
        .args([
            "start",
            "--template",
            "reminder",
            "--trigger-type",
            "appointment_created",
            "--entity-type",
            "appointment",
            "--entity-id",
            "31",
            "--clinic-id",
            "7",
        ])
        .output()
        .unwrap();
    assert!(started.status.success(), "{:?}", started);
    let execution_id = String::from_utf8(started.stdout).unwrap().trim().to_string();
    assert_eq!(execution_id.len(), 36);

    let waiting = stdout_json(
        clinic_flow(workspace.path())
            .args(["run", execution_id.as_str()])
            .output()
            .unwrap(),
    );
    assert_eq!(waiting["status"], "waiting");
    assert_eq!(waiting["current_node_id"], "wait");
    assert_eq!(waiting["step_count"], 2);

    let fixture = fs::read_to_string(workspace.path().join(".clinic-flow/clinic.json")).unwrap();
    let fixture: Value = serde_json::from_str(&fixture).unwrap();
    assert_eq!(fixture["appointments"]["31"]["status"], "confirmada");

    let early = stdout_json(
        clinic_flow(workspace.path())
            .args(["run", execution_id.as_str(), "--resume", "timeout"])
            .output()
            .unwrap(),
    );
    assert_eq!(early["status"], "waiting");

    let shown = stdout_json(
        clinic_flow(workspace.path())
            .args(["show", execution_id.as_str()])
            .output()
            .unwrap(),
    );
    assert_eq!(shown["execution"]["id"], execution_id.as_str());
    assert_eq!(shown["log"].as_array().map(Vec::len), Some(2));
    assert_eq!(shown["log"][0]["node_id"], "confirm");
    assert_eq!(
        shown["log"][0]["audit_snapshot"]["outcome"]["output"]["previous_status"],
        "pendiente"
    );

    assert!(workspace
        .path()
        .join(".clinic-flow/state/executions")
        .join(&execution_id)
        .join("log.json")
        .is_file());
}

#[test]
fn test_unknown_template_fails_start() {
    let workspace = tempdir().unwrap();
    setup_workspace(workspace.path());
    clinic_flow(workspace.path())
        .args(["start", "--template", "missing", "--trigger-type", "manual"])
        .assert()
        .failure();
}

#[test]
fn test_zero_step_budget_is_rejected() {
    let workspace = tempdir().unwrap();
    clinic_flow(workspace.path())
        .args([
            "run",
            "6f1c2a4e-8a53-4c1d-9a43-1f8b2c7d9e10",
            "--max-steps",
            "0",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("step budget must be at least 1"));
}

#[test]
fn test_failed_run_still_saves_clinic_changes() {
    let workspace = tempdir().unwrap();
    setup_workspace(workspace.path());

    let started = clinic_flow(workspace.path())
        .args([
            "start",
            "--template",
            "reminder",
            "--trigger-type",
            "appointment_created",
            "--entity-type",
            "appointment",
            "--entity-id",
            "31",
        ])
        .output()
        .unwrap();
    assert!(started.status.success(), "{:?}", started);
    let execution_id = String::from_utf8(started.stdout).unwrap().trim().to_string();

    // A directory in place of the temp file makes persisting the first step fail.
    let execution_dir = workspace
        .path()
        .join(".clinic-flow/state/executions")
        .join(&execution_id);
    fs::create_dir_all(execution_dir.join("execution.tmp")).unwrap();

    clinic_flow(workspace.path())
        .args(["run", execution_id.as_str()])
        .assert()
        .failure();

    let fixture = fs::read_to_string(workspace.path().join(".clinic-flow/clinic.json")).unwrap();
    let fixture: Value = serde_json::from_str(&fixture).unwrap();
    assert_eq!(fixture["appointments"]["31"]["status"], "confirmada");
}
