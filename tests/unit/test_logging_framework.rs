use clap::Parser;
use clinic_flow::cli::Args;
use clinic_flow::logging::config::{LoggingConfig, LOG_DIR_ENV};
use clinic_flow::logging::context::BATCH_ENV;
use clinic_flow::logging::layers::{console, file};
use clinic_flow::logging::{detect_context, ConsoleOutput, ExecutionContext};
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::tempdir;

const EXECUTION_ID: &str = "6f1c2a4e-8a53-4c1d-9a43-1f8b2c7d9e10";

fn command_lines() -> Vec<Vec<&'static str>> {
    vec![
        vec![
            "clinic-flow",
            "start",
            "--template",
            "lead_followup",
            "--trigger-type",
            "lead_created",
        ],
        vec!["clinic-flow", "run", EXECUTION_ID],
        vec!["clinic-flow", "run", EXECUTION_ID, "--resume", "timeout"],
        vec!["clinic-flow", "show", EXECUTION_ID],
        vec!["clinic-flow", "validate", "templates/lead_followup.yaml"],
    ]
}

fn write_logging_toml(workspace: &std::path::Path, content: &str) {
    let path = LoggingConfig::config_path(workspace);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
#[serial]
fn context_is_local_dev_without_batch_override() {
    env::remove_var(BATCH_ENV);
    for args in command_lines() {
        let parsed = Args::parse_from(args);
        assert_eq!(detect_context(&parsed.command), ExecutionContext::LocalDev);
    }
}

#[test]
#[serial]
fn batch_override_maps_everything_but_validate() {
    env::set_var(BATCH_ENV, "1");
    let contexts: Vec<ExecutionContext> = command_lines()
        .into_iter()
        .map(|args| detect_context(&Args::parse_from(args).command))
        .collect();
    env::remove_var(BATCH_ENV);

    assert_eq!(
        contexts,
        vec![
            ExecutionContext::Batch,
            ExecutionContext::Batch,
            ExecutionContext::Batch,
            ExecutionContext::Batch,
            ExecutionContext::LocalDev,
        ]
    );
}

#[test]
#[serial]
fn workspace_logging_toml_is_applied() {
    env::remove_var(LOG_DIR_ENV);
    let workspace = tempdir().unwrap();
    write_logging_toml(
        workspace.path(),
        r#"
[logging]
default_level = "clinic_flow=debug"
enable_file = false
console_output = "stdout"
"#,
    );

    let config = LoggingConfig::load(Some(workspace.path())).unwrap();
    assert_eq!(config.default_level, "clinic_flow=debug");
    assert!(!config.enable_file);
    assert_eq!(config.console_output, Some(ConsoleOutput::Stdout));
    assert!(config.log_dir.is_none());
}

#[test]
#[serial]
fn invalid_level_is_rejected() {
    env::remove_var(LOG_DIR_ENV);
    let workspace = tempdir().unwrap();
    write_logging_toml(workspace.path(), "[logging]\ndefault_level = \"=&!\"\n");
    assert!(LoggingConfig::load(Some(workspace.path())).is_err());
}

#[test]
#[serial]
fn env_override_relocates_log_dir() {
    let workspace = tempdir().unwrap();
    let elsewhere = tempdir().unwrap();
    write_logging_toml(workspace.path(), "[logging]\nlog_dir = \"custom-logs\"\n");

    env::set_var(LOG_DIR_ENV, elsewhere.path());
    let config = LoggingConfig::load(Some(workspace.path())).unwrap();
    env::remove_var(LOG_DIR_ENV);

    assert_eq!(config.log_dir.as_deref(), Some(elsewhere.path()));
    let path = file::log_file_path(&config, Some(workspace.path())).unwrap();
    assert_eq!(path, elsewhere.path().join("clinic-flow.log"));
}

#[test]
#[serial]
fn default_log_file_lives_under_workspace() {
    env::remove_var(LOG_DIR_ENV);
    let workspace = tempdir().unwrap();
    let config = LoggingConfig::load(Some(workspace.path())).unwrap();

    let path = file::log_file_path(&config, Some(workspace.path())).unwrap();
    assert!(path.ends_with(".clinic-flow/logs/clinic-flow.log"));
    assert!(path.starts_with(workspace.path().canonicalize().unwrap()));
}

#[test]
fn relative_log_dir_cannot_escape_workspace() {
    let workspace = tempdir().unwrap();
    let inside = LoggingConfig {
        log_dir: Some("logs/flows".into()),
        ..LoggingConfig::default()
    };
    let path = file::log_file_path(&inside, Some(workspace.path())).unwrap();
    assert!(path.ends_with("logs/flows/clinic-flow.log"));

    let outside = LoggingConfig {
        log_dir: Some("../../elsewhere".into()),
        ..LoggingConfig::default()
    };
    assert!(file::log_file_path(&outside, Some(workspace.path())).is_err());
}

#[test]
fn console_output_selection() {
    assert_eq!(
        console::select_console_output(ExecutionContext::LocalDev, None),
        ConsoleOutput::Stderr
    );
    assert_eq!(
        console::select_console_output(ExecutionContext::LocalDev, Some(ConsoleOutput::Stdout)),
        ConsoleOutput::Stdout
    );
    assert_eq!(
        console::select_console_output(ExecutionContext::Batch, Some(ConsoleOutput::Stdout)),
        ConsoleOutput::None
    );
    assert!("loud".parse::<ConsoleOutput>().is_err());
}

#[test]
#[serial]
fn init_creates_log_file_and_guards_reinitialization() {
    env::remove_var(LOG_DIR_ENV);
    env::remove_var(BATCH_ENV);
    let workspace = tempdir().unwrap();
    let workspace_arg = workspace.path().to_string_lossy().to_string();
    let args = Args::parse_from([
        "clinic-flow",
        "--workspace",
        workspace_arg.as_str(),
        "show",
        EXECUTION_ID,
    ]);

    clinic_flow::logging::reset_for_tests();
    let guard = clinic_flow::logging::init(&args).unwrap();
    assert_eq!(guard.console_output(), ConsoleOutput::Stderr);
    assert!(guard.log_file_path().exists());
    assert!(guard.log_file_path().ends_with("clinic-flow.log"));

    let second = clinic_flow::logging::init(&args);
    assert!(second.is_err());
}
