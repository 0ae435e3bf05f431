use clinic_flow::core::config::loader::CONFIG_FILE_NAME;
use clinic_flow::core::config::{ConfigLoader, FlowConfig};
use serial_test::serial;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn clear_flow_env() {
    for v in &[
        "CLINIC_FLOW_MAX_STEPS",
        "CLINIC_FLOW_MEMBER_BATCH_LIMIT",
        "CLINIC_FLOW_STATE_DIR",
        "CLINIC_FLOW_TEMPLATES_DIR",
    ] {
        env::remove_var(v);
    }
}

#[test]
#[serial]
fn test_missing_config_file_uses_defaults() {
    clear_flow_env();
    let temp_dir = TempDir::new().unwrap();

    let config = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap();
    assert_eq!(config.engine.max_steps, 100);
    assert_eq!(config.engine.member_batch_limit, 50);
    assert_eq!(config.storage.templates_dir, PathBuf::from("templates"));
}

#[test]
#[serial]
fn test_config_file_values_are_loaded() {
    clear_flow_env();
    let temp_dir = TempDir::new().unwrap();
    let config_content = r#"
[engine]
max_steps = 40
member_batch_limit = 5
note_timestamp_format = "%d/%m/%Y"

[storage]
state_dir = "var/flows"
templates_dir = "/srv/clinic/templates"
clinic_fixture = "fixtures/clinic.json"
"#;
    fs::write(temp_dir.path().join(CONFIG_FILE_NAME), config_content).unwrap();

    let config = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap();
    assert_eq!(config.engine.max_steps, 40);
    assert_eq!(config.engine.member_batch_limit, 5);
    assert_eq!(config.engine.note_timestamp_format, "%d/%m/%Y");
    assert_eq!(config.storage.state_dir, PathBuf::from("var/flows"));

    assert_eq!(
        ConfigLoader::resolve_path(temp_dir.path(), &config.storage.state_dir),
        temp_dir.path().join("var/flows")
    );
    assert_eq!(
        ConfigLoader::resolve_path(temp_dir.path(), &config.storage.templates_dir),
        PathBuf::from("/srv/clinic/templates")
    );
}

#[test]
#[serial]
fn test_env_overrides_take_precedence() {
    clear_flow_env();
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join(CONFIG_FILE_NAME),
        "[engine]\nmax_steps = 40\n",
    )
    .unwrap();

    env::set_var("CLINIC_FLOW_MAX_STEPS", "7");
    env::set_var("CLINIC_FLOW_MEMBER_BATCH_LIMIT", "not-a-number");
    env::set_var("CLINIC_FLOW_STATE_DIR", "/tmp/flow-state");
    env::set_var("CLINIC_FLOW_TEMPLATES_DIR", "shared/templates");

    let config = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap();
    clear_flow_env();

    assert_eq!(config.engine.max_steps, 7);
    assert_eq!(config.engine.member_batch_limit, 50);
    assert_eq!(config.storage.state_dir, Path::new("/tmp/flow-state"));
    assert_eq!(config.storage.templates_dir, Path::new("shared/templates"));
}

#[test]
#[serial]
fn test_invalid_values_are_rejected() {
    clear_flow_env();
    let cases = [
        "[engine]\nmax_steps = 0\n",
        "[engine]\nmember_batch_limit = 0\n",
        "[engine]\nnote_timestamp_format = \"  \"\n",
        "[engine]\nnote_timestamp_format = \"%Y-%Q\"\n",
        "[storage]\nstate_dir = \"\"\n",
        "[engine\nmax_steps = 3\n",
    ];

    for content in cases {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(CONFIG_FILE_NAME), content).unwrap();
        assert!(
            ConfigLoader::load_from_workspace(temp_dir.path()).is_err(),
            "expected rejection for {:?}",
            content
        );
    }
}

#[test]
fn test_validate_default_config() {
    assert!(ConfigLoader::validate_config(&FlowConfig::default()).is_ok());
    assert_eq!(ConfigLoader::env_var_documentation().len(), 4);
}
