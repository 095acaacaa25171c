use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;

use agent_turn::config::{InterruptPolicy, RuntimeConfig};
use agent_turn::error::TurnError;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn file_values_are_layered_over_defaults_then_env() {
    let file = write_config(
        r#"
approval_ttl_ms = 5000
max_depth = 4
interrupt_policy = "keep_queued"
"#,
    );
    let mut config = RuntimeConfig::load(file.path()).unwrap();
    assert_eq!(config.approval_ttl(), Duration::from_secs(5));
    assert_eq!(config.max_depth, 4);
    assert_eq!(config.interrupt_policy, InterruptPolicy::KeepQueued);
    assert_eq!(config.frontend_tool_ttl_ms, RuntimeConfig::default().frontend_tool_ttl_ms);

    let env: HashMap<&str, &str> = HashMap::from([
        ("AGENT_TURN_MAX_DEPTH", "2"),
        ("AGENT_TURN_INTERRUPT_POLICY", "discard_queued"),
        ("AGENT_TURN_RETENTION_MS", " 1500 "),
    ]);
    config
        .apply_env_with(|key| env.get(key).map(|value| value.to_string()))
        .unwrap();
    assert_eq!(config.max_depth, 2);
    assert_eq!(config.interrupt_policy, InterruptPolicy::DiscardQueued);
    assert_eq!(config.sub_agent_retention(), Duration::from_millis(1_500));
    assert_eq!(config.approval_ttl_ms, 5_000);
}

#[test]
fn invalid_files_are_configuration_errors() {
    let file = write_config("max_wait_timeout_ms = 10\ndefault_wait_timeout_ms = 20\n");
    assert!(matches!(
        RuntimeConfig::load(file.path()),
        Err(TurnError::Configuration(_))
    ));

    let file = write_config("max_depth = \"deep\"\n");
    assert!(matches!(
        RuntimeConfig::load(file.path()),
        Err(TurnError::Configuration(_))
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = RuntimeConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, TurnError::Io(_)));
}

#[test]
fn bad_env_value_names_the_variable() {
    let mut config = RuntimeConfig::default();
    let err = config
        .apply_env_with(|key| (key == "AGENT_TURN_APPROVAL_TTL_MS").then(|| "soon".to_string()))
        .unwrap_err();
    assert!(err.to_string().contains("AGENT_TURN_APPROVAL_TTL_MS"));
}

#[test]
fn serialized_config_loads_back() {
    let config = RuntimeConfig {
        shutdown_grace_ms: 250,
        interrupt_policy: InterruptPolicy::KeepQueued,
        ..RuntimeConfig::default()
    };
    let file = write_config(&config.to_toml_string().unwrap());
    assert_eq!(RuntimeConfig::load(file.path()).unwrap(), config);
}
