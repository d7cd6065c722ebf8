// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for configuration loading.

use std::io::Write;

use serialite_config::diagnostic::ConfigError;
use serialite_config::{
    SerialiteConfig, load_and_validate_path, load_and_validate_str, load_config_from_str,
};
use serialite_core::{ExecutionMode, OpenFlags, Status};

#[test]
fn full_toml_deserializes() {
    let toml = r#"
[connection]
mode = "serialize"
busy_timeout_ms = 2500
read_only = true

[backup]
retry_errors = ["BUSY"]
step_pages = 16

[runtime]
max_worker_threads = 2
thread_name = "db-worker"

[log]
level = "debug"
"#;

    let config = load_config_from_str(toml).expect("valid TOML should deserialize");
    assert_eq!(config.connection.mode, ExecutionMode::Serialize);
    assert_eq!(config.connection.busy_timeout_ms, 2500);
    assert!(config.connection.open_flags().contains(OpenFlags::READ_ONLY));
    assert_eq!(config.backup.retry_statuses(), Ok(vec![Status::BUSY]));
    assert_eq!(config.backup.step_pages, 16);
    assert_eq!(config.runtime.max_worker_threads, 2);
    assert_eq!(config.runtime.thread_name, "db-worker");
    assert_eq!(config.log.level, "debug");
}

#[test]
fn missing_sections_use_defaults() {
    let config = load_config_from_str("").expect("empty TOML should deserialize");
    assert_eq!(config, SerialiteConfig::default());
    assert_eq!(config.connection.mode, ExecutionMode::Parallel);
    assert_eq!(config.connection.busy_timeout_ms, 1000);
    assert!(config.connection.create);
    assert_eq!(config.backup.retry_errors, vec!["BUSY", "LOCKED"]);
    assert_eq!(config.backup.step_pages, 100);
    assert_eq!(config.runtime.max_worker_threads, 8);
    assert_eq!(config.log.level, "info");
}

#[test]
fn dotted_overrides_reach_nested_keys() {
    use figment::{Figment, providers::Serialized};

    let config: SerialiteConfig = Figment::new()
        .merge(Serialized::defaults(SerialiteConfig::default()))
        .merge(("backup.step_pages", 7))
        .merge(("connection.mode", "serialize"))
        .extract()
        .expect("dotted keys should merge");
    assert_eq!(config.backup.step_pages, 7);
    assert_eq!(config.connection.mode, ExecutionMode::Serialize);
}

#[test]
fn unknown_key_is_rejected_with_a_suggestion() {
    let toml = r#"
[connection]
busy_timout_ms = 10
"#;

    let errors = load_and_validate_str(toml).expect_err("unknown key should fail");
    match &errors[0] {
        ConfigError::UnknownKey {
            key,
            suggestion,
            valid_keys,
            span,
            ..
        } => {
            assert_eq!(key, "busy_timout_ms");
            assert_eq!(suggestion.as_deref(), Some("busy_timeout_ms"));
            assert!(valid_keys.contains("read_only"));
            assert!(span.is_some());
        }
        other => panic!("expected UnknownKey, got {other:?}"),
    }
}

#[test]
fn unknown_section_is_rejected() {
    let errors = load_and_validate_str("[storage]\npath = \"x\"\n").expect_err("should fail");
    assert!(matches!(&errors[0], ConfigError::UnknownKey { key, .. } if key == "storage"));
}

#[test]
fn wrong_type_is_reported() {
    let errors =
        load_and_validate_str("[runtime]\nmax_worker_threads = \"many\"\n").expect_err("should fail");
    assert!(matches!(
        &errors[0],
        ConfigError::InvalidType { key, .. } if key == "runtime.max_worker_threads"
    ));
}

#[test]
fn bad_status_name_fails_validation() {
    let toml = r#"
[backup]
retry_errors = ["BUSY", "SOMETIMES"]
"#;

    let errors = load_and_validate_str(toml).expect_err("unknown status should fail");
    assert!(errors.iter().any(|e| matches!(
        e,
        ConfigError::Validation { message } if message.contains("SOMETIMES")
    )));
}

#[test]
fn bad_mode_is_rejected() {
    assert!(load_and_validate_str("[connection]\nmode = \"sometimes\"\n").is_err());
}

#[test]
fn file_on_disk_is_loaded() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "[log]\nlevel = \"warn\"").expect("write config");

    let config = load_and_validate_path(file.path()).expect("file config should validate");
    assert_eq!(config.log.level, "warn");
}

#[test]
fn error_renders_with_miette() {
    use miette::{Diagnostic, GraphicalReportHandler};

    let error = ConfigError::UnknownKey {
        key: "levle".to_string(),
        suggestion: Some("level".to_string()),
        valid_keys: "level".to_string(),
        span: None,
        src: None,
    };
    assert!(error.code().is_some());
    let help = error.help().map(|h| h.to_string()).unwrap_or_default();
    assert!(help.contains("did you mean `level`"), "got: {help}");

    let mut buf = String::new();
    GraphicalReportHandler::new()
        .render_report(&mut buf, &error)
        .expect("should render");
    assert!(buf.contains("levle"));
}
