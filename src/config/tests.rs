//! Tests for config functionality.

use super::model::default_runners;
use crate::config::{Config, RunnerClass};
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn test_default_config() {
    let config = Config::default();

    assert_eq!(config.prefix, PathBuf::from("/var/lib/qmaster"));
    assert_eq!(config.runner_command, "bin/qrunner -s");
    assert_eq!(config.runners.len(), 8);
    assert!(config.runners.iter().all(|r| r.count == 1));
    assert_eq!(config.max_restarts, 10);
    assert_eq!(config.user, "mailman");
    assert_eq!(config.group, "mailman");
    assert_eq!(config.lock_lifetime(), Duration::from_secs(108_000));
    assert_eq!(config.lock_refresh(), Duration::from_secs(86_400));
    assert_eq!(config.lock_timeout(), Duration::from_millis(100));
    config.validate().unwrap();
}

#[test]
fn test_parse_minimal_yaml() {
    let config = Config::from_yaml("").unwrap();

    // Should use all defaults
    assert_eq!(config.runners, default_runners());
    assert_eq!(config.max_restarts, 10);
}

#[test]
fn test_parse_partial_yaml() {
    let yaml = r#"
prefix: /opt/mail
runners:
  - name: OutgoingRunner
    count: 4
  - name: IncomingRunner
max_restarts: 3
"#;
    let config = Config::from_yaml(yaml).unwrap();

    assert_eq!(config.prefix, PathBuf::from("/opt/mail"));
    assert_eq!(
        config.runners,
        vec![
            RunnerClass::new("OutgoingRunner", 4),
            RunnerClass::new("IncomingRunner", 1),
        ]
    );
    assert_eq!(config.max_restarts, 3);

    // Unspecified values should use defaults
    assert_eq!(config.user, "mailman");
    assert_eq!(config.lock_timeout_ms, 100);
}

#[test]
fn test_parse_yaml_with_unknown_fields() {
    let yaml = r#"
max_restarts: 5
unknown_field: "some value"
another_unknown:
  nested: true
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.max_restarts, 5);
}

#[test]
fn test_relative_paths_resolve_against_prefix() {
    let config = Config::from_yaml("prefix: /opt/mail\npid_file: /run/qmaster.pid").unwrap();

    assert_eq!(
        config.lock_path(),
        PathBuf::from("/opt/mail/locks/master-qrunner")
    );
    assert_eq!(config.log_path(), PathBuf::from("/opt/mail/logs/qrunner"));
    assert_eq!(config.pid_path(), PathBuf::from("/run/qmaster.pid"));
}

#[test]
fn test_runner_argv_resolves_program() {
    let yaml = "prefix: /opt/mail\nrunner_command: \"bin/qrunner -s --verbose\"";
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(
        config.runner_argv().unwrap(),
        vec!["/opt/mail/bin/qrunner", "-s", "--verbose"]
    );

    let on_path = Config::from_yaml("runner_command: qrunner").unwrap();
    assert_eq!(on_path.runner_argv().unwrap(), vec!["qrunner"]);
}

#[test]
fn test_validate_empty_runner_command() {
    let err = Config::from_yaml("runner_command: \"\"").unwrap_err();
    assert!(err.to_string().contains("runner_command must not be empty"));
}

#[test]
fn test_validate_unbalanced_runner_command() {
    let err = Config::from_yaml("runner_command: \"bin/qrunner 'oops\"").unwrap_err();
    assert!(err.to_string().contains("failed to parse runner_command"));
}

#[test]
fn test_validate_runner_names() {
    let err = Config::from_yaml("runners:\n  - name: \"Out:going\"").unwrap_err();
    assert!(err.to_string().contains("must not contain ':'"));

    let err = Config::from_yaml("runners:\n  - name: \"\"").unwrap_err();
    assert!(err.to_string().contains("non-empty"));
}

#[test]
fn test_validate_zero_count() {
    let err = Config::from_yaml("runners:\n  - name: OutgoingRunner\n    count: 0").unwrap_err();
    assert!(err.to_string().contains("count must be greater than 0"));
}

#[test]
fn test_validate_refresh_shorter_than_lifetime() {
    let err = Config::from_yaml("lock_refresh_secs: 0").unwrap_err();
    assert!(err.to_string().contains("lock_refresh_secs must be greater than 0"));

    let err = Config::from_yaml("lock_refresh_secs: 100\nlock_lifetime_secs: 100").unwrap_err();
    assert!(err.to_string().contains("must be less than lock_lifetime_secs"));
}

#[test]
fn test_validate_relative_prefix() {
    let err = Config::from_yaml("prefix: var/lib/qmaster").unwrap_err();
    assert!(err.to_string().contains("prefix 'var/lib/qmaster' must be an absolute path"));

    let err = Config::from_yaml("prefix: \"\"").unwrap_err();
    assert!(err.to_string().contains("must be an absolute path"));
}

#[test]
fn test_validate_duration_limits() {
    let err = Config::from_yaml("lock_lifetime_secs: 18446744073709551615").unwrap_err();
    assert!(err.to_string().contains("lock_lifetime_secs (18446744073709551615) must not exceed"));

    let err = Config::from_yaml("lock_timeout_ms: 18446744073709551615").unwrap_err();
    assert!(err.to_string().contains("lock_timeout_ms (18446744073709551615) must not exceed"));

    let config =
        Config::from_yaml("lock_lifetime_secs: 315360000\nlock_timeout_ms: 86400000").unwrap();
    assert_eq!(config.lock_lifetime(), Duration::from_secs(315_360_000));
}

#[test]
fn test_config_load_from_file() {
    use std::io::Write;
    use tempfile::NamedTempFile;

    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "max_restarts: 7").unwrap();
    writeln!(file, "user: list").unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.max_restarts, 7);
    assert_eq!(config.user, "list");

    let resolved = Config::resolve(Some(file.path())).unwrap();
    assert_eq!(resolved.max_restarts, 7);
}

#[test]
fn test_config_load_missing_file() {
    let err = Config::load("/nonexistent/path/qmaster.yaml").unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));
}
