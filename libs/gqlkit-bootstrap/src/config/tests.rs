use super::*;
use crate::AppConfigProvider;
use gqlkit::{ConfigProvider, ResolverConflictPolicy};
use std::fs;
use tempfile::tempdir;

fn write_config(dir: &Path, yaml: &str) -> std::path::PathBuf {
    let path = dir.join("config.yaml");
    fs::write(&path, yaml).unwrap();
    path
}

#[test]
fn default_config_structure() {
    let config = AppConfig::default();

    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 8087);
    assert_eq!(config.server.home_dir, "");
    assert_eq!(config.server.shutdown_timeout_sec, 10);

    let logging = config.logging.as_ref().unwrap();
    assert_eq!(logging["default"].console_level, "info");
    assert_eq!(logging["default"].file, "logs/wellspring.log");

    assert!(config.graphql.introspection);
    assert!(config.modules.is_empty());
}

#[test]
fn layered_loading_reads_yaml_sections() {
    let tmp = tempdir().unwrap();
    let home = tmp.path().join("home");
    let yaml = format!(
        r#"
server:
  home_dir: "{}"
  host: "0.0.0.0"
  port: 9090

graphql:
  resolver_conflicts: reject
  max_depth: 12
  scalars:
    - name: DateTime
      description: "RFC 3339 timestamp"

modules:
  user:
    seed:
      - email: "ada@example.com"
"#,
        home.to_string_lossy().replace('\\', "/")
    );
    let path = write_config(tmp.path(), &yaml);

    let config = AppConfig::load_layered(&path).unwrap();

    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 9090);
    assert!(Path::new(&config.server.home_dir).is_absolute());
    assert!(home.is_dir());

    assert_eq!(config.graphql.resolver_conflicts, ResolverConflictPolicy::Reject);
    assert_eq!(config.graphql.max_depth, Some(12));
    assert_eq!(config.graphql.scalars[0].name, "DateTime");
    assert!(config.logging.is_none());

    assert_eq!(config.modules["user"]["seed"][0]["email"], "ada@example.com");
}

#[test]
fn unknown_sections_are_rejected() {
    let tmp = tempdir().unwrap();
    let path = write_config(
        tmp.path(),
        r#"
server:
  host: "127.0.0.1"
  port: 8087
database:
  url: "sqlite://nope"
"#,
    );
    assert!(AppConfig::load_layered(&path).is_err());
}

#[test]
fn modules_dir_files_are_merged() {
    let tmp = tempdir().unwrap();
    let modules_dir = tmp.path().join("modules");
    fs::create_dir_all(&modules_dir).unwrap();
    fs::write(
        modules_dir.join("habit.yaml"),
        "default_frequency: WEEKLY\n",
    )
    .unwrap();
    fs::write(modules_dir.join("notes.txt"), "ignored").unwrap();

    let yaml = format!(
        r#"
server:
  home_dir: "{}"
  host: "127.0.0.1"
  port: 8087
modules_dir: "{}"
modules:
  user:
    key: "value"
"#,
        tmp.path().join("home").to_string_lossy().replace('\\', "/"),
        modules_dir.to_string_lossy().replace('\\', "/")
    );
    let path = write_config(tmp.path(), &yaml);
    let config = AppConfig::load_layered(&path).unwrap();

    assert_eq!(config.modules["user"]["key"], "value");
    assert_eq!(config.modules["habit"]["default_frequency"], "WEEKLY");
    assert!(!config.modules.contains_key("notes"));
}

#[test]
fn cli_overrides_apply() {
    for (verbose, expected) in [(0, "info"), (1, "debug"), (2, "trace"), (5, "trace")] {
        let mut config = AppConfig::default();
        config.apply_cli_overrides(&CliArgs {
            port: Some(3000),
            verbose,
            no_introspection: true,
            ..CliArgs::default()
        });

        assert_eq!(config.server.port, 3000);
        assert!(!config.graphql.introspection);
        let logging = config.logging.as_ref().unwrap();
        assert_eq!(logging["default"].console_level, expected);
    }
}

#[test]
fn to_yaml_roundtrip() {
    let config = AppConfig::default();
    let yaml = config.to_yaml().unwrap();
    assert!(yaml.contains("server:"));
    assert!(yaml.contains("graphql:"));

    let back: AppConfig = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(back.server.port, config.server.port);
    assert_eq!(back.graphql, config.graphql);
}

#[test]
fn provider_exposes_module_bags() {
    let mut config = AppConfig::default();
    config
        .modules
        .insert("user".into(), serde_json::json!({"seed": []}));
    let provider = AppConfigProvider::new(config);

    assert!(provider.get_module_config("user").is_some());
    assert!(provider.get_module_config("habit").is_none());
}
