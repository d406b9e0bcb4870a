use shovel::config::{generate::generate_starter_config, load_config, ConfigError, WatchMode};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_generated_config_is_valid() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    fs::write(&config_path, generate_starter_config()).unwrap();

    let config = load_config(&config_path).expect("Generated config should be valid");

    assert_eq!(config.source.watch, WatchMode::Events);
    assert_eq!(config.source.event_timeout, Duration::from_secs(60));
    assert_eq!(config.sink.offset_column, "file_offset");
    assert_eq!(config.sink.rows_per_commit, 1000);
    assert_eq!(config.sink.workers, 1);
}

#[test]
fn test_full_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    let config_yaml = r#"
source:
  path: /data/access.tsv
  encoding: utf-8-lossy
  delimiter: "\t"
  columns: [ts, request_id, status]
  skip_lines: 0
  every_nth: 5
  regex_search: '^(\d+)-'
  regex_replace: '$1'
  watch: 2s
  event_timeout: 10s
  pad_short_rows: true
  null_text: "-"
index:
  path: /data/access.idx
  date_column: ts
  date_format: epoch
  identifier_column: request_id
sink:
  connection: /data/access.duckdb
  schema: web
  table: access
  offset_column: file_offset
  line_column: file_line
  server_name_column: host
  server_name: edge-3
  rows_per_commit: 250
  workers: 4
  commit_delay: 500ms
"#;
    fs::write(&config_path, config_yaml).unwrap();

    let config = load_config(&config_path).unwrap();

    assert_eq!(config.source.delimiter, '\t');
    assert_eq!(config.source.every_nth, Some(5));
    assert_eq!(config.source.effective_skip_lines(), 0);
    assert_eq!(config.source.watch, WatchMode::Poll(Duration::from_secs(2)));
    assert_eq!(config.source.null_text.as_deref(), Some("-"));
    assert_eq!(config.index.date_format, "epoch");
    assert_eq!(config.sink.commit_delay, Duration::from_millis(500));
    assert_eq!(config.sink.server_identity().as_deref(), Some("edge-3"));
}

#[test]
fn test_validation_collects_every_problem() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    let config_yaml = r#"
source:
  path: /data/in.csv
  columns: [a, b]
  regex_replace: 'x'
index:
  date_column: when
sink:
  connection: ":memory:"
  table: events
  offset_column: file_offset
  rows_per_commit: 0
"#;
    fs::write(&config_path, config_yaml).unwrap();

    match load_config(&config_path) {
        Err(ConfigError::ValidationList(errors)) => {
            assert_eq!(errors.len(), 3, "unexpected errors: {:?}", errors);
            assert!(errors.iter().any(|e| e.contains("regex_search")));
            assert!(errors.iter().any(|e| e.contains("'when'")));
            assert!(errors.iter().any(|e| e.contains("rows_per_commit")));
        }
        other => panic!("expected validation errors, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_env_var_expansion_in_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");
    std::env::set_var("SHOVEL_ITEST_TABLE", "from_env");

    let config_yaml = r#"
source:
  path: /data/in.csv
sink:
  connection: ":memory:"
  table: $env{SHOVEL_ITEST_TABLE}
  offset_column: file_offset
"#;
    fs::write(&config_path, config_yaml).unwrap();

    let config = load_config(&config_path).unwrap();
    assert_eq!(config.sink.table, "from_env");
    std::env::remove_var("SHOVEL_ITEST_TABLE");
}

#[test]
fn test_missing_file() {
    let temp_dir = TempDir::new().unwrap();
    let result = load_config(&temp_dir.path().join("absent.yml"));
    assert!(matches!(result, Err(ConfigError::Io(_))));
}
