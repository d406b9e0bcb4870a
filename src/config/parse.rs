use super::types::*;
use crate::config::{expand_env_vars, expand_tilde};
use regex::bytes::Regex;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    use std::io::Read;

    let mut file = File::open(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut yaml_string = String::new();
    file.read_to_string(&mut yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    let config = parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })?;

    Ok(config)
}

/// Parse and validate a configuration from YAML text.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml_string = expand_env_vars(yaml);

    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;

    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let re = regex::Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    let mut unexpanded_vars: Vec<String> = re
        .captures_iter(yaml_string)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    Err(ConfigError::Validation(format!(
        "environment variables are not set: {}",
        unexpanded_vars.join(", ")
    )))
}

fn expand_paths(config: &mut Config) {
    config.source.path = expand_tilde(&config.source.path);

    if let Some(path) = config.index.path.take() {
        config.index.path = Some(expand_tilde(&path));
    }

    if config.sink.connection != ":memory:" {
        config.sink.connection = expand_tilde(Path::new(&config.sink.connection))
            .to_string_lossy()
            .into_owned();
    }
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    let source = &config.source;
    if !source.delimiter.is_ascii() {
        errors.push(format!(
            "source.delimiter must be a single ASCII character, got '{}'",
            source.delimiter
        ));
    }

    match (&source.regex_search, &source.regex_replace) {
        (Some(pattern), Some(_)) => {
            if let Err(e) = Regex::new(pattern) {
                errors.push(format!("source.regex_search is not a valid regex: {}", e));
            }
        }
        (Some(_), None) => {
            errors.push("source.regex_replace must be set when regex_search is set".to_string())
        }
        (None, Some(_)) => {
            errors.push("source.regex_search must be set when regex_replace is set".to_string())
        }
        (None, None) => {}
    }

    if source.event_timeout.is_zero() {
        errors.push("source.event_timeout must be greater than zero".to_string());
    }

    if let Some(columns) = &source.columns {
        if columns.is_empty() {
            errors.push("source.columns must not be empty".to_string());
        }
        for name in [&config.index.date_column, &config.index.identifier_column]
            .into_iter()
            .flatten()
        {
            if !columns.contains(name) {
                errors.push(format!("index column '{}' is not in source.columns", name));
            }
        }
    }

    let sink = &config.sink;
    if sink.table.trim().is_empty() {
        errors.push("sink.table must not be empty".to_string());
    }
    if sink.offset_column.trim().is_empty() {
        errors.push("sink.offset_column must not be empty".to_string());
    }
    if sink.rows_per_commit == 0 {
        errors.push("sink.rows_per_commit must be greater than zero".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const MINIMAL: &str = r#"
source:
  path: /tmp/input.csv
sink:
  connection: ":memory:"
  table: events
  offset_column: file_offset
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.source.delimiter, ',');
        assert_eq!(config.source.encoding, Encoding::utf8());
        assert_eq!(config.source.watch, WatchMode::Events);
        assert_eq!(config.source.event_timeout, Duration::from_secs(60));
        assert_eq!(config.source.null_text.as_deref(), Some("null"));
        assert_eq!(config.sink.rows_per_commit, 1000);
        assert_eq!(config.sink.workers, 1);
        assert_eq!(config.sink.commit_delay, Duration::ZERO);
        assert_eq!(config.index.date_format, "%Y-%m-%d %H:%M:%S");
    }

    #[test]
    fn test_replace_without_search_rejected() {
        let yaml = MINIMAL.replace(
            "  path: /tmp/input.csv",
            "  path: /tmp/input.csv\n  regex_replace: 'x'",
        );
        let err = parse_config(&yaml).unwrap_err();
        assert!(err.to_string().contains("regex_search must be set"));
    }

    #[test]
    fn test_search_without_replace_rejected() {
        let yaml = MINIMAL.replace(
            "  path: /tmp/input.csv",
            "  path: /tmp/input.csv\n  regex_search: '^a'",
        );
        assert!(matches!(
            parse_config(&yaml),
            Err(ConfigError::ValidationList(_))
        ));
    }

    #[test]
    fn test_zero_rows_per_commit_rejected() {
        let yaml = format!("{}  rows_per_commit: 0\n", MINIMAL);
        let err = parse_config(&yaml).unwrap_err();
        assert!(err.to_string().contains("rows_per_commit"));
    }

    #[test]
    fn test_unknown_index_column_rejected() {
        let yaml = r#"
source:
  path: /tmp/input.csv
  columns: [ts, message]
index:
  date_column: when
sink:
  connection: ":memory:"
  table: events
  offset_column: file_offset
"#;
        let err = parse_config(yaml).unwrap_err();
        assert!(err.to_string().contains("'when'"));
    }

    #[test]
    fn test_unset_env_var_rejected() {
        let yaml = MINIMAL.replace("/tmp/input.csv", "$env{SHOVEL_SURELY_UNSET_VAR}/x.csv");
        let err = parse_config(&yaml).unwrap_err();
        assert!(err.to_string().contains("SHOVEL_SURELY_UNSET_VAR"));
    }
}
