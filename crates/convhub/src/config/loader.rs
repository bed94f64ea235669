use std::path::{Path, PathBuf};

use crate::config::schema::Settings;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/settings-v1.json");

pub const ENV_DATABASE: &str = "CONVHUB_DATABASE";
pub const ENV_FILE_STORE: &str = "CONVHUB_FILE_STORE";
pub const ENV_CONVERTER: &str = "CONVHUB_CONVERTER";

pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_settings_from_str(&content)
}

pub fn load_settings_from_str(content: &str) -> Result<Settings, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let mut settings: Settings = serde_json::from_value(json_value)?;

    apply_env_overrides(&mut settings);
    validate_settings(&settings)?;

    Ok(settings)
}

/// Settings used when no file is given: defaults plus environment overrides.
pub fn default_settings() -> Result<Settings, ConfigError> {
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings);
    validate_settings(&settings)?;
    Ok(settings)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn apply_env_overrides(settings: &mut Settings) {
    if let Some(path) = env_value(ENV_DATABASE) {
        settings.database_path = PathBuf::from(path);
    }
    if let Some(path) = env_value(ENV_FILE_STORE) {
        settings.file_store = PathBuf::from(path);
    }
    if let Some(program) = env_value(ENV_CONVERTER) {
        settings.converter.program = program;
    }
}

fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    if settings.max_file_count < 1 {
        return Err(ConfigError::Validation {
            message: "max_file_count must be at least 1".to_string(),
        });
    }

    if settings.max_concurrent_conversions < 1 {
        return Err(ConfigError::Validation {
            message: "max_concurrent_conversions must be at least 1".to_string(),
        });
    }

    if settings.converter.program.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "converter.program must not be empty".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    #[serial]
    fn test_load_valid_settings() {
        let settings_json = r#"
        {
            "database_path": "/var/lib/convhub/jobs.db",
            "file_store": "/var/lib/convhub/files",
            "converter": {
                "program": "java",
                "args": ["-jar", "/opt/escher/converter.jar"]
            },
            "max_file_count": 10,
            "max_concurrent_conversions": 2,
            "log": { "level": "debug", "json": true }
        }
        "#;

        let settings = load_settings_from_str(settings_json).unwrap();
        assert_eq!(settings.file_store, PathBuf::from("/var/lib/convhub/files"));
        assert_eq!(settings.converter.program, "java");
        assert_eq!(settings.converter.args.len(), 2);
        assert_eq!(settings.max_file_count, 10);
        assert_eq!(settings.max_concurrent_conversions, 2);
        assert!(settings.log.json);
    }

    #[test]
    #[serial]
    fn test_empty_object_uses_defaults() {
        let settings = load_settings_from_str("{}").unwrap();
        assert_eq!(settings.max_file_count, 64);
        assert_eq!(settings.max_concurrent_conversions, 4);
        assert_eq!(settings.log.level, "info");
        assert!(settings.file_store.ends_with(".convhub/files"));
    }

    #[test]
    fn test_unknown_key_fails_schema() {
        let result = load_settings_from_str(r#"{ "workers": 3 }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_wrong_type_fails_schema() {
        let result = load_settings_from_str(r#"{ "max_file_count": "many" }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    #[serial]
    fn test_zero_limits_fail_validation() {
        let result = load_settings_from_str(r#"{ "max_file_count": 0 }"#);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));

        let result = load_settings_from_str(r#"{ "max_concurrent_conversions": 0 }"#);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    #[serial]
    fn test_blank_program_fails_validation() {
        let result = load_settings_from_str(r#"{ "converter": { "program": "  " } }"#);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_invalid_json() {
        let result = load_settings_from_str("{ not json");
        assert!(matches!(result, Err(ConfigError::ParseJson(_))));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var(ENV_DATABASE, "/tmp/override.db");
        std::env::set_var(ENV_CONVERTER, "/usr/local/bin/convert");
        let settings = load_settings_from_str(r#"{ "database_path": "/from/file.db" }"#).unwrap();
        std::env::remove_var(ENV_DATABASE);
        std::env::remove_var(ENV_CONVERTER);

        assert_eq!(settings.database_path, PathBuf::from("/tmp/override.db"));
        assert_eq!(settings.converter.program, "/usr/local/bin/convert");
    }

    #[test]
    #[serial]
    fn test_blank_env_value_is_ignored() {
        std::env::set_var(ENV_FILE_STORE, "   ");
        let settings = default_settings().unwrap();
        std::env::remove_var(ENV_FILE_STORE);

        assert!(settings.file_store.ends_with(".convhub/files"));
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{ "max_upload_bytes": 1024 }}"#).unwrap();

        let settings = load_settings(file.path()).unwrap();
        assert_eq!(settings.max_upload_bytes, 1024);
    }

    #[test]
    fn test_missing_file() {
        let result = load_settings("/nonexistent/convhub/settings.json");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }
}
