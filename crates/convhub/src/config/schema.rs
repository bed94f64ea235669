use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Root of the blob area holding inputs, outputs and logs.
    #[serde(default = "default_file_store")]
    pub file_store: PathBuf,
    #[serde(default)]
    pub converter: ConverterSettings,
    #[serde(default = "default_max_file_count")]
    pub max_file_count: u32,
    #[serde(default = "default_max_concurrent_conversions")]
    pub max_concurrent_conversions: usize,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    #[serde(default)]
    pub log: LogSettings,
}

fn convhub_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".convhub")
}

fn default_database_path() -> PathBuf {
    crate::db::default_database_path().unwrap_or_else(|| convhub_home().join("data/convhub.db"))
}

fn default_file_store() -> PathBuf {
    convhub_home().join("files")
}

fn default_max_file_count() -> u32 {
    64
}

fn default_max_concurrent_conversions() -> usize {
    4
}

fn default_max_upload_bytes() -> u64 {
    64 * 1024 * 1024
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            file_store: default_file_store(),
            converter: ConverterSettings::default(),
            max_file_count: default_max_file_count(),
            max_concurrent_conversions: default_max_concurrent_conversions(),
            max_upload_bytes: default_max_upload_bytes(),
            log: LogSettings::default(),
        }
    }
}

/// The external converter. Job-specific flags are appended after `args`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConverterSettings {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_program() -> String {
    "escher-converter".to_string()
}

impl Default for ConverterSettings {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
