use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use crate::error::{Error, Result};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Common logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,

    /// Also write to a file rotated at midnight.
    #[serde(default)]
    pub file: Option<FileLogConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Return a copy with the level replaced, if an override is given.
    pub fn with_level_override(&self, level: Option<&str>) -> Self {
        match level {
            Some(level) => Self {
                level: level.to_string(),
                ..self.clone()
            },
            None => self.clone(),
        }
    }
}

/// Daily rotating log file settings.
///
/// The active file is `<directory>/<file_name>.<date>`; files beyond
/// `max_files` are deleted on rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLogConfig {
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,

    #[serde(default = "default_log_file_name")]
    pub file_name: String,

    /// Rotated files to keep (default: 30, one month)
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

fn default_log_directory() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_file_name() -> String {
    "eipua-bridge.log".to_string()
}

fn default_max_log_files() -> usize {
    30
}

impl Default for FileLogConfig {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
            file_name: default_log_file_name(),
            max_files: default_max_log_files(),
        }
    }
}

impl FileLogConfig {
    /// Create the log directory and a daily rolling appender inside it.
    pub fn appender(&self) -> Result<RollingFileAppender> {
        if self.max_files == 0 {
            return Err(Error::Config(
                "logging.file.max_files must be positive".to_string(),
            ));
        }
        std::fs::create_dir_all(&self.directory)?;

        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(&self.file_name)
            .max_log_files(self.max_files)
            .build(&self.directory)
            .map_err(|e| {
                Error::Config(format!(
                    "Failed to open log file in '{}': {}",
                    self.directory.display(),
                    e
                ))
            })
    }
}

/// Load a configuration file in JSON5 format.
pub fn load_config<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    json5::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Load a configuration from a JSON5 string.
pub fn parse_config<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T> {
    json5::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
}
