//! Common library for the EtherNet/IP to OPC UA bridge.
//!
//! - [`value`] - Runtime values, declared node types and type coercion
//! - [`config`] - Configuration loading (JSON5 format) and logging settings,
//!   including the optional daily rotating log file
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod value;

// Re-export commonly used types at the crate root
pub use config::{FileLogConfig, LogFormat, LoggingConfig, load_config, parse_config};
pub use error::{Error, Result};
pub use tracing_appender::non_blocking::WorkerGuard;
pub use value::{TypedValue, Value, ValueKind, coerce, infer};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level when set. When
/// `config.file` is set, events are also written to a daily rotating file
/// through a background writer; the returned guard flushes it on drop and
/// must be held for the life of the process.
///
/// # Example
///
/// ```ignore
/// use eipua_common::{FileLogConfig, LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
///     file: Some(FileLogConfig::default()),
/// };
/// let _guard = init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let stdout_layer = match config.format {
        LogFormat::Text => fmt::layer().boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    };

    let (file_layer, guard) = match &config.file {
        Some(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file.appender()?);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            let layer = match config.format {
                LogFormat::Text => layer.boxed(),
                LogFormat::Json => layer.json().boxed(),
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;

    Ok(guard)
}
