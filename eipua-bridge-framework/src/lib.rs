//! Bridge framework
//!
//! Common abstractions for building polling bridges between a field device
//! and a supervisory server.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeArgs`] for common CLI argument parsing
//! - [`BackoffGate`] and [`BackoffState`] for tiered reconnect backoff
//! - [`ShutdownSignal`] for cooperative cancellation
//!
//! # Example
//!
//! ```ignore
//! use eipua_bridge_framework::{BridgeArgs, BridgeConfig, ShutdownSignal};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("mybridge.json5");
//!     let config = MyBridgeConfig::load(&args.config)?;
//!     let _log_guard = eipua_bridge_framework::init_logging(&config, &args)?;
//!
//!     let shutdown = ShutdownSignal::new();
//!     shutdown.listen_for_os_signals();
//!     my_loop(config, shutdown).await;
//!     Ok(())
//! }
//! ```

mod args;
mod backoff;
mod config;
mod error;
mod shutdown;

pub use args::BridgeArgs;
pub use backoff::{BackoffGate, BackoffState, BackoffTier, ConnectionState};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use shutdown::ShutdownSignal;

// Re-export commonly used types from eipua-common
pub use eipua_common::{
    FileLogConfig, LogFormat, LoggingConfig, TypedValue, Value, ValueKind, WorkerGuard,
};

/// Initialize logging from the configuration, honoring `--log-level`.
///
/// Keep the returned guard alive until exit so the log file is flushed.
pub fn init_logging<C: BridgeConfig>(config: &C, args: &BridgeArgs) -> Result<Option<WorkerGuard>> {
    let log_config = config
        .logging()
        .with_level_override(args.log_level.as_deref());
    eipua_common::init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))
}
