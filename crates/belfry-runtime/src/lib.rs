//! Belfry Runtime - Orchestration layer for the Belfry dispatch engine.
//!
//! This crate provides:
//! - Layered configuration (`BelfryConfig`, `ConfigLoader`) with per-rule and
//!   per-job overrides
//! - Logging setup on top of `tracing-subscriber`
//! - The [`BelfryRuntime`], which wires the registry, rate limiter,
//!   dispatcher, executor, job scheduler and plugin manager together
//!
//! ```ignore
//! use belfry_runtime::BelfryRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = BelfryRuntime::builder().build()?;
//!     runtime.load_plugin(my_plugin()).await?;
//!
//!     let triggers = runtime.trigger_sender();
//!     tokio::spawn(read_protocol_lines(triggers));
//!
//!     // Run until Ctrl+C
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{BelfryConfig, ConfigError, ConfigLoader, ConfigResult, JobOverride, RuleOverride};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::LoggingBuilder;
pub use runtime::{BelfryRuntime, PRUNE_JOB, RuntimeBuilder, RuntimeStats};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides all the commonly used logging macros:
/// - `trace!`, `debug!`, `info!`, `warn!`, `error!`
/// - `span`, `event`
/// - `instrument` attribute
/// - `Level` for span creation
pub mod prelude {
    pub use tracing::{Level, debug, error, event, info, instrument, span, trace, warn};
}
