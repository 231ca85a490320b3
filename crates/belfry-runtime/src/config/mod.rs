//! Configuration module for the Belfry runtime.
//!
//! Configuration is layered with figment (defaults, `belfry.toml`,
//! `BELFRY_*` environment variables) and checked by [`validate_config`]
//! before the runtime is built.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, load_config, load_config_from_file};
pub use schema::{
    BelfryConfig, CoreConfig, DispatchConfig, JobOverride, LogFormat, LogLevel, LogOutput,
    LoggingConfig, RateLimitConfig, RuleOverride, SchedulerConfig, SpanMode,
};
pub use validation::validate_config;
