//! # Belfry
//!
//! The event-dispatch and job-scheduling core of a chat bot.
//!
//! ## Overview
//!
//! A protocol parser turns every inbound line into a [`Trigger`](core::Trigger).
//! Belfry matches it against the registered rules, applies rate limits and
//! exclusivity, and runs the matching handlers concurrently, each under its
//! own timeout. Jobs run handlers on a timer through the same executor.
//!
//! ## Architecture
//!
//! ```text
//! parser ──Trigger──▶ Runtime ──▶ Dispatcher ──▶ RuleRegistry (priority order)
//!                        │            │    └───▶ RateLimiter
//!                        │            ▼
//!                        └──▶ JobScheduler ──▶ Executor ──▶ handler (timeout, panic isolation)
//! ```
//!
//! - **Runtime**: Configuration, plugin lifecycle, the trigger loop
//! - **Rules**: Command, nickname-command, action, pattern, URL and event matchers
//! - **Jobs**: Interval handlers with optional jitter
//! - **Handlers**: User-defined async functions (Axum-style)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use belfry::prelude::*;
//!
//! async fn ping(actor: Actor) -> Outcome {
//!     info!(actor = %actor, "pong");
//!     Outcome::Handled
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = BelfryRuntime::builder().build()?;
//!
//!     runtime.load_plugin(
//!         Plugin::new("basics").rule(
//!             Rule::builder("ping")
//!                 .command("ping")
//!                 .rate_limit(RateLimit::per_actor(3, Duration::from_secs(60)))
//!                 .handler(ping),
//!         ),
//!     ).await?;
//!
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: Load `belfry.toml` configuration files (default)
//! - `json-log`: Enable the JSON log format

pub use belfry_core as core;
pub use belfry_framework as framework;
pub use belfry_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use belfry::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use belfry_runtime::{BelfryConfig, BelfryRuntime, RuntimeError, RuntimeResult};

    // Rules, jobs and plugins
    pub use belfry_framework::{Job, Plugin, Rule};

    // Trigger model and policies
    pub use belfry_core::{
        Actor, ExecutionMode, Outcome, Priority, RateLimit, RateLimitScope, Target, Trigger,
    };

    // Extractors - for handler parameters
    pub use belfry_framework::{
        BoxError, Captures, Context, FromContext, JobTick, LoadContext, PluginConfig,
    };

    pub use std::time::Duration;

    pub use belfry_runtime::prelude::*;
}
