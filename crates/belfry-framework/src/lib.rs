//! # Belfry Framework
//!
//! The event-dispatch and job-scheduling engine.
//!
//! This layer provides:
//! - [`Rule`] / [`Job`] descriptors built with builders
//! - [`RuleRegistry`] for ordered matching of triggers to rules
//! - [`RateLimiter`] for per-actor, per-target and global throttling
//! - [`Dispatcher`] and [`Executor`] for admitting and running invocations
//! - [`JobScheduler`] for time-based invocations
//! - [`PluginManager`] for the load/unload lifecycle of [`Plugin`]s
//! - Axum-style [`Handler`]s with [`FromContext`] extractors
//!
//! ```text
//! Trigger ──► Dispatcher ──► RuleRegistry (match, priority order)
//!                  │     └──► RateLimiter  (admit / suppress)
//!                  ▼
//!              Executor  ◄── JobScheduler (timer)
//!                  │
//!                  ▼
//!           HandlerService (timeout, panic isolation)
//! ```

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod extractor;
pub mod handler;
pub mod job;
pub mod manager;
pub mod plugin;
pub mod ratelimit;
pub mod registry;
pub mod rule;
pub mod scheduler;

pub use belfry_core::*;

pub use context::{Captures, Context, JobTick, Origin};
pub use dispatcher::{DispatchReport, Dispatcher, SuppressionNotifier};
pub use error::PluginError;
pub use executor::{
    DEFAULT_TIMEOUT, ExclusiveToken, Executor, ExecutorStats, Invocation, InvocationKind,
};
pub use extractor::{FromContext, PluginConfig};
pub use handler::{BoxedHandlerService, Handler, HandlerService, IntoOutcome, into_service};
pub use job::{Job, JobBuilder};
pub use manager::{PluginManager, PluginState};
pub use plugin::{LoadContext, Plugin};
pub use ratelimit::RateLimiter;
pub use registry::{Candidate, CommandHelp, RuleRegistry};
pub use rule::{
    DEFAULT_HELP_PREFIX, Example, MatchSettings, MatchSpec, PatternMode, Rule, RuleBuilder,
};
pub use scheduler::{DEFAULT_RESOLUTION, JobScheduler, JobState, TickReport};

pub use tower::BoxError;
