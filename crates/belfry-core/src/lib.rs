//! # Belfry Core
//!
//! Data model shared by every Belfry crate.
//!
//! - [`Trigger`]: immutable snapshot of one parsed inbound event
//! - [`Priority`], [`ExecutionMode`], [`RateLimit`], [`Jitter`]: declarative
//!   policies attached to rules and jobs at registration time
//! - [`Outcome`] / [`ExecutionResult`]: what an invocation reports back
//! - [`RegistryError`], [`ExtractError`]: synchronous registration and
//!   extraction failures
//!
//! The engine that consumes these types lives in `belfry-framework`.

pub mod error;
pub mod outcome;
pub mod policy;
pub mod trigger;

pub use error::{ExtractError, ExtractResult, RegistryError, RegistryResult};
pub use outcome::{ExecutionResult, Outcome, Suppression};
pub use policy::{ExecutionMode, Jitter, Priority, RateLimit, RateLimitScope, ScopeKey};
pub use trigger::{
    ACTION_INTENT, Actor, DEFAULT_EVENT, Target, Trigger, TriggerBuilder, TriggerFlags,
};
