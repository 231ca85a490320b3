//! Extractor system for the Belfry framework.
//!
//! This module provides the [`FromContext`] trait, which defines how types
//! can be extracted from a [`Context`] for use as handler parameters.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use belfry_framework::{Captures, Outcome, Trigger};
//!
//! async fn seen(trigger: Arc<Trigger>, captures: Captures) -> Outcome {
//!     match captures.args() {
//!         Some(nick) => tracing::info!(asker = %trigger.actor(), %nick, "seen lookup"),
//!         None => return Outcome::Unthrottled,
//!     }
//!     Outcome::Handled
//! }
//! ```

use std::ops::Deref;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use belfry_core::{Actor, Target, Trigger};

use crate::context::{Captures, Context, JobTick};
use crate::error::{ExtractError, ExtractResult};

/// A trait for types that can be extracted from an invocation [`Context`].
///
/// Extraction runs before the handler body. When it fails the handler is not
/// called and the invocation is recorded as failed.
pub trait FromContext: Sized {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self>;
}

impl FromContext for Arc<Context> {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        Ok(Arc::clone(ctx))
    }
}

/// Optional parameters never fail; a failed inner extraction yields `None`.
impl<T: FromContext> FromContext for Option<T> {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        Ok(T::from_context(ctx).ok())
    }
}

impl FromContext for Arc<Trigger> {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        ctx.trigger()
            .cloned()
            .ok_or_else(|| ExtractError::NoTrigger(ctx.name().to_string()))
    }
}

impl FromContext for Captures {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        ctx.captures()
            .cloned()
            .ok_or_else(|| ExtractError::NoTrigger(ctx.name().to_string()))
    }
}

impl FromContext for Actor {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        ctx.trigger()
            .map(|t| t.actor().clone())
            .ok_or_else(|| ExtractError::NoTrigger(ctx.name().to_string()))
    }
}

impl FromContext for Target {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        ctx.trigger()
            .map(|t| t.target().clone())
            .ok_or_else(|| ExtractError::NoTrigger(ctx.name().to_string()))
    }
}

impl FromContext for JobTick {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        ctx.tick()
            .copied()
            .ok_or_else(|| ExtractError::NoJobTick(ctx.name().to_string()))
    }
}

// ============================================================================
// PluginConfig
// ============================================================================

/// Extractor that provides a handler with its plugin's typed configuration.
///
/// The runtime attaches the `plugins.<name>` section of the configuration to
/// every rule and job the plugin registers. `PluginConfig<T>` deserialises
/// that section into `T`.
///
/// An absent section yields `T::default()`. A section that does not
/// deserialise into `T` fails extraction with [`ExtractError::InvalidConfig`].
///
/// ```toml
/// [plugins.seen]
/// max_age_days = 30
/// ```
#[derive(Debug)]
pub struct PluginConfig<T>(pub Arc<T>);

impl<T> PluginConfig<T> {
    pub fn into_inner(self) -> Arc<T> {
        self.0
    }
}

impl<T> Deref for PluginConfig<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> Clone for PluginConfig<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: DeserializeOwned + Default + Send + Sync + 'static> FromContext for PluginConfig<T> {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        if ctx.config().is_null() {
            return Ok(PluginConfig(Arc::new(T::default())));
        }
        ctx.get_config::<T>()
            .map(|t| PluginConfig(Arc::new(t)))
            .map_err(|e| ExtractError::InvalidConfig {
                name: ctx.name().to_string(),
                reason: e.to_string(),
            })
    }
}
