//! Plugins: named bundles of rules, jobs and lifecycle hooks.
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use belfry_framework::{Job, LoadContext, Plugin, Rule};
//!
//! let plugin = Plugin::new("seen")
//!     .rule(Rule::builder("seen").command("seen").handler(seen))
//!     .job(Job::builder("seen_flush").every(Duration::from_secs(300)).handler(flush))
//!     .on_load(|ctx: LoadContext| async move {
//!         let cfg: SeenConfig = ctx.get_config()?;
//!         tracing::info!(max_age = cfg.max_age_days, "seen database ready");
//!         Ok::<_, serde_json::Error>(())
//!     })
//!     .on_shutdown(|| async { tracing::info!("seen database closed") });
//! ```

use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tower::BoxError;

use crate::job::Job;
use crate::rule::Rule;

// ============================================================================
// LoadContext
// ============================================================================

/// Context passed to a plugin's `on_load` hook.
#[derive(Debug, Clone)]
pub struct LoadContext {
    plugin: String,
    config: Arc<Value>,
}

impl LoadContext {
    pub(crate) fn new(plugin: impl Into<String>, config: Arc<Value>) -> Self {
        Self {
            plugin: plugin.into(),
            config,
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// The raw `plugins.<name>` section (`Value::Null` when absent).
    pub fn config(&self) -> &Arc<Value> {
        &self.config
    }

    /// Deserialises the plugin config section into `T`.
    pub fn get_config<T>(&self) -> serde_json::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        T::deserialize(self.config.as_ref())
    }
}

pub type OnLoadFn = Arc<dyn Fn(LoadContext) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

pub type OnShutdownFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

// ============================================================================
// Plugin
// ============================================================================

/// A plugin as handed over by the loader.
pub struct Plugin {
    name: String,
    rules: Vec<Rule>,
    jobs: Vec<Job>,
    on_load: Option<OnLoadFn>,
    on_shutdown: Option<OnShutdownFn>,
}

impl Plugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
            jobs: Vec::new(),
            on_load: None,
            on_shutdown: None,
        }
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn job(mut self, job: Job) -> Self {
        self.jobs.push(job);
        self
    }

    /// Sets the hook run before any rule or job is registered. An error
    /// aborts the load.
    pub fn on_load<F, Fut, E>(mut self, hook: F) -> Self
    where
        F: Fn(LoadContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.on_load = Some(Arc::new(move |ctx: LoadContext| {
            hook(ctx).map(|r| r.map_err(Into::<BoxError>::into)).boxed()
        }));
        self
    }

    /// Sets the hook run after the plugin's rules and jobs are removed.
    pub fn on_shutdown<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_shutdown = Some(Arc::new(move || hook().boxed()));
        self
    }

    /// Rewrites every rule, e.g. to apply configuration overrides.
    pub fn map_rules(mut self, f: impl FnMut(Rule) -> Rule) -> Self {
        self.rules = self.rules.into_iter().map(f).collect();
        self
    }

    /// Rewrites every job, e.g. to apply configuration overrides.
    pub fn map_jobs(mut self, f: impl FnMut(Job) -> Job) -> Self {
        self.jobs = self.jobs.into_iter().map(f).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub(crate) fn into_parts(self) -> PluginParts {
        PluginParts {
            name: self.name,
            rules: self.rules,
            jobs: self.jobs,
            on_load: self.on_load,
            on_shutdown: self.on_shutdown,
        }
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("rules", &self.rules.len())
            .field("jobs", &self.jobs.len())
            .field("on_load", &self.on_load.is_some())
            .field("on_shutdown", &self.on_shutdown.is_some())
            .finish()
    }
}

pub(crate) struct PluginParts {
    pub name: String,
    pub rules: Vec<Rule>,
    pub jobs: Vec<Job>,
    pub on_load: Option<OnLoadFn>,
    pub on_shutdown: Option<OnShutdownFn>,
}
