//! Periodic job definitions.
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use belfry_framework::{Job, JobTick};
//!
//! let job = Job::builder("heartbeat")
//!     .every(Duration::from_secs(60))
//!     .jitter(Duration::from_secs(5))
//!     .handler(|tick: JobTick| async move {
//!         tracing::debug!(lag = ?tick.lag(), "heartbeat");
//!     });
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tower::BoxError;

use belfry_core::{ExecutionMode, Jitter, Outcome};

use crate::context::Context;
use crate::handler::{BoxedHandlerService, Handler, boxed, into_service};

/// A handler run by the scheduler on a fixed cadence.
#[derive(Clone)]
pub struct Job {
    name: String,
    interval: Duration,
    jitter: Jitter,
    run_on_load: bool,
    mode: ExecutionMode,
    timeout: Option<Duration>,
    config: Arc<Value>,
    plugin: Option<String>,
    service: BoxedHandlerService,
}

impl Job {
    pub fn builder(name: impl Into<String>) -> JobBuilder {
        JobBuilder {
            name: name.into(),
            interval: Duration::ZERO,
            jitter: Jitter::None,
            run_on_load: false,
            mode: ExecutionMode::default(),
            timeout: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn jitter(&self) -> Jitter {
        self.jitter
    }

    /// Whether the first run happens at registration instead of one
    /// interval later.
    pub fn run_on_load(&self) -> bool {
        self.run_on_load
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn config(&self) -> &Arc<Value> {
        &self.config
    }

    pub fn plugin(&self) -> Option<&str> {
        self.plugin.as_deref()
    }

    pub fn service(&self) -> &BoxedHandlerService {
        &self.service
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_config(mut self, config: Arc<Value>) -> Self {
        self.config = config;
        self
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("jitter", &self.jitter)
            .field("run_on_load", &self.run_on_load)
            .field("mode", &self.mode)
            .field("timeout", &self.timeout)
            .field("plugin", &self.plugin)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Job`].
#[derive(Debug)]
pub struct JobBuilder {
    name: String,
    interval: Duration,
    jitter: Jitter,
    run_on_load: bool,
    mode: ExecutionMode,
    timeout: Option<Duration>,
}

impl JobBuilder {
    pub fn every(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Adds a uniformly sampled delay in `[0, bound]` to every cycle.
    pub fn jitter(mut self, bound: Duration) -> Self {
        self.jitter = if bound.is_zero() {
            Jitter::None
        } else {
            Jitter::Uniform(bound)
        };
        self
    }

    pub fn run_on_load(mut self, run_on_load: bool) -> Self {
        self.run_on_load = run_on_load;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.mode = ExecutionMode::Exclusive;
        self
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn handler<H, T>(self, handler: H) -> Job
    where
        H: Handler<T>,
        T: 'static,
    {
        self.build(into_service(handler))
    }

    pub fn service<S>(self, service: S) -> Job
    where
        S: tower::Service<Arc<Context>, Response = Outcome, Error = BoxError>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        self.build(boxed(service))
    }

    fn build(self, service: BoxedHandlerService) -> Job {
        Job {
            name: self.name,
            interval: self.interval,
            jitter: self.jitter,
            run_on_load: self.run_on_load,
            mode: self.mode,
            timeout: self.timeout,
            config: Arc::new(Value::Null),
            plugin: None,
            service,
        }
    }
}
