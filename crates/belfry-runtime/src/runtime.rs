//! Runtime orchestration.
//!
//! [`BelfryRuntime`] owns one of every engine component, wires them
//! together from a [`BelfryConfig`] and drives the trigger loop.
//!
//! ```rust,ignore
//! use belfry_runtime::BelfryRuntime;
//!
//! let runtime = BelfryRuntime::builder()
//!     .config_file("config/belfry.toml")
//!     .build()?;
//!
//! runtime.load_plugin(greeter_plugin()).await?;
//!
//! let triggers = runtime.trigger_sender();
//! // hand `triggers` to the protocol parser
//!
//! runtime.run().await?;
//! ```

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use belfry_framework::{
    DispatchReport, Dispatcher, Executor, ExecutorStats, Job, JobScheduler, Plugin,
    PluginManager, PluginState, RateLimiter, Rule, RuleRegistry, SuppressionNotifier, Trigger,
};

use crate::config::{BelfryConfig, ConfigLoader, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// Name of the built-in job that prunes expired rate-limit windows.
pub const PRUNE_JOB: &str = "belfry.prune-rate-limits";

/// Point-in-time view of the runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub rules: usize,
    pub jobs: usize,
    /// Plugins currently active.
    pub plugins: usize,
    pub executor: ExecutorStats,
}

/// The Belfry runtime.
pub struct BelfryRuntime {
    config: BelfryConfig,
    registry: Arc<RuleRegistry>,
    limiter: Arc<RateLimiter>,
    executor: Arc<Executor>,
    scheduler: Arc<JobScheduler>,
    dispatcher: Dispatcher,
    plugins: PluginManager,
    trigger_tx: mpsc::Sender<Trigger>,
    trigger_rx: Mutex<Option<mpsc::Receiver<Trigger>>>,
    shutdown: CancellationToken,
    stopped: AtomicBool,
}

impl BelfryRuntime {
    /// Builds a runtime from an already loaded configuration.
    ///
    /// The configuration is validated first. Logging is left untouched; use
    /// [`from_config`](Self::from_config) to initialize it as well.
    pub fn new(config: BelfryConfig) -> RuntimeResult<Self> {
        validate_config(&config)?;

        let registry = Arc::new(RuleRegistry::new(config.core.match_settings()));
        let limiter = Arc::new(RateLimiter::new());
        let executor = Arc::new(Executor::new(config.dispatch.default_timeout()));
        let scheduler = Arc::new(JobScheduler::new(
            Arc::clone(&executor),
            config.scheduler.resolution(),
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&limiter),
            Arc::clone(&executor),
        );
        let plugins = PluginManager::new(
            Arc::clone(&registry),
            Arc::clone(&scheduler),
            Arc::clone(&limiter),
            config.plugins.clone(),
        );
        let (trigger_tx, trigger_rx) = mpsc::channel(config.dispatch.trigger_queue);

        info!(
            nick = %config.core.nick,
            default_timeout = ?config.dispatch.default_timeout(),
            resolution = ?config.scheduler.resolution(),
            "Runtime initialized from configuration"
        );

        Ok(Self {
            config,
            registry,
            limiter,
            executor,
            scheduler,
            dispatcher,
            plugins,
            trigger_tx,
            trigger_rx: Mutex::new(Some(trigger_rx)),
            shutdown: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        })
    }

    /// Initializes logging from `config.logging`, then builds the runtime.
    pub fn from_config(config: BelfryConfig) -> RuntimeResult<Self> {
        logging::init_from_config(&config.logging);
        Self::new(config)
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub fn config(&self) -> &BelfryConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    /// Attaches a hook told about every suppressed candidate.
    pub fn with_notifier(mut self, notifier: Arc<dyn SuppressionNotifier>) -> Self {
        self.dispatcher = self.dispatcher.with_notifier(notifier);
        self
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Registers `rule` after applying its `rules.<name>` override.
    pub fn register_rule(&self, rule: Rule) -> RuntimeResult<Arc<Rule>> {
        let rule = self.apply_rule_override(rule);
        Ok(self.registry.register(rule)?)
    }

    /// Unregisters the rule and drops its rate-limit counters.
    pub fn unregister_rule(&self, name: &str) -> bool {
        let removed = self.registry.unregister(name);
        if removed {
            self.limiter.forget(name);
        }
        removed
    }

    /// Registers `job` after applying its `jobs.<name>` override.
    pub fn register_job(&self, job: Job) -> RuntimeResult<Arc<Job>> {
        let job = self.apply_job_override(job);
        Ok(self.scheduler.register(job)?)
    }

    pub fn unregister_job(&self, name: &str) -> bool {
        self.scheduler.unregister(name)
    }

    /// Loads `plugin`, applying configured overrides to its rules and jobs.
    pub async fn load_plugin(&self, plugin: Plugin) -> RuntimeResult<()> {
        let plugin = plugin
            .map_rules(|rule| self.apply_rule_override(rule))
            .map_jobs(|job| self.apply_job_override(job));
        Ok(self.plugins.load(plugin).await?)
    }

    pub async fn unload_plugin(&self, name: &str) -> RuntimeResult<()> {
        Ok(self.plugins.unload(name).await?)
    }

    pub async fn plugin_state(&self, name: &str) -> Option<PluginState> {
        self.plugins.state(name).await
    }

    fn apply_rule_override(&self, rule: Rule) -> Rule {
        match self.config.rules.get(rule.name()) {
            Some(ov) => {
                debug!(rule = %rule.name(), "Applying configured rule override");
                ov.apply(rule)
            }
            None => rule,
        }
    }

    fn apply_job_override(&self, job: Job) -> Job {
        match self.config.jobs.get(job.name()) {
            Some(ov) => {
                debug!(job = %job.name(), "Applying configured job override");
                ov.apply(job)
            }
            None => job,
        }
    }

    // =========================================================================
    // Trigger Loop
    // =========================================================================

    /// Sender for the external parser. Triggers sent here are dispatched by
    /// [`run`](Self::run) in arrival order.
    pub fn trigger_sender(&self) -> mpsc::Sender<Trigger> {
        self.trigger_tx.clone()
    }

    /// Dispatches one trigger immediately, bypassing the channel.
    pub fn dispatch(&self, trigger: impl Into<Arc<Trigger>>) -> DispatchReport {
        self.dispatcher.on_trigger(trigger)
    }

    /// Token that stops [`run`](Self::run) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Starts the job scheduler and dispatches triggers until Ctrl-C,
    /// SIGTERM or cancellation of [`shutdown_token`](Self::shutdown_token),
    /// then shuts down.
    ///
    /// Can only be called once.
    pub async fn run(&self) -> RuntimeResult<()> {
        let mut triggers = self
            .trigger_rx
            .lock()
            .take()
            .ok_or(RuntimeError::AlreadyRunning)?;

        self.register_housekeeping()?;
        self.scheduler.start();

        info!("Belfry runtime is now running. Press Ctrl+C to stop.");

        let signal = wait_for_signal();
        tokio::pin!(signal);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                _ = &mut signal => break,
                trigger = triggers.recv() => match trigger {
                    Some(trigger) => {
                        self.dispatcher.on_trigger(trigger);
                    }
                    None => {
                        info!("Trigger channel closed");
                        break;
                    }
                },
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Stops the scheduler, unloads every plugin and waits for in-flight
    /// invocations. Later calls return immediately.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Stopping Belfry runtime");

        self.shutdown.cancel();
        self.scheduler.stop().await;
        self.plugins.shutdown_all().await;
        self.executor.drain().await;

        let stats = self.executor.stats();
        info!(
            submitted = stats.submitted,
            failed = stats.failed,
            timed_out = stats.timed_out,
            "Runtime stopped"
        );
    }

    pub async fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            rules: self.registry.len(),
            jobs: self.scheduler.len(),
            plugins: self.plugins.active_count().await,
            executor: self.executor.stats(),
        }
    }

    fn register_housekeeping(&self) -> RuntimeResult<()> {
        let secs = self.config.scheduler.prune_interval_secs;
        if secs == 0 || self.scheduler.contains(PRUNE_JOB) {
            return Ok(());
        }

        let limiter = Arc::clone(&self.limiter);
        let job = Job::builder(PRUNE_JOB)
            .every(Duration::from_secs(secs))
            .exclusive()
            .handler(move || {
                let limiter = Arc::clone(&limiter);
                async move {
                    let pruned = limiter.prune(Instant::now());
                    if pruned > 0 {
                        debug!(pruned, "Pruned expired rate-limit windows");
                    }
                }
            });
        self.scheduler.register(job)?;
        Ok(())
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM. Never resolves if no handler
/// can be installed.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use signal::unix::{SignalKind, signal as unix_signal};

        match unix_signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    res = signal::ctrl_c() => {
                        if let Err(e) = res {
                            warn!("Failed to listen for Ctrl+C: {e}");
                            std::future::pending::<()>().await;
                        }
                        info!("Received Ctrl+C, shutting down");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down");
                    }
                }
                return;
            }
            Err(e) => warn!("Failed to register SIGTERM handler: {e}"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builds a [`BelfryRuntime`] from layered configuration.
///
/// ```rust,ignore
/// let runtime = BelfryRuntime::builder()
///     .config_file("config/belfry.toml")
///     .without_env()
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    init_logging: bool,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
            init_logging: true,
        }
    }

    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    pub fn merge(mut self, config: BelfryConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Whether to install the global subscriber from `logging` (default: true).
    pub fn init_logging(mut self, enabled: bool) -> Self {
        self.init_logging = enabled;
        self
    }

    pub fn build(self) -> RuntimeResult<BelfryRuntime> {
        let config = self.config_loader.load()?;
        if self.init_logging {
            BelfryRuntime::from_config(config)
        } else {
            BelfryRuntime::new(config)
        }
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
