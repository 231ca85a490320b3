//! Plugin lifecycle management.
//!
//! [`PluginManager`] is the central owner of loaded plugins. It:
//!
//! - Runs a plugin's `on_load` hook, then registers its jobs and rules,
//!   rolling everything back if one of them is rejected.
//! - On unload, removes the plugin's rules and jobs first (so no new
//!   invocation can start) and then runs its `on_shutdown` hook.
//! - Unloads every plugin in reverse load order on shutdown.
//!
//! All lifecycle operations are sequential.
//!
//! ```text
//! load()    ──► Active   (on_load succeeded, everything registered)
//!           ──► Failed   (on_load failed or a registration was rejected)
//! unload()  ──► removed  (rules/jobs removed, then on_shutdown)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{Instrument, Level, error, info, span};

use crate::error::PluginError;
use crate::plugin::{LoadContext, OnShutdownFn, Plugin};
use crate::ratelimit::RateLimiter;
use crate::registry::RuleRegistry;
use crate::scheduler::JobScheduler;

/// Load state of a plugin known to the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    /// Loaded; its rules and jobs are registered.
    Active,
    /// The last load attempt failed; nothing of it is registered.
    Failed,
}

struct PluginEntry {
    name: String,
    state: PluginState,
    rules: Vec<String>,
    jobs: Vec<String>,
    on_shutdown: Option<OnShutdownFn>,
}

/// Central manager for plugin loading and unloading.
pub struct PluginManager {
    registry: Arc<RuleRegistry>,
    scheduler: Arc<JobScheduler>,
    limiter: Arc<RateLimiter>,
    /// Per-plugin config sections, keyed by plugin name.
    plugin_configs: HashMap<String, Value>,
    plugins: AsyncMutex<Vec<PluginEntry>>,
}

impl PluginManager {
    pub fn new(
        registry: Arc<RuleRegistry>,
        scheduler: Arc<JobScheduler>,
        limiter: Arc<RateLimiter>,
        plugin_configs: HashMap<String, Value>,
    ) -> Self {
        Self {
            registry,
            scheduler,
            limiter,
            plugin_configs,
            plugins: AsyncMutex::new(Vec::new()),
        }
    }

    /// Loads `plugin` and registers its rules and jobs.
    ///
    /// A plugin that previously failed to load may be loaded again.
    pub async fn load(&self, plugin: Plugin) -> Result<(), PluginError> {
        let parts = plugin.into_parts();
        let name = parts.name.clone();
        let span = span!(Level::INFO, "plugin", plugin = %name);

        async move {
            let mut plugins = self.plugins.lock().await;
            match plugins.iter().position(|e| e.name == name) {
                Some(pos) if plugins[pos].state == PluginState::Active => {
                    return Err(PluginError::AlreadyLoaded(name));
                }
                Some(pos) => {
                    plugins.remove(pos);
                }
                None => {}
            }

            let config = Arc::new(self.plugin_configs.get(&name).cloned().unwrap_or(Value::Null));

            if let Some(on_load) = &parts.on_load {
                if let Err(e) = on_load(LoadContext::new(&name, Arc::clone(&config))).await {
                    error!("on_load failed: {e}");
                    plugins.push(PluginEntry::failed(&name));
                    return Err(PluginError::LoadHook {
                        plugin: name,
                        reason: e.to_string(),
                    });
                }
            }

            let mut entry = PluginEntry {
                name: name.clone(),
                state: PluginState::Active,
                rules: Vec::with_capacity(parts.rules.len()),
                jobs: Vec::with_capacity(parts.jobs.len()),
                on_shutdown: parts.on_shutdown,
            };

            let mut failure = None;
            for job in parts.jobs {
                let job = job.with_plugin(&name).with_config(Arc::clone(&config));
                match self.scheduler.register(job) {
                    Ok(job) => entry.jobs.push(job.name().to_string()),
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
            if failure.is_none() {
                for rule in parts.rules {
                    let rule = rule.with_plugin(&name).with_config(Arc::clone(&config));
                    match self.registry.register(rule) {
                        Ok(rule) => entry.rules.push(rule.name().to_string()),
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
            }

            if let Some(source) = failure {
                error!("Registration rejected, rolling back: {source}");
                self.remove_registrations(&entry);
                if let Some(on_shutdown) = &entry.on_shutdown {
                    on_shutdown().await;
                }
                plugins.push(PluginEntry::failed(&name));
                return Err(PluginError::Registration {
                    plugin: name,
                    source,
                });
            }

            info!(
                rules = entry.rules.len(),
                jobs = entry.jobs.len(),
                "Plugin loaded and active"
            );
            plugins.push(entry);
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Removes the plugin's rules and jobs, then runs its `on_shutdown` hook.
    ///
    /// In-flight invocations of the plugin's handlers are left to finish.
    pub async fn unload(&self, name: &str) -> Result<(), PluginError> {
        let mut plugins = self.plugins.lock().await;
        let pos = plugins
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| PluginError::NotLoaded(name.to_string()))?;
        let entry = plugins.remove(pos);
        drop(plugins);

        self.teardown(entry).await;
        Ok(())
    }

    /// Unloads every plugin in reverse load order.
    pub async fn shutdown_all(&self) {
        let entries: Vec<PluginEntry> = self.plugins.lock().await.drain(..).collect();
        for entry in entries.into_iter().rev() {
            self.teardown(entry).await;
        }
    }

    async fn teardown(&self, entry: PluginEntry) {
        let span = span!(Level::INFO, "plugin", plugin = %entry.name);
        async {
            if entry.state == PluginState::Active {
                self.remove_registrations(&entry);
                if let Some(on_shutdown) = &entry.on_shutdown {
                    on_shutdown().await;
                }
            }
            info!("Plugin unloaded");
        }
        .instrument(span)
        .await
    }

    fn remove_registrations(&self, entry: &PluginEntry) {
        for rule in &entry.rules {
            self.registry.unregister(rule);
            self.limiter.forget(rule);
        }
        for job in &entry.jobs {
            self.scheduler.unregister(job);
        }
    }

    pub async fn state(&self, name: &str) -> Option<PluginState> {
        self.plugins
            .lock()
            .await
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.state)
    }

    /// Plugin names in load order.
    pub async fn names(&self) -> Vec<String> {
        self.plugins
            .lock()
            .await
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }

    /// Number of plugins known to the manager, failed ones included.
    pub async fn count(&self) -> usize {
        self.plugins.lock().await.len()
    }

    pub async fn active_count(&self) -> usize {
        self.plugins
            .lock()
            .await
            .iter()
            .filter(|e| e.state == PluginState::Active)
            .count()
    }
}

impl PluginEntry {
    fn failed(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: PluginState::Failed,
            rules: Vec::new(),
            jobs: Vec::new(),
            on_shutdown: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use crate::job::Job;
    use crate::rule::Rule;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;
    use tokio_test::assert_ok;

    struct Fixture {
        manager: PluginManager,
        registry: Arc<RuleRegistry>,
        scheduler: Arc<JobScheduler>,
    }

    fn fixture(configs: HashMap<String, Value>) -> Fixture {
        let registry = Arc::new(RuleRegistry::default());
        let scheduler = Arc::new(JobScheduler::new(
            Arc::new(Executor::default()),
            Duration::from_secs(1),
        ));
        let manager = PluginManager::new(
            Arc::clone(&registry),
            Arc::clone(&scheduler),
            Arc::new(RateLimiter::new()),
            configs,
        );
        Fixture {
            manager,
            registry,
            scheduler,
        }
    }

    fn seen_plugin(log: Arc<Mutex<Vec<String>>>) -> Plugin {
        let on_load_log = Arc::clone(&log);
        Plugin::new("seen")
            .rule(Rule::builder("seen").command("seen").handler(|| async {}))
            .job(
                Job::builder("seen_flush")
                    .every(Duration::from_secs(60))
                    .handler(|| async {}),
            )
            .on_load(move |ctx: LoadContext| {
                let log = Arc::clone(&on_load_log);
                async move {
                    log.lock().push(format!("load {}", ctx.config()));
                    Ok::<_, std::io::Error>(())
                }
            })
            .on_shutdown(move || {
                let log = Arc::clone(&log);
                async move { log.lock().push("shutdown".into()) }
            })
    }

    #[tokio::test]
    async fn test_load_and_unload() {
        let configs = HashMap::from([("seen".to_string(), json!({ "max_age_days": 3 }))]);
        let f = fixture(configs);
        let log = Arc::new(Mutex::new(Vec::new()));

        assert_ok!(f.manager.load(seen_plugin(Arc::clone(&log))).await);
        assert_eq!(f.manager.state("seen").await, Some(PluginState::Active));

        let rule = f.registry.get("seen").unwrap();
        assert_eq!(rule.plugin(), Some("seen"));
        assert_eq!(rule.config().as_ref(), &json!({ "max_age_days": 3 }));
        assert!(f.scheduler.contains("seen_flush"));

        assert_ok!(f.manager.unload("seen").await);
        assert!(f.registry.is_empty());
        assert!(f.scheduler.is_empty());
        assert_eq!(
            *log.lock(),
            [r#"load {"max_age_days":3}"#.to_string(), "shutdown".to_string()]
        );
    }

    #[tokio::test]
    async fn test_duplicate_load_rejected() {
        let f = fixture(HashMap::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        assert_ok!(f.manager.load(seen_plugin(Arc::clone(&log))).await);
        let err = f.manager.load(seen_plugin(log)).await.unwrap_err();
        assert!(matches!(err, PluginError::AlreadyLoaded(ref n) if n == "seen"));
    }

    #[tokio::test]
    async fn test_failing_on_load_registers_nothing() {
        let f = fixture(HashMap::new());
        let plugin = Plugin::new("broken")
            .rule(Rule::builder("broken").handler(|| async {}))
            .on_load(|_ctx: LoadContext| async { Err::<(), _>("database unavailable") });

        let err = f.manager.load(plugin).await.unwrap_err();
        assert!(matches!(err, PluginError::LoadHook { .. }));
        assert_eq!(f.manager.state("broken").await, Some(PluginState::Failed));
        assert!(f.registry.is_empty());
        assert_eq!(f.manager.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_registration_failure_rolls_back() {
        let f = fixture(HashMap::new());
        f.registry
            .register(Rule::builder("taken").handler(|| async {}))
            .unwrap();

        let plugin = Plugin::new("clash")
            .job(
                Job::builder("clash_job")
                    .every(Duration::from_secs(5))
                    .handler(|| async {}),
            )
            .rule(Rule::builder("clash_ok").handler(|| async {}))
            .rule(Rule::builder("taken").handler(|| async {}));

        let err = f.manager.load(plugin).await.unwrap_err();
        assert!(matches!(err, PluginError::Registration { .. }));
        assert_eq!(f.registry.names(), ["taken"]);
        assert!(f.scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_all_reverse_order() {
        let f = fixture(HashMap::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            let plugin = Plugin::new(name).on_shutdown(move || {
                let order = Arc::clone(&order);
                async move { order.lock().push(name) }
            });
            assert_ok!(f.manager.load(plugin).await);
        }

        f.manager.shutdown_all().await;
        assert_eq!(*order.lock(), ["third", "second", "first"]);
        assert_eq!(f.manager.count().await, 0);
    }

    #[tokio::test]
    async fn test_unload_unknown() {
        let f = fixture(HashMap::new());
        assert!(matches!(
            f.manager.unload("ghost").await,
            Err(PluginError::NotLoaded(_))
        ));
    }
}
