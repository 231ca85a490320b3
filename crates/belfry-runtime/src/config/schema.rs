//! Configuration schema definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use belfry_framework::{
    DEFAULT_HELP_PREFIX, ExecutionMode, Jitter, Job, MatchSettings, Priority, RateLimit,
    RateLimitScope, Rule,
};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BelfryConfig {
    /// Bot identity used when compiling rules.
    #[serde(default)]
    pub core: CoreConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Per-rule overrides, keyed by rule name.
    #[serde(default)]
    pub rules: HashMap<String, RuleOverride>,

    /// Per-job overrides, keyed by job name.
    #[serde(default)]
    pub jobs: HashMap<String, JobOverride>,

    /// Free-form plugin sections, keyed by plugin name.
    #[serde(default)]
    pub plugins: HashMap<String, Value>,
}

// =============================================================================
// Core / Dispatch / Scheduler
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// The bot's own nick.
    #[serde(default = "default_nick")]
    pub nick: String,

    /// Additional names the bot answers to in nickname commands.
    #[serde(default)]
    pub alias_nicks: Vec<String>,

    /// Regular expression placed in front of command names.
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,

    /// Literal prefix shown in front of commands in help examples.
    #[serde(default = "default_help_prefix")]
    pub help_prefix: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            nick: default_nick(),
            alias_nicks: Vec::new(),
            command_prefix: default_command_prefix(),
            help_prefix: default_help_prefix(),
        }
    }
}

impl CoreConfig {
    pub fn match_settings(&self) -> MatchSettings {
        MatchSettings::new(&self.nick)
            .with_aliases(self.alias_nicks.iter().cloned())
            .with_command_prefix(&self.command_prefix)
            .with_help_prefix(&self.help_prefix)
    }
}

fn default_nick() -> String {
    "Belfry".to_string()
}

fn default_command_prefix() -> String {
    r"\.".to_string()
}

fn default_help_prefix() -> String {
    DEFAULT_HELP_PREFIX.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Budget applied to handlers that do not declare their own timeout.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Capacity of the trigger channel handed to the parser.
    #[serde(default = "default_trigger_queue")]
    pub trigger_queue: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            trigger_queue: default_trigger_queue(),
        }
    }
}

impl DispatchConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_trigger_queue() -> usize {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Tick period of the job scheduler in milliseconds.
    #[serde(default = "default_resolution_ms")]
    pub resolution_ms: u64,

    /// How often expired rate-limit windows are pruned. `0` disables pruning.
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            resolution_ms: default_resolution_ms(),
            prune_interval_secs: default_prune_interval_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn resolution(&self) -> Duration {
        Duration::from_millis(self.resolution_ms)
    }
}

fn default_resolution_ms() -> u64 {
    1000
}

fn default_prune_interval_secs() -> u64 {
    300
}

// =============================================================================
// Overrides
// =============================================================================

/// One `{limit, window_secs, scope}` entry of a rule override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub limit: u32,
    pub window_secs: u64,
    pub scope: RateLimitScope,
}

impl From<RateLimitConfig> for RateLimit {
    fn from(config: RateLimitConfig) -> Self {
        RateLimit::new(
            config.limit,
            Duration::from_secs(config.window_secs),
            config.scope,
        )
    }
}

/// Per-rule settings that replace what the rule was built with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleOverride {
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub mode: Option<ExecutionMode>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Replaces the rule's whole list when present; an empty list removes
    /// every limit.
    #[serde(default)]
    pub rate_limits: Option<Vec<RateLimitConfig>>,
}

impl RuleOverride {
    pub fn apply(&self, mut rule: Rule) -> Rule {
        if let Some(priority) = self.priority {
            rule = rule.with_priority(priority);
        }
        if let Some(mode) = self.mode {
            rule = rule.with_mode(mode);
        }
        if let Some(secs) = self.timeout_secs {
            rule = rule.with_timeout(Duration::from_secs(secs));
        }
        if let Some(limits) = &self.rate_limits {
            rule = rule.with_rate_limits(limits.iter().copied().map(RateLimit::from));
        }
        rule
    }
}

/// Per-job settings that replace what the job was built with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobOverride {
    #[serde(default)]
    pub interval_secs: Option<u64>,
    /// `0` removes the job's jitter.
    #[serde(default)]
    pub jitter_secs: Option<u64>,
    #[serde(default)]
    pub mode: Option<ExecutionMode>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl JobOverride {
    pub fn apply(&self, mut job: Job) -> Job {
        if let Some(secs) = self.interval_secs {
            job = job.with_interval(Duration::from_secs(secs));
        }
        if let Some(secs) = self.jitter_secs {
            let jitter = match secs {
                0 => Jitter::None,
                secs => Jitter::Uniform(Duration::from_secs(secs)),
            };
            job = job.with_jitter(jitter);
        }
        if let Some(mode) = self.mode {
            job = job.with_mode(mode);
        }
        if let Some(secs) = self.timeout_secs {
            job = job.with_timeout(Duration::from_secs(secs));
        }
        job
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Global log level. `RUST_LOG` takes precedence when set.
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file path, required when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line number.
    #[serde(default)]
    pub file_location: bool,

    /// Which events of the `dispatch` and `invoke` spans are logged.
    #[serde(default)]
    pub spans: SpanMode,

    /// Log every rate-limited or exclusive suppression.
    #[serde(default)]
    pub suppressions: bool,

    /// Log every completed invocation and every job tick.
    #[serde(default)]
    pub invocations: bool,

    /// Per-target levels, e.g. `belfry_framework = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            file_path: None,
            thread_ids: false,
            file_location: false,
            spans: SpanMode::default(),
            suppressions: false,
            invocations: false,
            filters: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    #[cfg(feature = "json-log")]
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Span events written for each dispatched trigger and each invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanMode {
    #[default]
    Off,
    /// One line per closed span, with its busy and idle time.
    Timings,
    /// Span creation and close.
    Lifecycle,
    /// Creation, every enter and exit, and close.
    Full,
}

#[cfg(test)]
mod tests {
    use super::*;
    use belfry_framework::Outcome;

    fn rule() -> Rule {
        Rule::builder("ping")
            .command("ping")
            .rate_limit(RateLimit::per_actor(1, Duration::from_secs(10)))
            .handler(|| async { Outcome::Handled })
    }

    #[test]
    fn test_defaults() {
        let config = BelfryConfig::default();
        assert_eq!(config.core.nick, "Belfry");
        assert_eq!(config.core.command_prefix, r"\.");
        assert_eq!(config.dispatch.default_timeout(), Duration::from_secs(30));
        assert_eq!(config.dispatch.trigger_queue, 256);
        assert_eq!(config.scheduler.resolution(), Duration::from_secs(1));
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_match_settings_from_core() {
        let core = CoreConfig {
            nick: "bell".into(),
            alias_nicks: vec!["bb".into()],
            command_prefix: "!".into(),
            help_prefix: "!".into(),
        };
        let settings = core.match_settings();
        assert_eq!(settings.nick, "bell");
        assert_eq!(settings.aliases, vec!["bb".to_string()]);
        assert_eq!(settings.command_prefix, "!");
        assert_eq!(settings.help_prefix, "!");
    }

    #[test]
    fn test_rule_override_replaces_fields() {
        let ov = RuleOverride {
            priority: Some(Priority::High),
            mode: Some(ExecutionMode::Exclusive),
            timeout_secs: Some(5),
            rate_limits: Some(vec![RateLimitConfig {
                limit: 3,
                window_secs: 60,
                scope: RateLimitScope::Global,
            }]),
        };
        let rule = ov.apply(rule());

        assert_eq!(rule.priority(), Priority::High);
        assert!(rule.mode().is_exclusive());
        assert_eq!(rule.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(
            rule.rate_limits(),
            &[RateLimit::global(3, Duration::from_secs(60))]
        );
    }

    #[test]
    fn test_empty_override_keeps_rule() {
        let rule = RuleOverride::default().apply(rule());
        assert_eq!(rule.priority(), Priority::Medium);
        assert_eq!(rule.rate_limits().len(), 1);
        assert_eq!(rule.timeout(), None);
    }

    #[test]
    fn test_job_override() {
        let job = Job::builder("tick")
            .every(Duration::from_secs(60))
            .jitter(Duration::from_secs(5))
            .handler(|| async {});

        let job = JobOverride {
            interval_secs: Some(10),
            jitter_secs: Some(0),
            mode: Some(ExecutionMode::Exclusive),
            timeout_secs: None,
        }
        .apply(job);

        assert_eq!(job.interval(), Duration::from_secs(10));
        assert_eq!(job.jitter(), Jitter::None);
        assert!(job.mode().is_exclusive());
    }

    #[test]
    fn test_scope_names_in_config() {
        let parsed: RateLimitConfig =
            serde_json::from_str(r#"{"limit": 2, "window_secs": 30, "scope": "actor-target"}"#)
                .unwrap();
        assert_eq!(parsed.scope, RateLimitScope::ActorTarget);
    }
}
