//! Rule definitions.
//!
//! A [`Rule`] is a plain descriptor: a unique name, one or more
//! [`MatchSpec`]s, filters, policies and the handler service to invoke. Rules
//! are built with [`Rule::builder`] and are immutable once registered.
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use belfry_framework::{Captures, Priority, RateLimit, Rule};
//!
//! let rule = Rule::builder("seen")
//!     .command("seen")
//!     .priority(Priority::High)
//!     .rate_limit(RateLimit::per_actor(1, Duration::from_secs(10)))
//!     .handler(|captures: Captures| async move {
//!         tracing::info!(nick = ?captures.args(), "seen lookup");
//!     });
//! ```

mod matching;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tower::BoxError;

use belfry_core::{DEFAULT_EVENT, ExecutionMode, Outcome, Priority, RateLimit};

use crate::context::Context;
use crate::handler::{BoxedHandlerService, Handler, boxed, into_service};

pub use matching::{CompiledRule, DEFAULT_HELP_PREFIX, MatchSettings};

/// How a [`MatchSpec::Pattern`] is applied to the trigger text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatternMode {
    /// The pattern must match at the start of the text.
    #[default]
    Anchored,
    /// The pattern may match anywhere in the text.
    Search,
    /// Every non-overlapping match produces its own invocation.
    FindAll,
}

/// One way a rule can accept a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchSpec {
    /// `<prefix><name>[ args]`; captures 1 = command, 2 = args.
    Command(Vec<String>),
    /// `<nick>[:,] <name>[ args]`, addressed to the bot by nick or alias.
    NicknameCommand(Vec<String>),
    /// `<name>[ args]` inside an `ACTION` intent, without a prefix.
    ActionCommand(Vec<String>),
    /// A user regex; `$nickname` is replaced by the bot's nicks.
    Pattern { pattern: String, mode: PatternMode },
    /// One invocation per URL in the text that matches the regex.
    Url(String),
    /// Every trigger that passes the rule's filters.
    Event,
}

/// A registered rule.
#[derive(Clone)]
pub struct Rule {
    name: String,
    specs: Vec<MatchSpec>,
    events: Vec<String>,
    intents: Vec<String>,
    priority: Priority,
    mode: ExecutionMode,
    rate_limits: Vec<RateLimit>,
    timeout: Option<Duration>,
    echo: bool,
    case_insensitive: bool,
    unblockable: bool,
    doc: Option<String>,
    examples: Vec<Example>,
    config: Arc<Value>,
    plugin: Option<String>,
    service: BoxedHandlerService,
}

impl Rule {
    pub fn builder(name: impl Into<String>) -> RuleBuilder {
        RuleBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn specs(&self) -> &[MatchSpec] {
        &self.specs
    }

    /// Upper-cased event kinds this rule listens to.
    pub fn events(&self) -> &[String] {
        &self.events
    }

    pub fn intents(&self) -> &[String] {
        &self.intents
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn rate_limits(&self) -> &[RateLimit] {
        &self.rate_limits
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether the bot's own echoed messages may match.
    pub fn echo(&self) -> bool {
        self.echo
    }

    pub fn is_case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    /// Whether the rule bypasses rate limiting.
    pub fn is_unblockable(&self) -> bool {
        self.unblockable
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    pub fn examples(&self) -> &[Example] {
        &self.examples
    }

    /// Command names this rule documents: its prefixed and nickname
    /// commands, in declaration order.
    pub fn documented_commands(&self) -> impl Iterator<Item = &str> {
        self.specs
            .iter()
            .filter_map(|spec| match spec {
                MatchSpec::Command(names) | MatchSpec::NicknameCommand(names) => Some(names),
                _ => None,
            })
            .flatten()
            .map(String::as_str)
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

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
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

    /// Replaces every rate limit of the rule.
    pub fn with_rate_limits(mut self, limits: impl IntoIterator<Item = RateLimit>) -> Self {
        self.rate_limits.clear();
        for limit in limits {
            push_rate_limit(&mut self.rate_limits, limit);
        }
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

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("specs", &self.specs)
            .field("events", &self.events)
            .field("priority", &self.priority)
            .field("mode", &self.mode)
            .field("rate_limits", &self.rate_limits)
            .field("timeout", &self.timeout)
            .field("unblockable", &self.unblockable)
            .field("plugin", &self.plugin)
            .finish_non_exhaustive()
    }
}

/// A usage example attached to a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Example {
    pub text: String,
    /// Shown in command help. When no example of a rule is marked, the
    /// first one is shown.
    pub user_help: bool,
}

/// At most one limit per scope; a later limit for the same scope wins.
fn push_rate_limit(limits: &mut Vec<RateLimit>, limit: RateLimit) {
    limits.retain(|l| l.scope != limit.scope);
    limits.push(limit);
}

// ============================================================================
// RuleBuilder
// ============================================================================

/// Builder for [`Rule`]. The rule is finished by attaching its handler.
#[derive(Debug)]
pub struct RuleBuilder {
    name: String,
    specs: Vec<MatchSpec>,
    events: Vec<String>,
    intents: Vec<String>,
    priority: Priority,
    mode: ExecutionMode,
    rate_limits: Vec<RateLimit>,
    timeout: Option<Duration>,
    echo: bool,
    case_insensitive: bool,
    unblockable: bool,
    doc: Option<String>,
    examples: Vec<Example>,
}

impl RuleBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            specs: Vec::new(),
            events: Vec::new(),
            intents: Vec::new(),
            priority: Priority::default(),
            mode: ExecutionMode::default(),
            rate_limits: Vec::new(),
            timeout: None,
            echo: false,
            case_insensitive: false,
            unblockable: false,
            doc: None,
            examples: Vec::new(),
        }
    }

    pub fn spec(mut self, spec: MatchSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn command(self, name: impl Into<String>) -> Self {
        self.commands([name])
    }

    pub fn commands<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec(MatchSpec::Command(names.into_iter().map(Into::into).collect()))
    }

    pub fn nickname_command(self, name: impl Into<String>) -> Self {
        self.spec(MatchSpec::NicknameCommand(vec![name.into()]))
    }

    pub fn action_command(self, name: impl Into<String>) -> Self {
        self.spec(MatchSpec::ActionCommand(vec![name.into()]))
    }

    /// Adds a pattern that must match at the start of the text.
    pub fn pattern(self, pattern: impl Into<String>) -> Self {
        self.spec(MatchSpec::Pattern {
            pattern: pattern.into(),
            mode: PatternMode::Anchored,
        })
    }

    /// Adds a pattern that may match anywhere in the text.
    pub fn search(self, pattern: impl Into<String>) -> Self {
        self.spec(MatchSpec::Pattern {
            pattern: pattern.into(),
            mode: PatternMode::Search,
        })
    }

    /// Adds a pattern producing one invocation per match.
    pub fn find(self, pattern: impl Into<String>) -> Self {
        self.spec(MatchSpec::Pattern {
            pattern: pattern.into(),
            mode: PatternMode::FindAll,
        })
    }

    pub fn url(self, pattern: impl Into<String>) -> Self {
        self.spec(MatchSpec::Url(pattern.into()))
    }

    /// Listens to `event` instead of the default `PRIVMSG`. May be repeated.
    pub fn event(mut self, event: impl AsRef<str>) -> Self {
        let event = event.as_ref().to_uppercase();
        if !self.events.contains(&event) {
            self.events.push(event);
        }
        self
    }

    /// Only accepts triggers whose intent matches `pattern`
    /// (case-insensitive). May be repeated.
    pub fn intent(mut self, pattern: impl Into<String>) -> Self {
        self.intents.push(pattern.into());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
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

    pub fn rate_limit(mut self, limit: RateLimit) -> Self {
        push_rate_limit(&mut self.rate_limits, limit);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    /// Exempts the rule from its rate limits.
    pub fn unblockable(mut self) -> Self {
        self.unblockable = true;
        self
    }

    /// Help text shown for the rule's commands.
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    /// Adds a usage example. `$nickname` is replaced by the bot's nick when
    /// help is rendered.
    pub fn example(mut self, text: impl Into<String>) -> Self {
        self.examples.push(Example {
            text: text.into(),
            user_help: false,
        });
        self
    }

    /// Adds a usage example that is always shown in command help.
    pub fn help_example(mut self, text: impl Into<String>) -> Self {
        self.examples.push(Example {
            text: text.into(),
            user_help: true,
        });
        self
    }

    /// Finishes the rule with an async handler function.
    pub fn handler<H, T>(self, handler: H) -> Rule
    where
        H: Handler<T>,
        T: 'static,
    {
        self.build(into_service(handler))
    }

    /// Finishes the rule with an arbitrary tower service.
    pub fn service<S>(self, service: S) -> Rule
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

    fn build(mut self, service: BoxedHandlerService) -> Rule {
        if self.specs.is_empty() {
            self.specs.push(MatchSpec::Event);
        }
        if self.events.is_empty() {
            self.events.push(DEFAULT_EVENT.to_string());
        }

        Rule {
            name: self.name,
            specs: self.specs,
            events: self.events,
            intents: self.intents,
            priority: self.priority,
            mode: self.mode,
            rate_limits: self.rate_limits,
            timeout: self.timeout,
            echo: self.echo,
            case_insensitive: self.case_insensitive,
            unblockable: self.unblockable,
            doc: self.doc,
            examples: self.examples,
            config: Arc::new(Value::Null),
            plugin: None,
            service,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let rule = Rule::builder("greet").handler(|| async {});

        assert_eq!(rule.specs(), &[MatchSpec::Event]);
        assert_eq!(rule.events(), &[DEFAULT_EVENT.to_string()]);
        assert_eq!(rule.priority(), Priority::Medium);
        assert_eq!(rule.mode(), ExecutionMode::Concurrent);
        assert!(!rule.echo());
        assert!(!rule.is_unblockable());
        assert!(rule.doc().is_none() && rule.examples().is_empty());
        assert!(rule.config().is_null());
    }

    #[test]
    fn test_documented_commands() {
        let rule = Rule::builder("help")
            .command("help")
            .nickname_command("commands")
            .action_command("asks")
            .pattern("^help me")
            .handler(|| async {});

        let commands: Vec<&str> = rule.documented_commands().collect();
        assert_eq!(commands, ["help", "commands"]);
    }

    #[test]
    fn test_one_rate_limit_per_scope() {
        let rule = Rule::builder("ping")
            .command("ping")
            .rate_limit(RateLimit::per_actor(1, Duration::from_secs(10)))
            .rate_limit(RateLimit::global(5, Duration::from_secs(60)))
            .rate_limit(RateLimit::per_actor(2, Duration::from_secs(30)))
            .handler(|| async {});

        assert_eq!(rule.rate_limits().len(), 2);
        assert!(
            rule.rate_limits()
                .contains(&RateLimit::per_actor(2, Duration::from_secs(30)))
        );
    }

    #[test]
    fn test_events_are_uppercased() {
        let rule = Rule::builder("joins")
            .event("join")
            .event("JOIN")
            .event("part")
            .handler(|| async {});
        assert_eq!(rule.events(), &["JOIN".to_string(), "PART".to_string()]);
    }

    #[test]
    fn test_overrides() {
        let rule = Rule::builder("seen")
            .command("seen")
            .handler(|| async {})
            .with_priority(Priority::Low)
            .with_mode(ExecutionMode::Exclusive)
            .with_timeout(Duration::from_secs(5))
            .with_plugin("seen");

        assert_eq!(rule.priority(), Priority::Low);
        assert!(rule.mode().is_exclusive());
        assert_eq!(rule.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(rule.plugin(), Some("seen"));
    }
}
