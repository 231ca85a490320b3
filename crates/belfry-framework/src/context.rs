//! Invocation context handed to handlers.
//!
//! One [`Context`] is built per admitted invocation. Rule invocations share
//! the trigger snapshot (`Arc<Trigger>`) with every sibling matched for the
//! same event, but each gets its own [`Captures`]. Job invocations carry a
//! [`JobTick`] instead.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;

use belfry_core::Trigger;

use crate::job::Job;
use crate::rule::Rule;

/// Group name holding the command name in command-style rules.
pub(crate) const COMMAND_GROUP: &str = "command";
/// Group name holding the command arguments in command-style rules.
pub(crate) const ARGS_GROUP: &str = "args";

/// Capture groups produced when a rule's match specification accepted a
/// trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captures {
    matched: String,
    groups: Vec<Option<String>>,
    named: HashMap<String, String>,
    /// Whether the pattern defines the command and args groups.
    command_style: bool,
}

impl Captures {
    /// Captures for rules that match without a pattern.
    pub fn whole(text: impl Into<String>) -> Self {
        Self {
            matched: text.into(),
            ..Default::default()
        }
    }

    pub(crate) fn from_regex(re: &regex::Regex, caps: &regex::Captures<'_>) -> Self {
        let matched = caps
            .get(0)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let groups = (1..caps.len())
            .map(|i| caps.get(i).map(|m| m.as_str().to_string()))
            .collect();
        let named = re
            .capture_names()
            .flatten()
            .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
            .collect();
        let command_style = re.capture_names().flatten().any(|name| name == COMMAND_GROUP);

        Self {
            matched,
            groups,
            named,
            command_style,
        }
    }

    /// The full matched text (group 0).
    pub fn matched(&self) -> &str {
        &self.matched
    }

    /// Group `index`, where `0` is the whole match.
    pub fn group(&self, index: usize) -> Option<&str> {
        if index == 0 {
            return Some(&self.matched);
        }
        self.groups.get(index - 1).and_then(|g| g.as_deref())
    }

    pub fn name(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }

    /// Number of explicit groups, not counting the whole match.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// The command name, for command-style rules.
    ///
    /// For other patterns this is group 1.
    pub fn command(&self) -> Option<&str> {
        if self.command_style {
            self.name(COMMAND_GROUP)
        } else {
            self.group(1)
        }
    }

    /// Everything after the command name, for command-style rules.
    ///
    /// For other patterns this is group 2.
    pub fn args(&self) -> Option<&str> {
        if self.command_style {
            self.name(ARGS_GROUP)
        } else {
            self.group(2)
        }
    }
}

/// Scheduling facts for one job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTick {
    /// When the run was due.
    pub scheduled: Instant,
    /// When the scheduler actually started it.
    pub started: Instant,
}

impl JobTick {
    /// How late the run started relative to its schedule.
    pub fn lag(&self) -> std::time::Duration {
        self.started.saturating_duration_since(self.scheduled)
    }
}

/// What caused an invocation.
#[derive(Debug, Clone)]
pub enum Origin {
    Rule {
        trigger: Arc<Trigger>,
        captures: Captures,
    },
    Job(JobTick),
}

/// The full context passed to a handler.
#[derive(Debug)]
pub struct Context {
    name: String,
    plugin: Option<String>,
    origin: Origin,
    config: Arc<Value>,
}

impl Context {
    pub(crate) fn for_rule(rule: &Rule, trigger: Arc<Trigger>, captures: Captures) -> Self {
        Self {
            name: rule.name().to_string(),
            plugin: rule.plugin().map(str::to_string),
            origin: Origin::Rule { trigger, captures },
            config: Arc::clone(rule.config()),
        }
    }

    pub(crate) fn for_job(job: &Job, tick: JobTick) -> Self {
        Self {
            name: job.name().to_string(),
            plugin: job.plugin().map(str::to_string),
            origin: Origin::Job(tick),
            config: Arc::clone(job.config()),
        }
    }

    /// Name of the rule or job being invoked.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the plugin that registered the rule or job, if any.
    pub fn plugin(&self) -> Option<&str> {
        self.plugin.as_deref()
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn trigger(&self) -> Option<&Arc<Trigger>> {
        match &self.origin {
            Origin::Rule { trigger, .. } => Some(trigger),
            Origin::Job(_) => None,
        }
    }

    pub fn captures(&self) -> Option<&Captures> {
        match &self.origin {
            Origin::Rule { captures, .. } => Some(captures),
            Origin::Job(_) => None,
        }
    }

    pub fn tick(&self) -> Option<&JobTick> {
        match &self.origin {
            Origin::Job(tick) => Some(tick),
            Origin::Rule { .. } => None,
        }
    }

    /// The plugin's raw configuration section (`Value::Null` when absent).
    pub fn config(&self) -> &Arc<Value> {
        &self.config
    }

    /// Deserialises the plugin configuration section into `T`.
    pub fn get_config<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(self.config.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn test_captures_from_regex() {
        let re = Regex::new(r"^\.(?P<cmd>\w+)(?:\s+(.*))?$").unwrap();
        let caps = re.captures(".seen alice").unwrap();
        let captures = Captures::from_regex(&re, &caps);

        assert_eq!(captures.matched(), ".seen alice");
        assert_eq!(captures.command(), Some("seen"));
        assert_eq!(captures.args(), Some("alice"));
        assert_eq!(captures.name("cmd"), Some("seen"));
        assert_eq!(captures.len(), 2);
    }

    #[test]
    fn test_captures_missing_optional_group() {
        let re = Regex::new(r"^\.(\w+)(?:\s+(.*))?$").unwrap();
        let caps = re.captures(".ping").unwrap();
        let captures = Captures::from_regex(&re, &caps);

        assert_eq!(captures.command(), Some("ping"));
        assert_eq!(captures.args(), None);
        assert_eq!(captures.group(9), None);
    }

    #[test]
    fn test_whole_captures() {
        let captures = Captures::whole("hello");
        assert_eq!(captures.group(0), Some("hello"));
        assert!(captures.is_empty());
    }
}
