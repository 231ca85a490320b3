//! Rule registry.
//!
//! The [`RuleRegistry`] owns every registered rule in its compiled form and
//! answers "which rules accept this trigger, in which order". Candidates are
//! ordered by priority tier (high first) and then by registration sequence.
//!
//! The registry also answers help lookups: rules with a doc or examples
//! document each of their prefixed and nickname commands.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use belfry_core::{Priority, RegistryError, RegistryResult, Trigger};

use crate::context::Captures;
use crate::rule::{CompiledRule, Example, MatchSettings, Rule};

/// A rule accepted by a trigger, with the captures for one invocation.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub rule: Arc<Rule>,
    pub captures: Captures,
}

/// Help for one command, with examples rendered for the bot's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandHelp {
    pub rule: String,
    pub doc: Option<String>,
    pub examples: Vec<String>,
}

impl CommandHelp {
    fn for_rule(rule: &Rule, settings: &MatchSettings) -> Option<Self> {
        let mut shown: Vec<&Example> = rule.examples().iter().filter(|e| e.user_help).collect();
        if shown.is_empty() {
            shown.extend(rule.examples().first());
        }
        let examples: Vec<String> = shown
            .into_iter()
            .map(|e| settings.render_example(&e.text))
            .collect();

        if rule.doc().is_none() && examples.is_empty() {
            return None;
        }
        Some(Self {
            rule: rule.name().to_string(),
            doc: rule.doc().map(str::to_string),
            examples,
        })
    }
}

struct Entry {
    compiled: CompiledRule,
    priority: Priority,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    /// Sorted by `(priority desc, seq asc)`.
    entries: Vec<Entry>,
    next_seq: u64,
}

/// Holds all registered rules.
pub struct RuleRegistry {
    settings: MatchSettings,
    inner: RwLock<Inner>,
}

impl RuleRegistry {
    pub fn new(settings: MatchSettings) -> Self {
        Self {
            settings,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    /// Compiles and registers `rule`.
    ///
    /// Fails with [`RegistryError::DuplicateName`] if a rule with the same
    /// name exists, or [`RegistryError::InvalidPattern`] if one of its
    /// patterns does not compile.
    pub fn register(&self, rule: Rule) -> RegistryResult<Arc<Rule>> {
        let rule = Arc::new(rule);
        let compiled = CompiledRule::compile(Arc::clone(&rule), &self.settings)?;

        let mut inner = self.inner.write();
        if inner.entries.iter().any(|e| e.compiled.rule().name() == rule.name()) {
            return Err(RegistryError::DuplicateName(rule.name().to_string()));
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let priority = rule.priority();
        let pos = inner.entries.partition_point(|e| e.priority >= priority);
        inner.entries.insert(
            pos,
            Entry {
                compiled,
                priority,
                seq,
            },
        );

        info!(
            rule = %rule.name(),
            priority = %priority,
            plugin = rule.plugin().unwrap_or("-"),
            "Registered rule"
        );
        Ok(rule)
    }

    /// Removes the rule named `name`. Returns whether a rule was removed.
    ///
    /// Invocations already submitted for the rule keep running.
    pub fn unregister(&self, name: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(pos) = inner
            .entries
            .iter()
            .position(|e| e.compiled.rule().name() == name)
        else {
            return false;
        };
        let entry = inner.entries.remove(pos);
        drop(inner);

        info!(rule = %name, seq = entry.seq, "Unregistered rule");
        true
    }

    /// Returns every rule accepting `trigger`, in dispatch order.
    pub fn matches(&self, trigger: &Trigger) -> Vec<Candidate> {
        let mut out = Vec::new();
        self.for_each_match(trigger, |rule, captures| {
            out.push(Candidate {
                rule: Arc::clone(rule),
                captures,
            });
        });
        out
    }

    /// Calls `f` for every (rule, captures) pair accepting `trigger`, in
    /// dispatch order, while holding the registry read lock.
    ///
    /// `f` must not register or unregister rules.
    pub fn for_each_match<F>(&self, trigger: &Trigger, mut f: F)
    where
        F: FnMut(&Arc<Rule>, Captures),
    {
        let inner = self.inner.read();
        for entry in &inner.entries {
            for captures in entry.compiled.matches(trigger) {
                f(entry.compiled.rule(), captures);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Rule>> {
        self.inner
            .read()
            .entries
            .iter()
            .find(|e| e.compiled.rule().name() == name)
            .map(|e| Arc::clone(e.compiled.rule()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Help for `command`. When several rules document the same command,
    /// the first in dispatch order wins.
    pub fn help(&self, command: &str) -> Option<CommandHelp> {
        let inner = self.inner.read();
        inner
            .entries
            .iter()
            .map(|e| e.compiled.rule())
            .filter(|rule| rule.documented_commands().any(|c| c == command))
            .find_map(|rule| CommandHelp::for_rule(rule, &self.settings))
    }

    /// Help for every documented command, keyed by command name.
    pub fn help_index(&self) -> BTreeMap<String, CommandHelp> {
        let inner = self.inner.read();
        let mut index = BTreeMap::new();
        for rule in inner.entries.iter().map(|e| e.compiled.rule()) {
            let Some(help) = CommandHelp::for_rule(rule, &self.settings) else {
                continue;
            };
            for command in rule.documented_commands() {
                index
                    .entry(command.to_string())
                    .or_insert_with(|| help.clone());
            }
        }
        index
    }

    /// Rule names in dispatch order.
    pub fn names(&self) -> Vec<String> {
        self.inner
            .read()
            .entries
            .iter()
            .map(|e| e.compiled.rule().name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new(MatchSettings::default())
    }
}
