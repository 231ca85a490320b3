//! Declarative policies attached to rules and jobs.
//!
//! These are plain values supplied at registration time, either in code or
//! through the runtime's configuration overrides. The engine never mutates
//! them.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::trigger::Trigger;

/// Ordering tier of a rule. Higher tiers are submitted first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// Concurrency policy for invocations of one rule or job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Any number of invocations may run at once.
    #[default]
    Concurrent,
    /// At most one invocation may be in flight bot-wide.
    Exclusive,
}

impl ExecutionMode {
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::Exclusive)
    }
}

/// Identity a rate-limit counter is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RateLimitScope {
    /// One counter per actor nick.
    Actor,
    /// One counter per channel (or direct-message peer).
    Target,
    /// One counter per actor within one target.
    ActorTarget,
    /// One counter for the whole bot.
    Global,
}

impl RateLimitScope {
    /// Computes the counter key for `trigger` under this scope.
    pub fn key(&self, trigger: &Trigger) -> ScopeKey {
        match self {
            Self::Actor => ScopeKey::Actor(trigger.actor().nick().to_string()),
            Self::Target => ScopeKey::Target(trigger.target().key().to_string()),
            Self::ActorTarget => ScopeKey::ActorTarget(
                trigger.actor().nick().to_string(),
                trigger.target().key().to_string(),
            ),
            Self::Global => ScopeKey::Global,
        }
    }
}

/// Concrete key of one rate-limit counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    Actor(String),
    Target(String),
    ActorTarget(String, String),
    Global,
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Actor(nick) => write!(f, "actor:{nick}"),
            Self::Target(target) => write!(f, "target:{target}"),
            Self::ActorTarget(nick, target) => write!(f, "actor:{nick}@{target}"),
            Self::Global => f.write_str("global"),
        }
    }
}

/// At most `limit` admitted invocations per `window`, counted per scope key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateLimit {
    pub limit: u32,
    pub window: Duration,
    pub scope: RateLimitScope,
}

impl RateLimit {
    pub fn new(limit: u32, window: Duration, scope: RateLimitScope) -> Self {
        Self {
            limit,
            window,
            scope,
        }
    }

    pub fn per_actor(limit: u32, window: Duration) -> Self {
        Self::new(limit, window, RateLimitScope::Actor)
    }

    pub fn per_target(limit: u32, window: Duration) -> Self {
        Self::new(limit, window, RateLimitScope::Target)
    }

    pub fn per_actor_in_target(limit: u32, window: Duration) -> Self {
        Self::new(limit, window, RateLimitScope::ActorTarget)
    }

    pub fn global(limit: u32, window: Duration) -> Self {
        Self::new(limit, window, RateLimitScope::Global)
    }
}

/// Random offset added to a job's next-run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    #[default]
    None,
    /// Uniformly sampled from `[0, bound]`, independently for every cycle.
    Uniform(Duration),
}

impl Jitter {
    /// Samples an offset using `unit`, a value in `[0, 1)`.
    pub fn sample_with(&self, unit: f64) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Uniform(bound) => bound.mul_f64(unit.clamp(0.0, 1.0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::Target;

    #[test]
    fn test_priority_order() {
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
        assert_eq!("HIGH".parse::<Priority>(), Ok(Priority::High));
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_scope_keys() {
        let trigger = Trigger::builder("alice", Target::channel("#rust")).build();

        assert_eq!(
            RateLimitScope::Actor.key(&trigger),
            ScopeKey::Actor("alice".into())
        );
        assert_eq!(
            RateLimitScope::Target.key(&trigger),
            ScopeKey::Target("#rust".into())
        );
        assert_eq!(
            RateLimitScope::ActorTarget.key(&trigger),
            ScopeKey::ActorTarget("alice".into(), "#rust".into())
        );
        assert_eq!(RateLimitScope::Global.key(&trigger), ScopeKey::Global);
    }

    #[test]
    fn test_actor_target_differs_per_channel() {
        let a = Trigger::builder("alice", Target::channel("#a")).build();
        let b = Trigger::builder("alice", Target::channel("#b")).build();
        assert_ne!(
            RateLimitScope::ActorTarget.key(&a),
            RateLimitScope::ActorTarget.key(&b)
        );
    }

    #[test]
    fn test_jitter_sampling_is_bounded() {
        let jitter = Jitter::Uniform(Duration::from_secs(4));
        assert_eq!(jitter.sample_with(0.0), Duration::ZERO);
        assert_eq!(jitter.sample_with(0.5), Duration::from_secs(2));
        assert!(jitter.sample_with(7.0) <= Duration::from_secs(4));
        assert_eq!(Jitter::None.sample_with(0.9), Duration::ZERO);
    }
}
