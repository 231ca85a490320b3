//! Rate limiting for rule invocations.
//!
//! Counters are keyed on `(rule name, scope key)` and use fixed windows: a
//! counter resets when its window has fully elapsed. All counters live behind
//! one mutex, so a check for a rule with several limits is atomic.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use belfry_core::{RateLimit, ScopeKey, Trigger};

use crate::rule::Rule;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CounterKey {
    rule: String,
    scope: ScopeKey,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started: Instant,
    length: Duration,
}

impl Window {
    fn expired(&self, now: Instant) -> bool {
        now >= self.started + self.length
    }
}

/// Throttling state for every rule.
#[derive(Debug, Default)]
pub struct RateLimiter {
    counters: Mutex<HashMap<CounterKey, Window>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits or suppresses one invocation of `rule` for `trigger`, recording
    /// it against every limit of the rule when admitted.
    ///
    /// Unblockable rules are always admitted and leave no record.
    pub fn check_and_record(&self, rule: &Rule, trigger: &Trigger) -> bool {
        if rule.is_unblockable() {
            return true;
        }
        self.check_and_record_at(rule.name(), rule.rate_limits(), trigger, Instant::now())
    }

    /// [`check_and_record`](Self::check_and_record) with an explicit clock.
    ///
    /// Admission is all-or-nothing: if any limit suppresses, the counters
    /// already incremented by this call are rolled back.
    pub fn check_and_record_at(
        &self,
        rule: &str,
        limits: &[RateLimit],
        trigger: &Trigger,
        now: Instant,
    ) -> bool {
        if limits.is_empty() {
            return true;
        }

        let mut counters = self.counters.lock();
        let mut recorded: Vec<CounterKey> = Vec::with_capacity(limits.len());

        for limit in limits {
            let key = CounterKey {
                rule: rule.to_string(),
                scope: limit.scope.key(trigger),
            };
            let window = counters.entry(key.clone()).or_insert(Window {
                count: 0,
                started: now,
                length: limit.window,
            });
            window.length = limit.window;
            if window.expired(now) {
                window.count = 0;
                window.started = now;
            }

            if window.count < limit.limit {
                window.count += 1;
                recorded.push(key);
            } else {
                for key in &recorded {
                    if let Some(w) = counters.get_mut(key) {
                        w.count = w.count.saturating_sub(1);
                    }
                }
                debug!(
                    rule = %rule,
                    scope = %key.scope,
                    limit = limit.limit,
                    window = ?limit.window,
                    "Rate limit exhausted"
                );
                return false;
            }
        }

        true
    }

    /// Gives back one unit per limit of `rule` for `trigger`, never going
    /// below zero.
    pub fn refund(&self, rule: &Rule, trigger: &Trigger) {
        if rule.is_unblockable() {
            return;
        }
        self.refund_limits(rule.name(), rule.rate_limits(), trigger);
    }

    pub fn refund_limits(&self, rule: &str, limits: &[RateLimit], trigger: &Trigger) {
        if limits.is_empty() {
            return;
        }

        let mut counters = self.counters.lock();
        for limit in limits {
            let key = CounterKey {
                rule: rule.to_string(),
                scope: limit.scope.key(trigger),
            };
            if let Some(w) = counters.get_mut(&key) {
                w.count = w.count.saturating_sub(1);
                trace!(rule = %rule, scope = %key.scope, count = w.count, "Refunded rate budget");
            }
        }
    }

    /// Current count for `rule` under `scope`, if a counter exists.
    pub fn count(&self, rule: &str, scope: &ScopeKey) -> Option<u32> {
        let key = CounterKey {
            rule: rule.to_string(),
            scope: scope.clone(),
        };
        self.counters.lock().get(&key).map(|w| w.count)
    }

    /// Drops every counter of `rule`.
    pub fn forget(&self, rule: &str) {
        self.counters.lock().retain(|key, _| key.rule != rule);
    }

    /// Drops counters whose window has elapsed. Returns how many were removed.
    pub fn prune(&self, now: Instant) -> usize {
        let mut counters = self.counters.lock();
        let before = counters.len();
        counters.retain(|_, w| !w.expired(now));
        before - counters.len()
    }

    pub fn len(&self) -> usize {
        self.counters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
