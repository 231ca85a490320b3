//! Trigger dispatcher for the Belfry framework.
//!
//! The [`Dispatcher`] is the sequential entry point for inbound triggers.
//! For each trigger it:
//!
//! 1. Asks the [`RuleRegistry`] for candidates, in priority order
//! 2. Checks each candidate against the [`RateLimiter`]
//! 3. Checks exclusivity for exclusive rules
//! 4. Submits admitted candidates to the [`Executor`]
//!
//! It never waits for handlers. Matching, rate accounting and submission for
//! one trigger happen under the registry read lock, so a concurrent
//! `unregister` lands either before or after the whole trigger.

use std::fmt;
use std::sync::Arc;

use tracing::{Level, debug, span};

use belfry_core::{ExecutionResult, Suppression, Trigger};

use crate::context::Context;
use crate::executor::{Executor, Invocation, InvocationKind};
use crate::ratelimit::RateLimiter;
use crate::registry::RuleRegistry;
use crate::rule::Rule;

/// Hook called for every matched candidate that was not submitted.
pub trait SuppressionNotifier: Send + Sync {
    fn suppressed(&self, rule: &Rule, trigger: &Trigger, reason: Suppression);
}

/// What happened to one trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Candidate invocations produced by matching.
    pub matched: usize,
    pub submitted: usize,
    pub rate_limited: usize,
    /// Suppressed because the exclusive rule was already in flight.
    pub exclusive: usize,
}

/// The central trigger dispatcher.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<RuleRegistry>,
    limiter: Arc<RateLimiter>,
    executor: Arc<Executor>,
    notifier: Option<Arc<dyn SuppressionNotifier>>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<RuleRegistry>,
        limiter: Arc<RateLimiter>,
        executor: Arc<Executor>,
    ) -> Self {
        Self {
            registry,
            limiter,
            executor,
            notifier: None,
        }
    }

    /// Attaches a hook told about every suppressed candidate.
    pub fn with_notifier(mut self, notifier: Arc<dyn SuppressionNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
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

    /// Matches `trigger` and submits every admitted candidate.
    ///
    /// Candidates are rate limited first. An exclusive rule already in
    /// flight is suppressed afterwards and its rate record is refunded.
    /// Budget consumed by an invocation that returns
    /// [`Outcome::Unthrottled`](belfry_core::Outcome) is refunded when it
    /// completes.
    pub fn on_trigger(&self, trigger: impl Into<Arc<Trigger>>) -> DispatchReport {
        let trigger: Arc<Trigger> = trigger.into();
        let span = span!(
            Level::DEBUG,
            "dispatch",
            event = %trigger.event(),
            actor = %trigger.actor().nick(),
            channel = %trigger.target()
        );
        let _enter = span.enter();

        let mut report = DispatchReport::default();

        self.registry.for_each_match(&trigger, |rule, captures| {
            report.matched += 1;

            if !self.limiter.check_and_record(rule, &trigger) {
                report.rate_limited += 1;
                self.suppress(rule, &trigger, Suppression::RateLimited);
                return;
            }

            let token = if rule.mode().is_exclusive() {
                match self.executor.try_acquire(InvocationKind::Rule, rule.name()) {
                    Some(token) => Some(token),
                    None => {
                        self.limiter.refund(rule, &trigger);
                        report.exclusive += 1;
                        self.suppress(rule, &trigger, Suppression::Exclusive);
                        return;
                    }
                }
            } else {
                None
            };

            let ctx = Arc::new(Context::for_rule(rule, Arc::clone(&trigger), captures));
            let invocation = Invocation::for_rule(rule, ctx).with_token(token);

            let on_complete = {
                let limiter = Arc::clone(&self.limiter);
                let rule = Arc::clone(rule);
                let trigger = Arc::clone(&trigger);
                move |result: &ExecutionResult| {
                    if result.is_unthrottled() {
                        limiter.refund(&rule, &trigger);
                    }
                }
            };

            if self.executor.submit(invocation, on_complete).is_some() {
                report.submitted += 1;
            } else {
                self.limiter.refund(rule, &trigger);
            }
        });

        if report.matched > 0 {
            debug!(
                matched = report.matched,
                submitted = report.submitted,
                rate_limited = report.rate_limited,
                exclusive = report.exclusive,
                "Dispatched trigger"
            );
        }
        report
    }

    fn suppress(&self, rule: &Rule, trigger: &Trigger, reason: Suppression) {
        debug!(rule = %rule.name(), %reason, "Candidate suppressed");
        if let Some(notifier) = &self.notifier {
            notifier.suppressed(rule, trigger, reason);
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("rules", &self.registry.len())
            .field("notifier", &self.notifier.is_some())
            .finish()
    }
}
