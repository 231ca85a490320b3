//! Invocation executor.
//!
//! The [`Executor`] runs admitted invocations as tokio tasks tracked by a
//! [`TaskTracker`]. Every invocation is bounded by a timeout and isolated
//! from panics, so a failing handler never affects its siblings.
//!
//! Exclusive rules and jobs hold an [`ExclusiveToken`] for as long as their
//! invocation runs. The token is released on drop, whatever the way the
//! invocation ended.

use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;
use tracing::{Instrument, Level, error, span, trace, warn};

use belfry_core::ExecutionResult;

use crate::context::Context;
use crate::handler::BoxedHandlerService;
use crate::job::Job;
use crate::rule::Rule;

/// Default per-invocation time budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Whether an invocation was caused by a trigger or by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvocationKind {
    Rule,
    Job,
}

impl fmt::Display for InvocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rule => f.write_str("rule"),
            Self::Job => f.write_str("job"),
        }
    }
}

type ExclusiveSet = Arc<Mutex<HashSet<(InvocationKind, String)>>>;

/// Guard marking an exclusive rule or job as in flight.
#[derive(Debug)]
pub struct ExclusiveToken {
    key: (InvocationKind, String),
    set: ExclusiveSet,
}

impl Drop for ExclusiveToken {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

/// One unit of work for the executor.
pub struct Invocation {
    name: String,
    kind: InvocationKind,
    service: BoxedHandlerService,
    ctx: Arc<Context>,
    timeout: Option<Duration>,
    token: Option<ExclusiveToken>,
}

impl Invocation {
    pub fn for_rule(rule: &Rule, ctx: Arc<Context>) -> Self {
        Self {
            name: rule.name().to_string(),
            kind: InvocationKind::Rule,
            service: rule.service().clone(),
            ctx,
            timeout: rule.timeout(),
            token: None,
        }
    }

    pub fn for_job(job: &Job, ctx: Arc<Context>) -> Self {
        Self {
            name: job.name().to_string(),
            kind: InvocationKind::Job,
            service: job.service().clone(),
            ctx,
            timeout: job.timeout(),
            token: None,
        }
    }

    /// Attaches the exclusivity token held for the duration of the run.
    pub fn with_token(mut self, token: Option<ExclusiveToken>) -> Self {
        self.token = token;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> InvocationKind {
        self.kind
    }
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    unthrottled: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    running: AtomicU64,
}

/// Snapshot of the executor's bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    pub submitted: u64,
    /// Invocations that returned normally, unthrottled ones included.
    pub completed: u64,
    pub unthrottled: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub running: u64,
}

/// Runs rule and job invocations.
pub struct Executor {
    tracker: TaskTracker,
    exclusive: ExclusiveSet,
    default_timeout: Duration,
    counters: Arc<Counters>,
}

impl Executor {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            tracker: TaskTracker::new(),
            exclusive: Arc::default(),
            default_timeout,
            counters: Arc::default(),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Marks `name` as in flight, or returns `None` if it already is.
    pub fn try_acquire(&self, kind: InvocationKind, name: &str) -> Option<ExclusiveToken> {
        let key = (kind, name.to_string());
        let mut set = self.exclusive.lock();
        if !set.insert(key.clone()) {
            return None;
        }
        Some(ExclusiveToken {
            key,
            set: Arc::clone(&self.exclusive),
        })
    }

    pub fn is_in_flight(&self, kind: InvocationKind, name: &str) -> bool {
        self.exclusive.lock().contains(&(kind, name.to_string()))
    }

    /// Spawns `invocation`. `on_complete` runs after the exclusivity token
    /// has been released, with the final result.
    ///
    /// Returns `None` without running anything once the executor is draining.
    pub fn submit<F>(
        &self,
        invocation: Invocation,
        on_complete: F,
    ) -> Option<JoinHandle<ExecutionResult>>
    where
        F: FnOnce(&ExecutionResult) + Send + 'static,
    {
        if self.tracker.is_closed() {
            warn!(
                kind = %invocation.kind,
                name = %invocation.name,
                "Executor is draining, invocation dropped"
            );
            return None;
        }

        let Invocation {
            name,
            kind,
            service,
            ctx,
            timeout,
            token,
        } = invocation;
        let budget = timeout.unwrap_or(self.default_timeout);
        let counters = Arc::clone(&self.counters);

        counters.submitted.fetch_add(1, Ordering::Relaxed);
        counters.running.fetch_add(1, Ordering::Relaxed);

        let span = span!(Level::DEBUG, "invoke", %kind, name = %name);
        let task = async move {
            let run = AssertUnwindSafe(service.oneshot(ctx)).catch_unwind();
            let result = match tokio::time::timeout(budget, run).await {
                Err(_elapsed) => ExecutionResult::TimedOut(budget),
                Ok(Ok(Ok(outcome))) => ExecutionResult::Completed(outcome),
                Ok(Ok(Err(err))) => ExecutionResult::Failed(err.to_string()),
                Ok(Err(panic)) => ExecutionResult::Failed(panic_message(panic.as_ref())),
            };
            drop(token);

            match &result {
                ExecutionResult::Completed(outcome) => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                    if result.is_unthrottled() {
                        counters.unthrottled.fetch_add(1, Ordering::Relaxed);
                    }
                    trace!(?outcome, "Invocation completed");
                }
                ExecutionResult::Failed(reason) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(%reason, "Invocation failed");
                }
                ExecutionResult::TimedOut(budget) => {
                    counters.timed_out.fetch_add(1, Ordering::Relaxed);
                    warn!(?budget, "Invocation timed out");
                }
            }
            counters.running.fetch_sub(1, Ordering::Relaxed);

            on_complete(&result);
            result
        };

        Some(self.tracker.spawn(task.instrument(span)))
    }

    pub fn stats(&self) -> ExecutorStats {
        let c = &self.counters;
        ExecutorStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            unthrottled: c.unthrottled.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            timed_out: c.timed_out.load(Ordering::Relaxed),
            running: c.running.load(Ordering::Relaxed),
        }
    }

    pub fn is_draining(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Stops accepting invocations and waits for the in-flight ones.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Captures;
    use belfry_core::{Outcome, Target, Trigger};
    use std::sync::atomic::AtomicUsize;
    use tokio_test::assert_ok;

    fn invocation(rule: Rule) -> Invocation {
        let trigger = Arc::new(
            Trigger::builder("alice", Target::channel("#rust"))
                .text(".x")
                .build(),
        );
        let ctx = Arc::new(Context::for_rule(&rule, trigger, Captures::whole(".x")));
        Invocation::for_rule(&rule, ctx)
    }

    #[tokio::test]
    async fn test_results_are_classified() {
        let executor = Executor::default();

        let ok = Rule::builder("ok").handler(|| async { Outcome::Unthrottled });
        let err = Rule::builder("err").handler(|| async { Err::<(), _>("boom") });
        let panics = Rule::builder("panics").handler(|| async {
            if true {
                panic!("kaboom");
            }
            Outcome::Handled
        });

        let ok = executor.submit(invocation(ok), |_| {}).unwrap();
        let err = executor.submit(invocation(err), |_| {}).unwrap();
        let panics = executor.submit(invocation(panics), |_| {}).unwrap();

        assert_eq!(
            assert_ok!(ok.await),
            ExecutionResult::Completed(Outcome::Unthrottled)
        );
        assert_eq!(
            assert_ok!(err.await),
            ExecutionResult::Failed("boom".into())
        );
        assert!(matches!(
            assert_ok!(panics.await),
            ExecutionResult::Failed(ref msg) if msg.contains("kaboom")
        ));

        let stats = executor.stats();
        assert_eq!(stats.submitted, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.unthrottled, 1);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.running, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_token() {
        let executor = Executor::new(Duration::from_secs(1));
        let rule = Rule::builder("slow")
            .exclusive()
            .handler(|| async { tokio::time::sleep(Duration::from_secs(60)).await });

        let token = executor.try_acquire(InvocationKind::Rule, "slow");
        assert!(token.is_some());
        assert!(executor.try_acquire(InvocationKind::Rule, "slow").is_none());

        let handle = executor
            .submit(invocation(rule).with_token(token), |_| {})
            .unwrap();
        assert_eq!(
            assert_ok!(handle.await),
            ExecutionResult::TimedOut(Duration::from_secs(1))
        );
        assert!(!executor.is_in_flight(InvocationKind::Rule, "slow"));
        assert_eq!(executor.stats().timed_out, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rule_timeout_overrides_default() {
        let executor = Executor::new(Duration::from_secs(60));
        let rule = Rule::builder("slow")
            .timeout(Duration::from_millis(100))
            .handler(|| async { tokio::time::sleep(Duration::from_secs(1)).await });

        let handle = executor.submit(invocation(rule), |_| {}).unwrap();
        assert!(assert_ok!(handle.await).is_timeout());
    }

    #[tokio::test]
    async fn test_on_complete_sees_result() {
        let executor = Executor::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let rule = Rule::builder("ok").handler(|| async { Outcome::Unthrottled });

        let counter = Arc::clone(&seen);
        executor.submit(invocation(rule), move |result| {
            if result.is_unthrottled() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        executor.drain().await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drain_rejects_new_work() {
        let executor = Executor::default();
        executor.drain().await;

        let rule = Rule::builder("late").handler(|| async {});
        assert!(executor.submit(invocation(rule), |_| {}).is_none());
        assert!(executor.is_draining());
        assert_eq!(executor.stats().submitted, 0);
    }
}
