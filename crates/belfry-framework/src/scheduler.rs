//! Periodic job scheduler.
//!
//! The [`JobScheduler`] keeps a table of jobs with their next-run time and
//! feeds due jobs to the shared [`Executor`]. Scheduling is based on the
//! nominal run time: a job registered with a 10 s interval is attempted at
//! t=10, 20, 30… regardless of how long each run takes. A run that would
//! overlap a still-running exclusive invocation is skipped, and its next-run
//! time advances all the same.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use belfry_core::{RegistryError, RegistryResult};

use crate::context::{Context, JobTick};
use crate::executor::{Executor, Invocation, InvocationKind};
use crate::job::Job;

/// Default tick loop resolution.
pub const DEFAULT_RESOLUTION: Duration = Duration::from_secs(1);

/// Observable state of a registered job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Waiting for its next-run time.
    Pending,
    /// At least one invocation is in flight.
    Running,
}

/// What one [`JobScheduler::tick`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub started: Vec<String>,
    pub skipped: Vec<String>,
}

struct JobEntry {
    job: Arc<Job>,
    /// Un-jittered run time on the job's cadence.
    nominal: Instant,
    /// `nominal` plus this cycle's jitter.
    next_run: Instant,
    running: Arc<AtomicUsize>,
}

impl JobEntry {
    fn new(job: Arc<Job>, nominal: Instant) -> Self {
        let mut entry = Self {
            job,
            nominal,
            next_run: nominal,
            running: Arc::new(AtomicUsize::new(0)),
        };
        entry.resample();
        entry
    }

    fn resample(&mut self) {
        let jitter = self.job.jitter().sample_with(rand::random::<f64>());
        self.next_run = self.nominal + jitter;
    }

    /// Moves to the first nominal time strictly after `now` and draws fresh
    /// jitter for it.
    fn advance(&mut self, now: Instant) {
        let interval = self.job.interval();
        let mut nominal = self.nominal + interval;
        while nominal <= now {
            nominal += interval;
        }
        self.nominal = nominal;
        self.resample();
    }
}

/// Runs registered jobs on their cadence.
pub struct JobScheduler {
    executor: Arc<Executor>,
    jobs: Mutex<Vec<JobEntry>>,
    resolution: Duration,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl JobScheduler {
    pub fn new(executor: Arc<Executor>, resolution: Duration) -> Self {
        Self {
            executor,
            jobs: Mutex::new(Vec::new()),
            resolution,
            shutdown: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn resolution(&self) -> Duration {
        self.resolution
    }

    pub fn register(&self, job: Job) -> RegistryResult<Arc<Job>> {
        self.register_at(job, Instant::now())
    }

    /// Registers `job` as if registration happened at `now`.
    ///
    /// The first run is due at `now` for run-on-load jobs, otherwise one
    /// interval (plus jitter) later.
    pub fn register_at(&self, job: Job, now: Instant) -> RegistryResult<Arc<Job>> {
        if job.interval().is_zero() {
            return Err(RegistryError::ZeroInterval(job.name().to_string()));
        }

        let mut jobs = self.jobs.lock();
        if jobs.iter().any(|e| e.job.name() == job.name()) {
            return Err(RegistryError::DuplicateName(job.name().to_string()));
        }

        let job = Arc::new(job);
        let entry = if job.run_on_load() {
            JobEntry {
                next_run: now,
                ..JobEntry::new(Arc::clone(&job), now)
            }
        } else {
            JobEntry::new(Arc::clone(&job), now + job.interval())
        };
        jobs.push(entry);

        info!(
            job = %job.name(),
            interval = ?job.interval(),
            plugin = job.plugin().unwrap_or("-"),
            "Registered job"
        );
        Ok(job)
    }

    /// Removes the job named `name`. In-flight runs are allowed to finish.
    pub fn unregister(&self, name: &str) -> bool {
        let mut jobs = self.jobs.lock();
        let Some(pos) = jobs.iter().position(|e| e.job.name() == name) else {
            return false;
        };
        jobs.remove(pos);
        drop(jobs);

        info!(job = %name, "Unregistered job");
        true
    }

    /// Starts or skips every job due at `now` and reschedules it.
    pub fn tick(&self, now: Instant) -> TickReport {
        let mut report = TickReport::default();
        let mut jobs = self.jobs.lock();

        for entry in jobs.iter_mut().filter(|e| e.next_run <= now) {
            let job = Arc::clone(&entry.job);
            let scheduled = entry.next_run;
            entry.advance(now);

            let token = if job.mode().is_exclusive() {
                match self.executor.try_acquire(InvocationKind::Job, job.name()) {
                    Some(token) => Some(token),
                    None => {
                        debug!(job = %job.name(), "Exclusive job still running, run skipped");
                        report.skipped.push(job.name().to_string());
                        continue;
                    }
                }
            } else {
                None
            };

            let ctx = Arc::new(Context::for_job(
                &job,
                JobTick {
                    scheduled,
                    started: now,
                },
            ));
            let running = Arc::clone(&entry.running);
            running.fetch_add(1, Ordering::SeqCst);

            let done = Arc::clone(&running);
            let submitted = self.executor.submit(
                Invocation::for_job(&job, ctx).with_token(token),
                move |_| {
                    done.fetch_sub(1, Ordering::SeqCst);
                },
            );
            if submitted.is_some() {
                report.started.push(job.name().to_string());
            } else {
                running.fetch_sub(1, Ordering::SeqCst);
                report.skipped.push(job.name().to_string());
            }
        }

        report
    }

    pub fn state(&self, name: &str) -> Option<JobState> {
        self.jobs
            .lock()
            .iter()
            .find(|e| e.job.name() == name)
            .map(|e| {
                if e.running.load(Ordering::SeqCst) > 0 {
                    JobState::Running
                } else {
                    JobState::Pending
                }
            })
    }

    pub fn next_run(&self, name: &str) -> Option<Instant> {
        self.jobs
            .lock()
            .iter()
            .find(|e| e.job.name() == name)
            .map(|e| e.next_run)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.next_run(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.jobs
            .lock()
            .iter()
            .map(|e| e.job.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawns the tick loop. Has no effect if the loop is already running or
    /// the scheduler was stopped.
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock();
        if handle.is_some() || self.shutdown.is_cancelled() {
            warn!("Job scheduler already started or stopped");
            return;
        }

        let scheduler: Weak<Self> = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        let resolution = self.resolution;

        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(resolution);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(scheduler) = scheduler.upgrade() else { break };
                        scheduler.tick(Instant::now());
                    }
                }
            }
            debug!("Job scheduler loop exited");
        }));

        info!(resolution = ?resolution, "Job scheduler started");
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some() && !self.shutdown.is_cancelled()
    }

    /// Cancels the tick loop and waits for it to exit. In-flight job runs
    /// are left to the executor.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Job scheduler loop ended abnormally: {e}");
            }
            info!("Job scheduler stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::JobTick;
    use tokio_test::{assert_err, assert_ok};

    fn scheduler() -> Arc<JobScheduler> {
        Arc::new(JobScheduler::new(
            Arc::new(Executor::default()),
            DEFAULT_RESOLUTION,
        ))
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_nominal_cadence() {
        let scheduler = scheduler();
        let t0 = Instant::now();
        let job = Job::builder("tick").every(secs(10)).handler(|| async {});
        assert_ok!(scheduler.register_at(job, t0));

        assert!(scheduler.tick(t0 + secs(9)).started.is_empty());
        for n in [10, 20, 30] {
            let report = scheduler.tick(t0 + secs(n));
            assert_eq!(report.started, ["tick"]);
            assert_eq!(scheduler.next_run("tick"), Some(t0 + secs(n + 10)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_tick_skips_whole_intervals() {
        let scheduler = scheduler();
        let t0 = Instant::now();
        let job = Job::builder("tick").every(secs(10)).handler(|| async {});
        assert_ok!(scheduler.register_at(job, t0));

        let report = scheduler.tick(t0 + secs(35));
        assert_eq!(report.started.len(), 1);
        assert_eq!(scheduler.next_run("tick"), Some(t0 + secs(40)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_on_load_and_tick_context() {
        let scheduler = scheduler();
        let t0 = Instant::now();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let job = Job::builder("boot")
            .every(secs(60))
            .run_on_load(true)
            .handler(move |tick: JobTick| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(tick);
                }
            });
        assert_ok!(scheduler.register_at(job, t0));

        assert_eq!(scheduler.tick(t0 + secs(2)).started, ["boot"]);
        let tick = rx.recv().await.unwrap();
        assert_eq!(tick.scheduled, t0);
        assert_eq!(tick.lag(), secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exclusive_job_skipped_while_running() {
        let scheduler = scheduler();
        let t0 = Instant::now();
        let job = Job::builder("slow")
            .every(secs(10))
            .exclusive()
            .timeout(secs(120))
            .handler(|| async { tokio::time::sleep(secs(25)).await });
        assert_ok!(scheduler.register_at(job, t0));

        assert_eq!(scheduler.tick(t0 + secs(10)).started, ["slow"]);
        tokio::task::yield_now().await;
        assert_eq!(scheduler.state("slow"), Some(JobState::Running));

        let report = scheduler.tick(t0 + secs(20));
        assert_eq!(report.skipped, ["slow"]);
        assert_eq!(scheduler.next_run("slow"), Some(t0 + secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_job_overlaps() {
        let scheduler = scheduler();
        let t0 = Instant::now();
        let job = Job::builder("slow")
            .every(secs(10))
            .timeout(secs(120))
            .handler(|| async { tokio::time::sleep(secs(25)).await });
        assert_ok!(scheduler.register_at(job, t0));

        assert_eq!(scheduler.tick(t0 + secs(10)).started, ["slow"]);
        assert_eq!(scheduler.tick(t0 + secs(20)).started, ["slow"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_never_negative() {
        let scheduler = scheduler();
        let t0 = Instant::now();
        let job = Job::builder("jittery")
            .every(secs(10))
            .jitter(secs(3))
            .handler(|| async {});
        assert_ok!(scheduler.register_at(job, t0));

        let next = scheduler.next_run("jittery").unwrap();
        assert!(next >= t0 + secs(10) && next <= t0 + secs(13));
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_does_not_drift() {
        let scheduler = scheduler();
        let t0 = Instant::now();
        let job = Job::builder("jittery")
            .every(secs(10))
            .jitter(secs(3))
            .handler(|| async {});
        assert_ok!(scheduler.register_at(job, t0));

        for cycle in 1..=50u64 {
            let due = scheduler.next_run("jittery").unwrap();
            let nominal = t0 + secs(cycle * 10);
            assert!(due >= nominal && due <= nominal + secs(3), "cycle {cycle}");
            assert_eq!(scheduler.tick(due).started, ["jittery"]);
        }
        let last = scheduler.next_run("jittery").unwrap();
        assert!(last >= t0 + secs(510) && last <= t0 + secs(513));
    }

    #[test]
    fn test_registration_errors() {
        let scheduler = scheduler();
        let now = Instant::now();

        let zero = Job::builder("zero").handler(|| async {});
        assert_eq!(
            assert_err!(scheduler.register_at(zero, now)),
            RegistryError::ZeroInterval("zero".into())
        );

        let a = Job::builder("a").every(secs(1)).handler(|| async {});
        let b = Job::builder("a").every(secs(2)).handler(|| async {});
        assert_ok!(scheduler.register_at(a, now));
        assert_eq!(
            assert_err!(scheduler.register_at(b, now)),
            RegistryError::DuplicateName("a".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_removes_job() {
        let scheduler = scheduler();
        let t0 = Instant::now();
        let job = Job::builder("gone").every(secs(1)).handler(|| async {});
        assert_ok!(scheduler.register_at(job, t0));

        assert!(scheduler.unregister("gone"));
        assert!(scheduler.tick(t0 + secs(5)).started.is_empty());
        assert_eq!(scheduler.state("gone"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_loop() {
        let scheduler = scheduler();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let job = Job::builder("ping").every(secs(5)).handler(move || {
            let tx = tx.clone();
            async move {
                let _ = tx.send(());
            }
        });
        assert_ok!(scheduler.register(job));

        scheduler.start();
        assert!(scheduler.is_running());

        tokio::time::sleep(secs(11)).await;
        let mut runs = 0;
        while rx.try_recv().is_ok() {
            runs += 1;
        }
        assert_eq!(runs, 2);

        scheduler.stop().await;
        assert!(!scheduler.is_running());
    }
}
