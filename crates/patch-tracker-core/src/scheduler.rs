//! Periodic scheduling of tracking cycles.
//!
//! [`Scheduler`] owns two periodic jobs: a scan that enqueues one cycle per
//! enabled tracking, and a slower check that bootstraps trackings with an
//! empty watermark. One-shot jobs are deduplicated by `<repo>:<branch>` so
//! a tracking never has two cycles in flight, and a semaphore bounds how
//! many cycles run at once.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tracking_state::TrackingConfig;

use crate::cycle::Tracker;
use crate::error::{Result, TrackerError};
use crate::http::CredentialCheck;
use crate::pipeline::WORK_BRANCH_PREFIX;

/// Timing and concurrency knobs for the [`Scheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub scan_interval: Duration,
    pub empty_watermark_interval: Duration,
    pub max_workers: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(3600),
            empty_watermark_interval: Duration::from_secs(600),
            max_workers: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Cycle,
    Bootstrap,
}

struct Inner {
    tracker: Tracker,
    workers: Arc<Semaphore>,
    running: Mutex<HashSet<String>>,
    idle: Notify,
}

/// Removes a job from the running set when its task ends, panics included.
struct RunningGuard {
    inner: Arc<Inner>,
    job_id: String,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let mut running = self.inner.running();
        running.remove(&self.job_id);
        if running.is_empty() {
            self.inner.idle.notify_waiters();
        }
    }
}

impl Inner {
    fn running(&self) -> MutexGuard<'_, HashSet<String>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn schedule(self: &Arc<Self>, job: Job, config: TrackingConfig) -> bool {
        let job_id = config.key().job_id();
        if !self.running().insert(job_id.clone()) {
            debug!(job = %job_id, "job already running, not scheduled");
            return false;
        }

        let guard = RunningGuard {
            inner: Arc::clone(self),
            job_id,
        };
        let workers = Arc::clone(&self.workers);
        let tracker = self.tracker.clone();
        tokio::spawn(async move {
            let Ok(_permit) = workers.acquire_owned().await else {
                return;
            };
            let outcome = match job {
                Job::Cycle => tracker.run_cycle(&config).await,
                Job::Bootstrap => tracker.bootstrap_watermark(&config).await,
            };
            debug!(job = %guard.job_id, outcome = outcome.label(), "job finished");
        });
        true
    }

    async fn enabled_trackings(&self) -> Vec<TrackingConfig> {
        match self.tracker.store().list_enabled().await {
            Ok(trackings) => trackings
                .into_iter()
                .filter(|t| {
                    let own = t.branch.starts_with(WORK_BRANCH_PREFIX);
                    if own {
                        debug!(repo = %t.repo, branch = %t.branch, "skipping patch-tracking branch");
                    }
                    !own
                })
                .collect(),
            Err(err) => {
                error!(error = %err, "failed to list enabled trackings");
                Vec::new()
            }
        }
    }

    async fn scan(self: &Arc<Self>) -> usize {
        let trackings = self.enabled_trackings().await;
        let total = trackings.len();
        let scheduled = trackings
            .into_iter()
            .filter(|t| self.schedule(Job::Cycle, t.clone()))
            .count();
        info!(trackings = total, scheduled, "scan finished");
        scheduled
    }

    async fn bootstrap_empty(self: &Arc<Self>) -> usize {
        let scheduled = self
            .enabled_trackings()
            .await
            .into_iter()
            .filter(|t| t.watermark().is_none())
            .filter(|t| self.schedule(Job::Bootstrap, t.clone()))
            .count();
        if scheduled > 0 {
            info!(scheduled, "bootstrapping empty watermarks");
        }
        scheduled
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.running().is_empty() {
                return;
            }
            notified.await;
        }
    }
}

/// Process-scoped scheduler with an explicit start/shutdown lifecycle.
pub struct Scheduler {
    inner: Arc<Inner>,
    config: SchedulerConfig,
    started: AtomicBool,
    shutdown: watch::Sender<bool>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Verify every credential, then build a scheduler. A rejected token
    /// fails with [`TrackerError::CredentialInvalid`] and nothing is
    /// scheduled.
    pub async fn initialize(
        tracker: Tracker,
        config: SchedulerConfig,
        checks: &[Arc<dyn CredentialCheck>],
    ) -> Result<Self> {
        for check in checks {
            match check.verify_credentials().await {
                Ok(()) => info!(service = check.service(), "credentials verified"),
                Err(source) => {
                    error!(service = check.service(), error = %source, "credential check failed");
                    return Err(TrackerError::CredentialInvalid {
                        service: check.service().to_string(),
                        source,
                    });
                }
            }
        }
        Ok(Self::new(tracker, config))
    }

    /// Build a scheduler without credential checks.
    pub fn new(tracker: Tracker, config: SchedulerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                tracker,
                workers: Arc::new(Semaphore::new(config.max_workers.max(1))),
                running: Mutex::new(HashSet::new()),
                idle: Notify::new(),
            }),
            config,
            started: AtomicBool::new(false),
            shutdown,
            loops: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Register the periodic jobs. Both run immediately; the bootstrap job
    /// is registered first so empty watermarks are claimed by it rather than
    /// by the scan.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TrackerError::AlreadyStarted);
        }
        let now = Instant::now();
        let bootstrap = tokio::spawn(periodic(
            Arc::clone(&self.inner),
            Job::Bootstrap,
            now,
            self.config.empty_watermark_interval,
            self.shutdown.subscribe(),
        ));
        let scan = tokio::spawn(periodic(
            Arc::clone(&self.inner),
            Job::Cycle,
            now,
            self.config.scan_interval,
            self.shutdown.subscribe(),
        ));
        self.loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([bootstrap, scan]);
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            empty_watermark_interval_secs = self.config.empty_watermark_interval.as_secs(),
            max_workers = self.config.max_workers,
            "scheduler started"
        );
        Ok(())
    }

    /// Enqueue one cycle for `config` unless one is already running.
    /// Returns whether a job was scheduled.
    pub fn schedule_once(&self, config: TrackingConfig) -> bool {
        self.inner.schedule(Job::Cycle, config)
    }

    /// Run the scan job now. Returns how many cycles were scheduled.
    pub async fn scan(&self) -> usize {
        self.inner.scan().await
    }

    /// Run the empty-watermark job now.
    pub async fn bootstrap_empty(&self) -> usize {
        self.inner.bootstrap_empty().await
    }

    /// Job ids currently in flight.
    pub fn running_jobs(&self) -> Vec<String> {
        let mut jobs: Vec<String> = self.inner.running().iter().cloned().collect();
        jobs.sort();
        jobs
    }

    /// Stop the periodic jobs and wait for in-flight cycles to finish.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let loops = std::mem::take(&mut *self.loops.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in loops {
            if let Err(err) = handle.await {
                warn!(error = %err, "periodic job ended abnormally");
            }
        }
        self.inner.wait_idle().await;
        info!("scheduler stopped");
    }
}

async fn periodic(
    inner: Arc<Inner>,
    job: Job,
    first: Instant,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(first, period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                match job {
                    Job::Cycle => { inner.scan().await; }
                    Job::Bootstrap => { inner.bootstrap_empty().await; }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
