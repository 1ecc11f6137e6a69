//! Interval scheduler for the background jobs.
//!
//! Each [`JobKind`] runs in its own loop on a fixed interval:
//!
//! | Job | Interval | First run |
//! |-----|----------|-----------|
//! | `refresh_feeds` | `feed_refresh_interval` | immediately |
//! | `process_downloads` | `queue_interval` | immediately |
//! | `retry_failed` | `retry_interval` | after one interval |
//! | `cleanup_episodes` | `cleanup_interval` | after one interval |
//! | `check_disk_space` | `disk_check_interval` | after one interval |
//!
//! A job never overlaps itself: a tick that arrives while the previous run is
//! still going is skipped ([`MissedTickBehavior::Skip`]). Paused jobs skip
//! their ticks but can still be triggered by hand.
//!
//! # Example
//!
//! ```no_run
//! use podcast_dl::{Config, PodcastDownloader};
//! use podcast_dl::scheduler::{JobKind, JobScheduler};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let schedule = config.schedule.clone();
//! let downloader = PodcastDownloader::new(config).await?;
//!
//! let scheduler = JobScheduler::start(Arc::new(downloader.clone()), &schedule);
//! scheduler.pause_job(JobKind::CleanupEpisodes);
//! scheduler.trigger_job(JobKind::RefreshFeeds);
//!
//! // Later, during shutdown
//! downloader.shutdown().await?;
//! scheduler.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::config::ScheduleConfig;
use crate::downloader::PodcastDownloader;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// How long shutdown waits for running jobs to finish
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Smallest interval a job loop accepts
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Background jobs known to the scheduler
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Refresh every subscription and auto-queue new items
    RefreshFeeds,
    /// Dispatch pending downloads
    ProcessDownloads,
    /// Re-admit failed downloads under the retry ceiling
    RetryFailed,
    /// Retention sweep
    CleanupEpisodes,
    /// Free-space check
    CheckDiskSpace,
}

impl JobKind {
    /// All jobs in scheduling order
    pub const ALL: [JobKind; 5] = [
        JobKind::RefreshFeeds,
        JobKind::ProcessDownloads,
        JobKind::RetryFailed,
        JobKind::CleanupEpisodes,
        JobKind::CheckDiskSpace,
    ];

    /// Stable job identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::RefreshFeeds => "refresh_feeds",
            JobKind::ProcessDownloads => "process_downloads",
            JobKind::RetryFailed => "retry_failed",
            JobKind::CleanupEpisodes => "cleanup_episodes",
            JobKind::CheckDiskSpace => "check_disk_space",
        }
    }

    /// Configured interval for this job
    pub fn interval(&self, schedule: &ScheduleConfig) -> Duration {
        match self {
            JobKind::RefreshFeeds => schedule.feed_refresh_interval,
            JobKind::ProcessDownloads => schedule.queue_interval,
            JobKind::RetryFailed => schedule.retry_interval,
            JobKind::CleanupEpisodes => schedule.cleanup_interval,
            JobKind::CheckDiskSpace => schedule.disk_check_interval,
        }
    }

    /// Whether the first run happens at startup rather than after one interval
    pub fn runs_on_start(&self) -> bool {
        matches!(self, JobKind::RefreshFeeds | JobKind::ProcessDownloads)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|job| job.as_str() == s)
            .ok_or_else(|| format!("unknown job: {s}"))
    }
}

/// Executes one run of a job
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    /// Run `job` once to completion
    async fn run_job(&self, job: JobKind) -> Result<()>;
}

#[async_trait]
impl JobRunner for PodcastDownloader {
    async fn run_job(&self, job: JobKind) -> Result<()> {
        match job {
            JobKind::RefreshFeeds => {
                self.refresh_all().await?;
            }
            JobKind::ProcessDownloads => {
                self.run_queue().await?;
            }
            JobKind::RetryFailed => {
                self.retry_failed(self.config.download.max_retries).await?;
            }
            JobKind::CleanupEpisodes => {
                self.run_retention().await?;
            }
            JobKind::CheckDiskSpace => {
                self.check_disk_space().await?;
            }
        }
        Ok(())
    }
}

/// Snapshot of one job's state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    /// Which job
    pub kind: JobKind,
    /// Interval between runs
    #[serde(with = "crate::config::duration_serde")]
    pub interval: Duration,
    /// Ticks are skipped while paused
    pub paused: bool,
    /// A run is in progress
    pub running: bool,
    /// Completed runs (successful or not)
    pub runs: u64,
    /// Runs that returned an error
    pub failures: u64,
    /// Unix timestamp when the last run finished
    pub last_run: Option<i64>,
    /// Error of the last run, if it failed
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct JobStats {
    runs: u64,
    failures: u64,
    last_run: Option<i64>,
    last_error: Option<String>,
}

struct JobSlot {
    kind: JobKind,
    interval: Duration,
    paused: AtomicBool,
    running: AtomicBool,
    trigger: Notify,
    stats: Mutex<JobStats>,
}

/// Clears the running flag when a run ends, even by panic
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl JobSlot {
    async fn run_once(&self, runner: &dyn JobRunner) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::debug!(job = %self.kind, "Job still running, skipping");
            return;
        }
        let guard = RunningGuard(&self.running);

        let started = Instant::now();
        tracing::debug!(job = %self.kind, "Job started");
        let result = runner.run_job(self.kind).await;
        drop(guard);

        let mut stats = self.stats.lock().await;
        stats.runs += 1;
        stats.last_run = Some(chrono::Utc::now().timestamp());
        match result {
            Ok(()) => {
                stats.last_error = None;
                tracing::info!(
                    job = %self.kind,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job finished"
                );
            }
            Err(e) => {
                stats.failures += 1;
                stats.last_error = Some(e.to_string());
                tracing::error!(job = %self.kind, error = %e, "Job failed");
            }
        }
    }
}

/// Runs the background jobs on their intervals
pub struct JobScheduler {
    slots: Vec<Arc<JobSlot>>,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
    /// Spawn one loop per job
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(runner: Arc<dyn JobRunner>, schedule: &ScheduleConfig) -> Self {
        let shutdown = CancellationToken::new();
        let mut slots = Vec::with_capacity(JobKind::ALL.len());
        let mut handles = Vec::with_capacity(JobKind::ALL.len());

        for kind in JobKind::ALL {
            let slot = Arc::new(JobSlot {
                kind,
                interval: kind.interval(schedule).max(MIN_INTERVAL),
                paused: AtomicBool::new(false),
                running: AtomicBool::new(false),
                trigger: Notify::new(),
                stats: Mutex::new(JobStats::default()),
            });

            handles.push(tokio::spawn(job_loop(
                slot.clone(),
                runner.clone(),
                shutdown.clone(),
            )));
            slots.push(slot);
        }

        tracing::info!(jobs = slots.len(), "Job scheduler started");

        Self {
            slots,
            shutdown,
            handles: Mutex::new(handles),
        }
    }

    fn slot(&self, kind: JobKind) -> Option<&Arc<JobSlot>> {
        self.slots.iter().find(|slot| slot.kind == kind)
    }

    /// Skip this job's ticks until resumed; returns false if it was already paused
    pub fn pause_job(&self, kind: JobKind) -> bool {
        let Some(slot) = self.slot(kind) else {
            return false;
        };
        let changed = !slot.paused.swap(true, Ordering::SeqCst);
        if changed {
            tracing::info!(job = %kind, "Job paused");
        }
        changed
    }

    /// Resume a paused job; returns false if it was not paused
    pub fn resume_job(&self, kind: JobKind) -> bool {
        let Some(slot) = self.slot(kind) else {
            return false;
        };
        let changed = slot.paused.swap(false, Ordering::SeqCst);
        if changed {
            tracing::info!(job = %kind, "Job resumed");
        }
        changed
    }

    /// Ask the job to run now, regardless of its interval or pause state
    ///
    /// Returns immediately. A trigger arriving while the job is running is
    /// coalesced into one extra run after it finishes. Returns false once the
    /// scheduler is shut down.
    pub fn trigger_job(&self, kind: JobKind) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        let Some(slot) = self.slot(kind) else {
            return false;
        };
        tracing::info!(job = %kind, "Job triggered");
        slot.trigger.notify_one();
        true
    }

    /// State of every job
    pub async fn jobs(&self) -> Vec<JobInfo> {
        let mut jobs = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let stats = slot.stats.lock().await;
            jobs.push(JobInfo {
                kind: slot.kind,
                interval: slot.interval,
                paused: slot.paused.load(Ordering::SeqCst),
                running: slot.running.load(Ordering::SeqCst),
                runs: stats.runs,
                failures: stats.failures,
                last_run: stats.last_run,
                last_error: stats.last_error.clone(),
            });
        }
        jobs
    }

    /// Stop every loop, waiting up to 30 seconds for running jobs to finish
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        let wait_all = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "Job loop panicked");
                }
            }
        };

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, wait_all).await {
            Ok(()) => tracing::info!("Job scheduler stopped"),
            Err(_) => tracing::warn!("Timeout waiting for jobs to finish, proceeding with shutdown"),
        }
    }
}

async fn job_loop(slot: Arc<JobSlot>, runner: Arc<dyn JobRunner>, shutdown: CancellationToken) {
    let first = if slot.kind.runs_on_start() {
        Instant::now()
    } else {
        Instant::now() + slot.interval
    };
    let mut ticker = tokio::time::interval_at(first, slot.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::debug!(
        job = %slot.kind,
        interval_secs = slot.interval.as_secs(),
        "Job loop started"
    );

    loop {
        let triggered = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = slot.trigger.notified() => true,
            _ = ticker.tick() => false,
        };

        if !triggered && slot.paused.load(Ordering::SeqCst) {
            tracing::debug!(job = %slot.kind, "Job paused, skipping tick");
            continue;
        }

        slot.run_once(runner.as_ref()).await;
    }

    tracing::debug!(job = %slot.kind, "Job loop stopped");
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
