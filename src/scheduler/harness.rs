//! Tick-driven job harness
//!
//! Every registered job gets its own interval timer and [`JobSlot`]. A tick
//! that finds the job still running is skipped and logged. Shutdown stops the
//! timers and waits for in-flight runs; runs are never cancelled midway.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::error::{SchedulerError, SchedulerResult};
use super::job::JobSlot;
use crate::error::{Result, RoundsmithErrorTrait};
use crate::metrics;

#[async_trait]
pub trait ScheduledJob: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn run(&self) -> Result<()>;
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Default)]
struct JobCounters {
    runs: AtomicU64,
    failures: AtomicU64,
    panics: AtomicU64,
    skipped: AtomicU64,
}

/// Per-job totals for one harness lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub job: String,
    pub runs: u64,
    pub failures: u64,
    pub panics: u64,
    pub skipped: u64,
}

impl JobCounters {
    fn snapshot(&self, job: &str) -> JobReport {
        JobReport {
            job: job.to_string(),
            runs: self.runs.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Shutdown
// ============================================================================

/// Cloneable handle that stops a running [`Harness`]
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Resolve on SIGINT, or SIGTERM on unix
pub async fn wait_for_signal() -> SchedulerResult<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}

// ============================================================================
// Harness
// ============================================================================

struct Registration {
    job: Arc<dyn ScheduledJob>,
    interval: Duration,
    slot: JobSlot,
    counters: Arc<JobCounters>,
}

pub struct Harness {
    jobs: Vec<Registration>,
    names: HashSet<String>,
    shutdown: ShutdownTrigger,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            jobs: Vec::new(),
            names: HashSet::new(),
            shutdown: ShutdownTrigger { tx: Arc::new(tx) },
        }
    }

    /// Register a job with its own timer; returns the job's slot
    pub fn add_job(&mut self, job: Arc<dyn ScheduledJob>, interval: Duration) -> SchedulerResult<JobSlot> {
        let name = job.name().to_string();
        if interval.is_zero() {
            return Err(SchedulerError::invalid_interval(name, interval.as_secs()));
        }
        if !self.names.insert(name.clone()) {
            return Err(SchedulerError::duplicate_job(name));
        }

        let slot = JobSlot::new();
        self.jobs.push(Registration {
            job,
            interval,
            slot: slot.clone(),
            counters: Arc::new(JobCounters::default()),
        });
        tracing::debug!(job = %name, interval_secs = interval.as_secs_f64(), "Registered job");
        Ok(slot)
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|r| r.job.name()).collect()
    }

    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.shutdown.clone()
    }

    /// Run every job until `signal` resolves, then drain in-flight runs
    pub async fn run_until<F>(self, signal: F) -> SchedulerResult<Vec<JobReport>>
    where
        F: Future<Output = ()> + Send,
    {
        let trigger = self.shutdown.clone();

        let harness = self.run();
        tokio::pin!(harness);

        tokio::select! {
            reports = &mut harness => return reports,
            _ = signal => {
                tracing::info!("Shutdown signal received, stopping scheduler");
                trigger.trigger();
            }
        }

        harness.await
    }

    /// Run every job until the shutdown trigger fires
    pub async fn run(self) -> SchedulerResult<Vec<JobReport>> {
        if self.shutdown.is_triggered() {
            return Err(SchedulerError::ShuttingDown);
        }

        tracing::info!(jobs = ?self.job_names(), "Starting scheduler");

        let loops: Vec<(String, Arc<JobCounters>, JoinHandle<()>)> = self
            .jobs
            .into_iter()
            .map(|registration| {
                let name = registration.job.name().to_string();
                let counters = Arc::clone(&registration.counters);
                let shutdown = self.shutdown.subscribe();
                (name, counters, tokio::spawn(job_loop(registration, shutdown)))
            })
            .collect();

        let mut reports = Vec::with_capacity(loops.len());
        for (name, counters, handle) in loops {
            if let Err(e) = handle.await {
                tracing::error!(job = %name, error = %e, "Job loop aborted");
            }
            reports.push(counters.snapshot(&name));
        }

        tracing::info!("Scheduler stopped");
        Ok(reports)
    }
}

async fn job_loop(registration: Registration, mut shutdown: watch::Receiver<bool>) {
    let Registration {
        job,
        interval,
        slot,
        counters,
    } = registration;
    let name = job.name().to_string();

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        let Some(guard) = slot.try_begin() else {
            tracing::warn!(job = %name, "Previous run still in progress, skipping tick");
            counters.skipped.fetch_add(1, Ordering::Relaxed);
            metrics::record_tick_skipped(&name);
            continue;
        };

        if let Some(previous) = in_flight.take() {
            reap(&name, previous, &counters).await;
        }

        let job = Arc::clone(&job);
        let counters = Arc::clone(&counters);
        let name = name.clone();
        in_flight = Some(tokio::spawn(async move {
            let _guard = guard;
            let started = Instant::now();
            counters.runs.fetch_add(1, Ordering::Relaxed);

            match job.run().await {
                Ok(()) => {
                    tracing::debug!(job = %name, elapsed_ms = started.elapsed().as_millis() as u64, "Job run finished");
                    metrics::record_job_run(&name, true);
                }
                Err(e) => {
                    counters.failures.fetch_add(1, Ordering::Relaxed);
                    metrics::record_job_run(&name, false);
                    if e.is_recoverable() {
                        tracing::warn!(job = %name, error = %e, category = e.category().as_str(), "Job run failed, retrying next tick");
                    } else {
                        tracing::error!(job = %name, error = %e, category = e.category().as_str(), "Job run failed");
                    }
                }
            }
        }));
    }

    if let Some(previous) = in_flight.take() {
        tracing::debug!(job = %name, "Waiting for in-flight run");
        reap(&name, previous, &counters).await;
    }
}

async fn reap(name: &str, handle: JoinHandle<()>, counters: &JobCounters) {
    if let Err(e) = handle.await {
        counters.panics.fetch_add(1, Ordering::Relaxed);
        metrics::record_job_run(name, false);
        let err = SchedulerError::job_aborted(name, e.to_string());
        tracing::error!(job = %name, error = %err, "Job run did not complete");
    }
}
