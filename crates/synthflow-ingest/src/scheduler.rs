//! Periodic single-flight job execution
//!
//! Each job runs in its own task on a fixed interval. A run is awaited
//! before the next tick is taken, so a job never overlaps itself; ticks
//! missed while a run is in progress are dropped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::error::Result;

type JobFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Run-level retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }
}

struct Job {
    name: &'static str,
    interval: Duration,
    run: JobFn,
}

pub struct Scheduler {
    jobs: Vec<Job>,
    retry: RetryPolicy,
}

impl Scheduler {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            jobs: Vec::new(),
            retry,
        }
    }

    /// Register a job; a zero interval leaves it disabled
    pub fn add_job<F, Fut>(&mut self, name: &'static str, interval: Duration, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if interval.is_zero() {
            info!(job = name, "Job disabled");
            return;
        }
        self.jobs.push(Job {
            name,
            interval,
            run: Arc::new(move || Box::pin(job())),
        });
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.jobs.iter().map(|j| j.name).collect()
    }

    /// Spawn one task per job; each stops after its current run once
    /// `shutdown` flips to `true`
    pub fn start(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let retry = self.retry;
        self.jobs
            .into_iter()
            .map(|job| tokio::spawn(job_loop(job, retry, shutdown.clone())))
            .collect()
    }

    /// Run every job until `signal` resolves, then wait for in-flight runs
    pub async fn run_until<S>(self, signal: S)
    where
        S: Future<Output = ()>,
    {
        let (tx, rx) = watch::channel(false);
        info!(jobs = ?self.job_names(), "Scheduler started");
        let handles = self.start(rx);

        signal.await;
        let _ = tx.send(true);

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Job task panicked");
            }
        }
        info!("Scheduler stopped");
    }
}

async fn job_loop(job: Job, retry: RetryPolicy, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(job.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(job = job.name, interval_secs = job.interval.as_secs(), "Job scheduled");

    loop {
        tokio::select! {
            _ = ticker.tick() => {},
            _ = shutdown.changed() => {},
        }
        if is_shutting_down(&shutdown) {
            break;
        }

        let run = job.run.clone();
        if let Err(e) = run_with_retry(job.name, retry, move || run(), &mut shutdown).await {
            error!(job = job.name, error = %e, "✗ Job run failed after retries");
        }
    }

    info!(job = job.name, "Job stopped");
}

fn is_shutting_down(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

/// Run `job`, retrying failed attempts up to `policy.retries` times.
/// The delay between attempts is cut short by shutdown, which also ends
/// retrying.
pub async fn run_with_retry<F, Fut>(
    name: &str,
    policy: RetryPolicy,
    job: F,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match job().await {
            Ok(()) => {
                if attempt > 1 {
                    info!(job = name, attempt, "✓ Job succeeded after retry");
                }
                return Ok(());
            },
            Err(e) if attempt <= policy.retries && !is_shutting_down(shutdown) => {
                warn!(
                    job = name,
                    attempt,
                    transient = e.is_transient(),
                    error = %e,
                    retry_in_secs = policy.delay.as_secs(),
                    "Job attempt failed; retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(policy.delay) => {},
                    _ = shutdown.changed() => return Err(e),
                }
            },
            Err(e) => return Err(e),
        }
    }
}

/// Resolve on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = until_signal("Ctrl+C", signal::ctrl_c());

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, finishing current runs"),
        _ = terminate => info!("Received SIGTERM, finishing current runs"),
    }
}

/// Resolve when `signal` arrives; a handler that cannot be installed never resolves
async fn until_signal(name: &str, signal: impl Future<Output = std::io::Result<()>>) {
    if let Err(e) = signal.await {
        error!("Failed to install {} handler: {}", name, e);
        std::future::pending::<()>().await;
    }
}
