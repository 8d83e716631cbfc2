use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::StoreResult;

/// A unit of periodic work, such as an expiry sweep.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Cross-replica mutual exclusion for a job run.
#[async_trait]
pub trait JobLease: Send + Sync {
    /// Returns `true` if this replica now holds the lease for `ttl`.
    async fn try_acquire(&self, job: &str, ttl: Duration) -> StoreResult<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed,
    /// Another run was still in flight, or another replica holds the lease.
    Skipped,
}

/// Runs a job on a fixed period. At most one run is in flight at a time.
#[derive(Clone)]
pub struct Scheduler {
    job: Arc<dyn ScheduledJob>,
    period: Duration,
    running: Arc<Mutex<()>>,
    lease: Option<Arc<dyn JobLease>>,
}

impl Scheduler {
    pub fn new(job: Arc<dyn ScheduledJob>, period: Duration) -> Self {
        Self {
            job,
            period,
            running: Arc::new(Mutex::new(())),
            lease: None,
        }
    }

    pub fn with_lease(mut self, lease: Arc<dyn JobLease>) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub async fn run_once(&self) -> RunOutcome {
        let Ok(_guard) = self.running.try_lock() else {
            debug!("{} still running, skipping trigger", self.job.name());
            return RunOutcome::Skipped;
        };

        if let Some(lease) = &self.lease {
            match lease.try_acquire(self.job.name(), self.period).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("{} lease held elsewhere, skipping", self.job.name());
                    return RunOutcome::Skipped;
                }
                Err(e) => {
                    warn!("{} lease check failed, skipping: {}", self.job.name(), e);
                    return RunOutcome::Skipped;
                }
            }
        }

        match self.job.run().await {
            Ok(()) => RunOutcome::Completed,
            Err(e) => {
                error!("{} failed: {}", self.job.name(), e);
                RunOutcome::Failed
            }
        }
    }

    /// Starts ticking one period from now until `shutdown` flips to `true` or its
    /// sender is dropped. Each tick runs the job on its own task so a slow run
    /// causes later ticks to be skipped instead of queued. The returned task
    /// finishes only after any run in flight has completed.
    ///
    /// A zero period never ticks; the job is reported and left unscheduled.
    pub fn spawn(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let period = scheduler.period;
            if period.is_zero() {
                error!("{} has a zero period and will not be scheduled", scheduler.job.name());
                return;
            }
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("{} scheduled every {:?}", scheduler.job.name(), period);

            let mut runs = JoinSet::new();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        while runs.try_join_next().is_some() {}
                        let run = scheduler.clone();
                        runs.spawn(async move { run.run_once().await });
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            if !runs.is_empty() {
                info!("{} waiting for the current run", scheduler.job.name());
            }
            while runs.join_next().await.is_some() {}
            info!("{} stopped", scheduler.job.name());
        })
    }
}
