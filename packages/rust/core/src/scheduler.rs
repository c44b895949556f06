//! Bounded-concurrency fetch scheduler.
//!
//! Units arrive on a channel in discovery order. Each one gets a sequence
//! number, waits for one of `concurrency` permits, sleeps a random delay, and
//! is handed to a [`UnitProcessor`] on its own task. Results are reported
//! through the [`ProgressReporter`] as they are collected.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, instrument, warn};

use kbharvest_shared::{
    DiscoveryUnit, FailurePolicy, FetchFailure, FetchResult, ManifestEntry, Result, RunConfig,
};

use crate::pipeline::ProgressReporter;

/// Turns one discovery unit into a written article.
#[async_trait]
pub trait UnitProcessor: Send + Sync {
    /// Process `unit`, the `seq`-th unit of the run.
    async fn process(&self, seq: u64, unit: DiscoveryUnit) -> Result<ManifestEntry>;
}

/// Scheduler limits.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub concurrency: usize,
    pub failure_policy: FailurePolicy,
    /// Upper bound of the random delay before each unit.
    pub max_delay: Duration,
}

impl From<&RunConfig> for SchedulerConfig {
    fn from(run: &RunConfig) -> Self {
        Self {
            concurrency: run.concurrency,
            failure_policy: run.failure_policy,
            max_delay: Duration::from_millis(run.max_delay_ms),
        }
    }
}

/// What the scheduler did with the units it received.
#[derive(Debug, Default)]
pub struct ScheduleOutcome {
    /// Units handed to the processor.
    pub dispatched: usize,
    pub succeeded: usize,
    /// Failures in the order they were collected.
    pub failures: Vec<FetchFailure>,
    /// Dispatch stopped early because of a failure in fail-fast mode.
    pub aborted: bool,
}

impl ScheduleOutcome {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Dispatches units to a processor with at most `concurrency` in flight.
#[derive(Debug, Clone)]
pub struct FetchScheduler {
    config: SchedulerConfig,
}

type TaskOutput = (String, FetchResult);

impl FetchScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Drain `units`, processing each one at most once.
    ///
    /// In fail-fast mode a failure stops any further dispatch: the receiver is
    /// closed, so discovery stops at its next send, and work already in flight
    /// is allowed to finish.
    #[instrument(skip_all, fields(concurrency = self.config.concurrency, policy = %self.config.failure_policy))]
    pub async fn run(
        &self,
        mut units: mpsc::Receiver<DiscoveryUnit>,
        processor: Arc<dyn UnitProcessor>,
        progress: &dyn ProgressReporter,
    ) -> ScheduleOutcome {
        let fail_fast = self.config.failure_policy == FailurePolicy::FailFast;
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let failed = Arc::new(AtomicBool::new(false));
        let mut tasks: JoinSet<TaskOutput> = JoinSet::new();
        let mut outcome = ScheduleOutcome::default();
        let mut seq: u64 = 0;

        while let Some(unit) = units.recv().await {
            if fail_fast && failed.load(Ordering::SeqCst) {
                debug!(%unit, "failure observed, not dispatching");
                break;
            }

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };

            // The flag may have been set while waiting for the permit.
            if fail_fast && failed.load(Ordering::SeqCst) {
                debug!(%unit, "failure observed, not dispatching");
                break;
            }

            while let Some(joined) = tasks.try_join_next() {
                collect(joined, &mut outcome, progress);
            }

            seq += 1;
            outcome.dispatched += 1;
            let label = unit.to_string();
            let delay = random_delay(self.config.max_delay);
            let processor = Arc::clone(&processor);
            let failed = Arc::clone(&failed);

            tasks.spawn(async move {
                let _permit = permit;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let result = match processor.process(seq, unit).await {
                    Ok(entry) => FetchResult::Completed(entry),
                    Err(error) => {
                        failed.store(true, Ordering::SeqCst);
                        FetchResult::Failed(FetchFailure {
                            unit: label.clone(),
                            error,
                        })
                    }
                };
                (label, result)
            });
        }

        outcome.aborted = fail_fast && failed.load(Ordering::SeqCst);
        units.close();

        while let Some(joined) = tasks.join_next().await {
            collect(joined, &mut outcome, progress);
        }

        // A failure in the last in-flight batch still aborts the run.
        outcome.aborted = fail_fast && !outcome.failures.is_empty();

        info!(
            dispatched = outcome.dispatched,
            succeeded = outcome.succeeded,
            failed = outcome.failed(),
            aborted = outcome.aborted,
            "scheduler finished"
        );
        outcome
    }
}

fn collect(
    joined: std::result::Result<TaskOutput, JoinError>,
    outcome: &mut ScheduleOutcome,
    progress: &dyn ProgressReporter,
) {
    let (label, result) = match joined {
        Ok(output) => output,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => {
            warn!(error = %e, "unit task cancelled");
            return;
        }
    };

    match result {
        FetchResult::Completed(entry) => {
            outcome.succeeded += 1;
            debug!(unit = %label, id = %entry.id, "unit completed");
            progress.unit_finished(&label, None, outcome.succeeded, outcome.failed());
        }
        FetchResult::Failed(failure) => {
            warn!(
                unit = %failure.unit,
                kind = %failure.kind(),
                error = %failure.error,
                "unit failed"
            );
            outcome.failures.push(failure);
            let failure = outcome.failures.last();
            progress.unit_finished(&label, failure, outcome.succeeded, outcome.failed());
        }
    }
}

fn random_delay(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}
