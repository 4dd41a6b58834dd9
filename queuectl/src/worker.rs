//! The worker execution loop.
//!
//! A [`Worker`] repeatedly claims the next eligible job, runs its command to completion through a
//! [`Supervisor`] and records the outcome. It never has more than one job in flight. When there is
//! nothing to do it sleeps for the poll interval, and after a number of consecutive empty polls it
//! stops on its own.
//!
//! Shutdown is cooperative: cancelling the worker's [`CancellationToken`] is only observed between
//! jobs (or during the idle sleep), so a command that is running is always allowed to finish and
//! have its outcome recorded.
use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{
    backend::Backend,
    backoff::{Exponential, DEFAULT_BACKOFF},
    clock::{Clock, SystemClock},
    job::{transition::Transition, Job, JobId},
    supervisor::{ExitOutcome, ShellSupervisor, Supervisor},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// How long to sleep after a poll that found no job.
    pub poll_interval: Duration,
    /// Number of consecutive empty polls after which the worker stops.
    pub max_idle_polls: u32,
    pub backoff: Exponential,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_idle_polls: 10,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

/// The result of a single poll of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll {
    /// No job was available.
    Idle,
    /// A job was claimed and executed.
    Executed {
        job_id: JobId,
        outcome: ExitOutcome,
        transition: Transition,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StopReason {
    /// Too many consecutive polls found no job.
    #[default]
    Idle,
    /// The worker was asked to shut down.
    Shutdown,
}

/// What a worker did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub stop_reason: StopReason,
}

impl WorkerReport {
    fn record(&mut self, outcome: &ExitOutcome) {
        self.processed += 1;
        if outcome.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

pub struct Worker<B: Backend> {
    backend: B,
    supervisor: Box<dyn Supervisor>,
    clock: Arc<dyn Clock>,
    config: WorkerConfig,
    cancellation_token: CancellationToken,
}

impl<B: Backend> Worker<B> {
    /// Creates a worker running commands through `sh` and reading the system time.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            supervisor: Box::new(ShellSupervisor::default()),
            clock: Arc::new(SystemClock),
            config: WorkerConfig::default(),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn with_supervisor(self, supervisor: impl Supervisor + 'static) -> Self {
        Self {
            supervisor: Box::new(supervisor),
            ..self
        }
    }

    pub fn with_clock(self, clock: impl Clock + 'static) -> Self {
        Self {
            clock: Arc::new(clock),
            ..self
        }
    }

    pub fn with_config(self, config: WorkerConfig) -> Self {
        Self { config, ..self }
    }

    pub fn with_cancellation_token(self, cancellation_token: CancellationToken) -> Self {
        Self {
            cancellation_token,
            ..self
        }
    }

    /// A handle that stops the worker once its current job, if any, is done.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Runs the loop until the worker goes idle or is cancelled, then closes the backend.
    pub async fn run(self) -> WorkerReport {
        let mut report = WorkerReport::default();
        let mut idle_polls = 0;
        tracing::info!(
            poll_interval = ?self.config.poll_interval,
            max_idle_polls = self.config.max_idle_polls,
            "Worker started"
        );

        report.stop_reason = loop {
            if self.cancellation_token.is_cancelled() {
                break StopReason::Shutdown;
            }
            match self.poll_once().await {
                Poll::Executed { outcome, .. } => {
                    idle_polls = 0;
                    report.record(&outcome);
                }
                Poll::Idle => {
                    idle_polls += 1;
                    if idle_polls >= self.config.max_idle_polls {
                        break StopReason::Idle;
                    }
                    tokio::select! {
                        _ = self.cancellation_token.cancelled() => break StopReason::Shutdown,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        };

        self.backend.close().await;
        tracing::info!(
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            stop_reason = ?report.stop_reason,
            "Worker stopped"
        );
        report
    }

    /// Claims and executes at most one job.
    ///
    /// A store error while claiming is logged and treated as there being no job available.
    pub async fn poll_once(&self) -> Poll {
        match self.backend.claim(self.clock.now()).await {
            Ok(Some(job)) => self.execute_job(job).await,
            Ok(None) => {
                tracing::debug!("No job available");
                Poll::Idle
            }
            Err(error) => {
                tracing::warn!(?error, "Failed to claim a job: {error}");
                Poll::Idle
            }
        }
    }

    #[instrument(skip(self, job), fields(job_id))]
    async fn execute_job(&self, job: Job) -> Poll {
        let job_id = job.id.clone();
        tracing::Span::current().record("job_id", &tracing::field::display(&job_id));
        tracing::debug!(%job_id, command = %job.command, "Executing job {job_id}");

        let outcome = self.supervisor.run(&job.command).await;
        let now = self.clock.now();
        let transition = job.transition(&outcome, now, &self.config.backoff);

        match transition {
            Transition::Complete => {
                tracing::info!(%job_id, "Job {job_id} completed");
                let _ = self
                    .backend
                    .mark_job_completed(&job_id, now)
                    .await
                    .inspect_err(|err| {
                        tracing::error!(
                            ?err,
                            %job_id,
                            "Failed to mark job {job_id} as completed, error: {err:?}",
                        )
                    });
            }
            Transition::Retry {
                attempts,
                next_attempt_at,
                delay,
            } => {
                tracing::warn!(
                    %job_id,
                    %outcome,
                    attempts,
                    "Job {job_id} {outcome} and will be retried in {delay}",
                );
                let _ = self
                    .backend
                    .mark_job_failed(&job_id, attempts, next_attempt_at, now)
                    .await
                    .inspect_err(|err| {
                        tracing::error!(
                            ?err,
                            %job_id,
                            "Failed to mark job {job_id} as failed, error: {err:?}",
                        )
                    });
            }
            Transition::Bury { attempts } => {
                tracing::error!(
                    %job_id,
                    %outcome,
                    attempts,
                    "Job {job_id} {outcome} and has no retries left, moving to the dead letter queue",
                );
                let _ = self
                    .backend
                    .mark_job_dead(&job_id, attempts, now)
                    .await
                    .inspect_err(|err| {
                        tracing::error!(
                            ?err,
                            %job_id,
                            "Failed to mark job {job_id} as dead, error: {err:?}",
                        )
                    });
            }
        }

        Poll::Executed {
            job_id,
            outcome,
            transition,
        }
    }
}
