//! A persistent, multi-worker queue of shell command jobs.
//!
//! Jobs are submitted as JSON documents, kept in a durable [`Backend`], claimed atomically by
//! independent [`Worker`](worker::Worker)s and retried with exponential backoff until they either
//! succeed or exhaust their retries and land in the dead letter queue.
//!
//! ```
//! # use queuectl::prelude::*;
//! # use queuectl::backend::memory::InMemoryBackend;
//! # tokio_test();
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn tokio_test() {
//! let queue = Queue::new(InMemoryBackend::new());
//!
//! let jobs = queue
//!     .enqueue(r#"{"id": "job1", "command": "echo hello"}"#)
//!     .await
//!     .unwrap();
//!
//! assert_eq!(jobs[0].state, JobState::Pending);
//! # }
//! ```
use std::sync::Arc;

use backend::{Backend, BackendError, QueueSummary};
use clock::{Clock, SystemClock};
use job::{Job, JobId, JobState};
use thiserror::Error;

pub mod backend;
pub mod backoff;
pub mod clock;
pub mod job;
pub mod prelude;
pub mod supervisor;
pub mod timestamp;
pub mod worker;

/// Operator facing operations on a job store.
///
/// Workers are not started from here; see [`worker::Worker`].
pub struct Queue<B: Backend> {
    backend: B,
    clock: Arc<dyn Clock>,
}

impl<B: Backend> Queue<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(self, clock: impl Clock + 'static) -> Self {
        Self {
            clock: Arc::new(clock),
            ..self
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Parses, validates and inserts a submission file holding one or more jobs.
    pub async fn enqueue(&self, submission: &str) -> Result<Vec<Job>, QueueError> {
        let jobs =
            job::submission::enqueue_all(submission, &self.backend, self.clock.as_ref()).await?;
        for job in &jobs {
            tracing::info!(job_id = %job.id, command = %job.command, "Enqueued job {}", job.id);
        }
        Ok(jobs)
    }

    pub async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>, QueueError> {
        Ok(self.backend.list(state).await?)
    }

    pub async fn summary(&self) -> Result<QueueSummary, QueueError> {
        Ok(self.backend.summary().await?)
    }

    /// The jobs in the dead letter queue, newest first.
    pub async fn dead_letter_queue(&self) -> Result<Vec<Job>, QueueError> {
        self.list(Some(JobState::Dead)).await
    }

    /// Moves a dead job back to pending with its attempts reset.
    pub async fn retry_dead(&self, id: &JobId) -> Result<Job, QueueError> {
        let job = self.backend.retry_dead_job(id, self.clock.now()).await?;
        tracing::info!(job_id = %id, "Job {id} moved from the dead letter queue to pending");
        Ok(job)
    }

    pub async fn close(&self) {
        self.backend.close().await
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    BackendError(#[from] BackendError),
    #[error("Invalid job submission: {0}")]
    InvalidSubmission(String),
    #[error("Error encoding or decoding value")]
    EncodeError(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::TimeDelta;

    use super::*;
    use crate::{
        backend::memory::InMemoryBackend,
        clock::FixedClock,
        supervisor::{ExitOutcome, MockSupervisor},
        worker::Worker,
    };

    #[tokio::test]
    async fn dead_job_can_be_retried() {
        let clock = FixedClock::default();
        let queue = Queue::new(InMemoryBackend::new()).with_clock(clock.clone());
        queue
            .enqueue(r#"{"id": "job1", "command": "false", "max_retries": 0}"#)
            .await
            .unwrap();
        let mut supervisor = MockSupervisor::new();
        supervisor
            .expect_run()
            .returning(|_| ExitOutcome::Failure { code: Some(1) });
        Worker::new(queue.backend().clone())
            .with_clock(clock.clone())
            .with_supervisor(supervisor)
            .poll_once()
            .await;

        let dead = queue.dead_letter_queue().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 1);

        clock.advance(TimeDelta::minutes(1));
        let job = queue.retry_dead(&"job1".into()).await.unwrap();

        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.updated_at, clock.now());
        assert!(queue.dead_letter_queue().await.unwrap().is_empty());
        assert_eq!(queue.summary().await.unwrap().count(JobState::Pending), 1);
    }

    #[tokio::test]
    async fn retrying_a_job_that_is_not_dead_is_rejected() {
        let queue = Queue::new(InMemoryBackend::new());
        queue
            .enqueue(r#"{"id": "job1", "command": "true"}"#)
            .await
            .unwrap();

        assert_matches!(
            queue.retry_dead(&"job1".into()).await,
            Err(QueueError::BackendError(BackendError::JobNotInState {
                state: JobState::Dead,
                ..
            }))
        );
        assert_matches!(
            queue.retry_dead(&"missing".into()).await,
            Err(QueueError::BackendError(BackendError::JobNotInState { .. }))
        );
    }

    #[tokio::test]
    async fn invalid_submission_is_not_stored() {
        let queue = Queue::new(InMemoryBackend::new());

        assert_matches!(
            queue.enqueue(r#"{"id": "job1"}"#).await,
            Err(QueueError::InvalidSubmission(_))
        );
        assert_eq!(queue.summary().await.unwrap().total(), 0);
    }
}
