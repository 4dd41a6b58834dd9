//! The [`Backend`] trait: durable storage of jobs plus the claim protocol.
//!
//! A backend is the only state shared between worker processes. Everything that mutates a job
//! goes through one of the operations here, and each of them is a single atomic write guarded by
//! the state the job is expected to be in, so no additional locking is needed by callers.
use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    job::{Job, JobId, JobState, NewJob},
    timestamp::Timestamp,
};

pub mod memory;
pub mod testing;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Inserts a new pending job.
    ///
    /// Fails with [`BackendError::DuplicateId`] when a job with the same id already exists.
    async fn insert(&self, job: NewJob) -> Result<Job, BackendError>;

    async fn get(&self, id: &JobId) -> Result<Option<Job>, BackendError>;

    /// Lists jobs, newest first, optionally restricted to one state.
    async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>, BackendError>;

    /// Counts the jobs in each state.
    async fn summary(&self) -> Result<QueueSummary, BackendError>;

    /// Atomically selects the eligible job that was least recently updated and marks it as
    /// processing.
    ///
    /// A job is eligible when it is pending, or failed with `next_attempt_at <= now`. The returned
    /// job already reflects `state = processing` and `updated_at = now`. No two calls, in this or
    /// any other process sharing the store, can ever claim the same job.
    async fn claim(&self, now: Timestamp) -> Result<Option<Job>, BackendError>;

    /// `processing → completed`.
    async fn mark_job_completed(&self, id: &JobId, now: Timestamp) -> Result<(), BackendError>;

    /// `processing → failed`, recording the new attempt count and when to retry.
    async fn mark_job_failed(
        &self,
        id: &JobId,
        attempts: u32,
        next_attempt_at: Timestamp,
        now: Timestamp,
    ) -> Result<(), BackendError>;

    /// `processing → dead`.
    async fn mark_job_dead(
        &self,
        id: &JobId,
        attempts: u32,
        now: Timestamp,
    ) -> Result<(), BackendError>;

    /// `dead → pending`, resetting the attempt count.
    ///
    /// Fails with [`BackendError::JobNotInState`] when the job does not exist or is not dead, in
    /// which case nothing is modified.
    async fn retry_dead_job(&self, id: &JobId, now: Timestamp) -> Result<Job, BackendError>;

    /// Releases any resources held by the backend.
    async fn close(&self) {}
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Job with id {0} already exists")]
    DuplicateId(JobId),
    #[error("Job {id} not found in {state} state")]
    JobNotInState { id: JobId, state: JobState },
    #[error("Stored job data could not be decoded: {0}")]
    Decode(String),
    #[error("Job store unavailable: {0}")]
    Unavailable(String),
    #[error("System in bad state")]
    BadState,
}

/// Number of jobs per state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSummary {
    counts: BTreeMap<JobState, u64>,
}

impl QueueSummary {
    pub fn count(&self, state: JobState) -> u64 {
        self.counts.get(&state).copied().unwrap_or_default()
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Every state paired with its count, including states without jobs.
    pub fn iter(&self) -> impl Iterator<Item = (JobState, u64)> + '_ {
        JobState::ALL
            .into_iter()
            .map(|state| (state, self.count(state)))
    }
}

impl FromIterator<(JobState, u64)> for QueueSummary {
    fn from_iter<T: IntoIterator<Item = (JobState, u64)>>(iter: T) -> Self {
        let mut counts = BTreeMap::new();
        for (state, count) in iter {
            *counts.entry(state).or_default() += count;
        }
        Self { counts }
    }
}
