//! Provides an in memory implementation of [`Backend`].
//!
//! Currently this is provided for testing purposes and for embedding the queue in a single
//! process. Jobs do not survive a restart.
//!
//! It is not optimized instead is designed to be a correct implementation for use in a test setup.
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{Backend, BackendError, QueueSummary};
use crate::{
    job::{Job, JobId, JobState, NewJob},
    timestamp::Timestamp,
};

/// An in memory implementation of [`Backend`].
///
/// Clones share the same jobs. Every mutation happens under a single write lock, which is what
/// makes [`Backend::claim`] exclusive.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    jobs: Arc<RwLock<Vec<Job>>>,
}

impl InMemoryBackend {
    /// Creates a new instance of [`InMemoryBackend`].
    pub fn new() -> Self {
        Self::default()
    }

    fn update_in_state<T>(
        &self,
        id: &JobId,
        state: JobState,
        update: impl FnOnce(&mut Job) -> T,
    ) -> Result<T, BackendError> {
        let mut jobs = self.jobs.write().map_err(|_| BackendError::BadState)?;
        match jobs
            .iter_mut()
            .find(|job| &job.id == id && job.state == state)
        {
            None => Err(BackendError::JobNotInState {
                id: id.clone(),
                state,
            }),
            Some(job) => Ok(update(job)),
        }
    }
}

impl Job {
    fn mark_job_processing(&mut self, now: Timestamp) {
        self.state = JobState::Processing;
        self.updated_at = now;
    }

    fn mark_job_completed(&mut self, now: Timestamp) {
        self.state = JobState::Completed;
        self.updated_at = now;
    }

    fn mark_job_failed(&mut self, attempts: u32, next_attempt_at: Timestamp, now: Timestamp) {
        self.state = JobState::Failed;
        self.attempts = attempts;
        self.next_attempt_at = Some(next_attempt_at);
        self.updated_at = now;
    }

    fn mark_job_dead(&mut self, attempts: u32, now: Timestamp) {
        self.state = JobState::Dead;
        self.attempts = attempts;
        self.updated_at = now;
    }

    fn mark_job_pending(&mut self, now: Timestamp) {
        self.state = JobState::Pending;
        self.attempts = 0;
        self.next_attempt_at = Some(now);
        self.updated_at = now;
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn insert(&self, job: NewJob) -> Result<Job, BackendError> {
        let mut jobs = self.jobs.write().map_err(|_| BackendError::BadState)?;
        if jobs.iter().any(|existing| existing.id == job.id) {
            return Err(BackendError::DuplicateId(job.id));
        }
        let job = job.into_job();
        jobs.push(job.clone());
        Ok(job)
    }
    async fn get(&self, id: &JobId) -> Result<Option<Job>, BackendError> {
        Ok(self
            .jobs
            .read()
            .map_err(|_| BackendError::BadState)?
            .iter()
            .find(|job| &job.id == id)
            .cloned())
    }
    async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>, BackendError> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .map_err(|_| BackendError::BadState)?
            .iter()
            .filter(|job| state.map_or(true, |state| job.state == state))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(jobs)
    }
    async fn summary(&self) -> Result<QueueSummary, BackendError> {
        Ok(self
            .jobs
            .read()
            .map_err(|_| BackendError::BadState)?
            .iter()
            .map(|job| (job.state, 1))
            .collect())
    }
    async fn claim(&self, now: Timestamp) -> Result<Option<Job>, BackendError> {
        let mut jobs = self.jobs.write().map_err(|_| BackendError::BadState)?;
        let next = jobs
            .iter_mut()
            .filter(|job| job.is_claimable(now))
            .min_by(|a, b| {
                a.updated_at
                    .cmp(&b.updated_at)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.id.cmp(&b.id))
            });
        Ok(next.map(|job| {
            job.mark_job_processing(now);
            job.clone()
        }))
    }
    async fn mark_job_completed(&self, id: &JobId, now: Timestamp) -> Result<(), BackendError> {
        self.update_in_state(id, JobState::Processing, |job| job.mark_job_completed(now))
    }
    async fn mark_job_failed(
        &self,
        id: &JobId,
        attempts: u32,
        next_attempt_at: Timestamp,
        now: Timestamp,
    ) -> Result<(), BackendError> {
        self.update_in_state(id, JobState::Processing, |job| {
            job.mark_job_failed(attempts, next_attempt_at, now)
        })
    }
    async fn mark_job_dead(
        &self,
        id: &JobId,
        attempts: u32,
        now: Timestamp,
    ) -> Result<(), BackendError> {
        self.update_in_state(id, JobState::Processing, |job| {
            job.mark_job_dead(attempts, now)
        })
    }
    async fn retry_dead_job(&self, id: &JobId, now: Timestamp) -> Result<Job, BackendError> {
        self.update_in_state(id, JobState::Dead, |job| {
            job.mark_job_pending(now);
            job.clone()
        })
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;
    use crate::test_suite;

    test_suite!(for: InMemoryBackend::new());

    #[tokio::test]
    async fn clones_share_jobs() {
        let backend = InMemoryBackend::new();
        let clone = backend.clone();

        backend.insert(NewJob::mock_job("shared")).await.unwrap();

        assert!(clone.get(&"shared".into()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn badstate_errors() {
        let backend = InMemoryBackend::new();
        let id: JobId = "job".into();
        let now = Timestamp::now();

        tokio::task::spawn({
            let backend = backend.clone();
            async move {
                let _guard = backend.jobs.write();
                panic!()
            }
        })
        .await
        .unwrap_err();

        assert_matches!(
            backend.insert(NewJob::mock_job("other")).await,
            Err(BackendError::BadState)
        );
        assert_matches!(backend.get(&id).await, Err(BackendError::BadState));
        assert_matches!(backend.list(None).await, Err(BackendError::BadState));
        assert_matches!(backend.summary().await, Err(BackendError::BadState));
        assert_matches!(backend.claim(now).await, Err(BackendError::BadState));
        assert_matches!(
            backend.mark_job_completed(&id, now).await,
            Err(BackendError::BadState)
        );
        assert_matches!(
            backend.mark_job_failed(&id, 1, now, now).await,
            Err(BackendError::BadState)
        );
        assert_matches!(
            backend.mark_job_dead(&id, 1, now).await,
            Err(BackendError::BadState)
        );
        assert_matches!(
            backend.retry_dead_job(&id, now).await,
            Err(BackendError::BadState)
        );
    }
}
