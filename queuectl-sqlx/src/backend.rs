use async_trait::async_trait;
use queuectl::{
    backend::{Backend, BackendError, QueueSummary},
    job::{Job, JobId, JobState, NewJob},
    timestamp::Timestamp,
};
use tracing::instrument;

use crate::{map_err, query::list_jobs, SqliteBackend};

impl SqliteBackend {
    fn handle_update(
        result: sqlx::Result<u64>,
        id: &JobId,
        state: JobState,
    ) -> Result<(), BackendError> {
        match result {
            Ok(0) => Err(BackendError::JobNotInState {
                id: id.clone(),
                state,
            }),
            Ok(1) => Ok(()),
            Ok(_) => Err(BackendError::BadState),
            Err(error) => Err(map_err(error)),
        }
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn insert(&self, job: NewJob) -> Result<Job, BackendError> {
        match self.insert_job(&job).await {
            Ok(_) => Ok(job.into_job()),
            Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                Err(BackendError::DuplicateId(job.id))
            }
            Err(error) => Err(map_err(error)),
        }
    }
    async fn get(&self, id: &JobId) -> Result<Option<Job>, BackendError> {
        self.load_job(id)
            .await
            .map_err(map_err)?
            .map(TryFrom::try_from)
            .transpose()
    }
    async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>, BackendError> {
        list_jobs(state)
            .build_query_as::<crate::types::Job>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?
            .into_iter()
            .map(TryFrom::try_from)
            .collect()
    }
    async fn summary(&self) -> Result<QueueSummary, BackendError> {
        self.count_by_state()
            .await
            .map_err(map_err)?
            .into_iter()
            .map(|(state, count)| {
                u64::try_from(count)
                    .map(|count| (JobState::from(state), count))
                    .map_err(|_| BackendError::Decode(format!("negative count {count}")))
            })
            .collect()
    }
    #[instrument(skip(self))]
    async fn claim(&self, now: Timestamp) -> Result<Option<Job>, BackendError> {
        let job: Option<Job> = self
            .load_job_mark_as_processing(now)
            .await
            .map_err(map_err)?
            .map(TryFrom::try_from)
            .transpose()?;
        if let Some(job) = &job {
            tracing::debug!(job_id = %job.id, "Claimed job {}", job.id);
        }
        Ok(job)
    }
    async fn mark_job_completed(&self, id: &JobId, now: Timestamp) -> Result<(), BackendError> {
        let result = self._mark_job_completed(id, now).await;
        Self::handle_update(result, id, JobState::Processing)
    }
    async fn mark_job_failed(
        &self,
        id: &JobId,
        attempts: u32,
        next_attempt_at: Timestamp,
        now: Timestamp,
    ) -> Result<(), BackendError> {
        let result = self
            ._mark_job_failed(id, attempts, next_attempt_at, now)
            .await;
        Self::handle_update(result, id, JobState::Processing)
    }
    async fn mark_job_dead(
        &self,
        id: &JobId,
        attempts: u32,
        now: Timestamp,
    ) -> Result<(), BackendError> {
        let result = self._mark_job_dead(id, attempts, now).await;
        Self::handle_update(result, id, JobState::Processing)
    }
    async fn retry_dead_job(&self, id: &JobId, now: Timestamp) -> Result<Job, BackendError> {
        match self.rerun_dead_job(id, now).await.map_err(map_err)? {
            Some(job) => job.try_into(),
            None => Err(BackendError::JobNotInState {
                id: id.clone(),
                state: JobState::Dead,
            }),
        }
    }
    async fn close(&self) {
        self.pool.close().await;
    }
}
