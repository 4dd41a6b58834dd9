use crate::{backend::Backend, clock::Clock, timestamp::Timestamp, QueueError};

use super::{Job, JobId, NewJob, DEFAULT_MAX_RETRIES};

/// Builds a [`NewJob`] for a shell command.
///
/// # Example
///
/// ```
/// # use queuectl::job::builder::JobBuilder;
/// # use queuectl::timestamp::Timestamp;
/// let job = JobBuilder::new("echo hello")
///     .with_id("greeting")
///     .with_max_retries(5)
///     .build(Timestamp::now());
///
/// assert_eq!(job.id.as_str(), "greeting");
/// assert_eq!(job.max_retries, 5);
/// ```
#[derive(Debug, Clone)]
pub struct JobBuilder {
    command: String,
    id: Option<JobId>,
    max_retries: Option<u32>,
}

impl JobBuilder {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            id: None,
            max_retries: None,
        }
    }

    pub fn with_id(self, id: impl Into<JobId>) -> Self {
        Self {
            id: Some(id.into()),
            ..self
        }
    }

    pub fn with_max_retries(self, max_retries: u32) -> Self {
        Self {
            max_retries: Some(max_retries),
            ..self
        }
    }

    /// Finishes the job, generating an id if none was given.
    pub fn build(self, created_at: Timestamp) -> NewJob {
        NewJob {
            id: self.id.unwrap_or_else(JobId::generate),
            command: self.command,
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            created_at,
        }
    }

    /// Inserts the job into `backend` as a pending job created now.
    pub async fn enqueue<B: Backend + ?Sized>(
        self,
        backend: &B,
        clock: &dyn Clock,
    ) -> Result<Job, QueueError> {
        if self.command.trim().is_empty() {
            return Err(QueueError::InvalidSubmission(
                "`command` must not be empty".to_owned(),
            ));
        }
        let job = backend.insert(self.build(clock.now())).await?;
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::{
        backend::{memory::InMemoryBackend, BackendError},
        clock::FixedClock,
        job::JobState,
    };

    #[test]
    fn build_defaults() {
        let now = Timestamp::now();

        let job = JobBuilder::new("sleep 1").build(now);

        assert_eq!(job.command, "sleep 1");
        assert_eq!(job.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(job.created_at, now);
        assert!(!job.id.as_str().is_empty());
    }

    #[tokio::test]
    async fn enqueue() {
        let backend = InMemoryBackend::new();
        let clock = FixedClock::default();

        let job = JobBuilder::new("echo hi")
            .with_id("job1")
            .with_max_retries(0)
            .enqueue(&backend, &clock)
            .await
            .unwrap();

        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.created_at, clock.now());
        assert_eq!(backend.get(&"job1".into()).await.unwrap(), Some(job));
    }

    #[tokio::test]
    async fn enqueue_duplicate() {
        let backend = InMemoryBackend::new();
        let clock = FixedClock::default();
        let builder = JobBuilder::new("echo hi").with_id("job1");

        builder.clone().enqueue(&backend, &clock).await.unwrap();

        assert_matches!(
            builder.enqueue(&backend, &clock).await,
            Err(QueueError::BackendError(BackendError::DuplicateId(_)))
        );
    }

    #[tokio::test]
    async fn enqueue_blank_command() {
        let backend = InMemoryBackend::new();

        assert_matches!(
            JobBuilder::new("  ")
                .enqueue(&backend, &FixedClock::default())
                .await,
            Err(QueueError::InvalidSubmission(_))
        );
        assert!(backend.list(None).await.unwrap().is_empty());
    }
}
