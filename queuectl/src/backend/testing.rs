//! Test suite for ensuring a correct implementation of a backend.
use std::collections::HashSet;

use chrono::TimeDelta;

use super::*;

const DEFAULT_COMMAND: &str = "echo hello";
const DELTA: TimeDelta = TimeDelta::milliseconds(1);

fn epoch() -> Timestamp {
    "2024-01-01T00:00:00.000000Z"
        .parse()
        .expect("valid timestamp")
}

impl NewJob {
    #[doc(hidden)]
    pub fn mock_job(id: impl Into<JobId>) -> Self {
        Self {
            id: id.into(),
            command: DEFAULT_COMMAND.to_owned(),
            max_retries: crate::job::DEFAULT_MAX_RETRIES,
            created_at: epoch(),
        }
    }

    #[doc(hidden)]
    pub fn with_created_at(self, created_at: Timestamp) -> Self {
        Self { created_at, ..self }
    }

    #[doc(hidden)]
    pub fn with_max_retries(self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self
        }
    }
}

/// Create test suite for queuectl backend.
///
/// For backend implementors, it is useful to include this are part of your test suites.
///
/// # Example
///
/// ```
/// use queuectl::test_suite;
/// use queuectl::backend::memory::InMemoryBackend;
/// test_suite!(for: InMemoryBackend::new());
/// ```
///
/// If you using a different async test attribute or need to build the backend asynchronously you
/// can configure the marco to do that instead:
///
/// ```ignore
/// use queuectl::test_suite;
/// test_suite!(
///     attr: tokio::test,
///     args: (),
///     backend: BackendImplementation::open(&temp_path()).await.unwrap()
/// );
/// ```
#[macro_export]
macro_rules! test_suite {
    (for: $backend:expr) => {
        $crate::test_suite!(attr: tokio::test, args: (), backend: $backend);
    };
    (attr: $attr:meta, args: $args:tt, backend: $backend:expr) => {
        #[$attr]
        async fn insert_and_get $args {
          let backend = $backend;
          $crate::backend::testing::insert_and_get(backend).await;
        }
        #[$attr]
        async fn insert_duplicate_id $args {
          let backend = $backend;
          $crate::backend::testing::insert_duplicate_id(backend).await;
        }
        #[$attr]
        async fn get_not_found $args {
          let backend = $backend;
          $crate::backend::testing::get_not_found(backend).await;
        }
        #[$attr]
        async fn list_newest_first $args {
          let backend = $backend;
          $crate::backend::testing::list_newest_first(backend).await;
        }
        #[$attr]
        async fn list_by_state $args {
          let backend = $backend;
          $crate::backend::testing::list_by_state(backend).await;
        }
        #[$attr]
        async fn summary $args {
          let backend = $backend;
          $crate::backend::testing::summary(backend).await;
        }
        #[$attr]
        async fn claim_empty $args {
          let backend = $backend;
          $crate::backend::testing::claim_empty(backend).await;
        }
        #[$attr]
        async fn claim_marks_processing $args {
          let backend = $backend;
          $crate::backend::testing::claim_marks_processing(backend).await;
        }
        #[$attr]
        async fn claim_least_recently_updated_first $args {
          let backend = $backend;
          $crate::backend::testing::claim_least_recently_updated_first(backend).await;
        }
        #[$attr]
        async fn claim_ties_broken_by_id $args {
          let backend = $backend;
          $crate::backend::testing::claim_ties_broken_by_id(backend).await;
        }
        #[$attr]
        async fn claim_skips_unclaimable $args {
          let backend = $backend;
          $crate::backend::testing::claim_skips_unclaimable(backend).await;
        }
        #[$attr]
        async fn claim_failed_after_backoff $args {
          let backend = $backend;
          $crate::backend::testing::claim_failed_after_backoff(backend).await;
        }
        #[$attr]
        async fn claim_is_exclusive $args {
          let backend = $backend;
          $crate::backend::testing::claim_is_exclusive(backend).await;
        }
        #[$attr]
        async fn mark_job_completed $args {
          let backend = $backend;
          $crate::backend::testing::mark_job_completed(backend).await;
        }
        #[$attr]
        async fn mark_job_completed_not_processing $args {
          let backend = $backend;
          $crate::backend::testing::mark_job_completed_not_processing(backend).await;
        }
        #[$attr]
        async fn mark_job_failed $args {
          let backend = $backend;
          $crate::backend::testing::mark_job_failed(backend).await;
        }
        #[$attr]
        async fn mark_job_failed_not_processing $args {
          let backend = $backend;
          $crate::backend::testing::mark_job_failed_not_processing(backend).await;
        }
        #[$attr]
        async fn mark_job_dead $args {
          let backend = $backend;
          $crate::backend::testing::mark_job_dead(backend).await;
        }
        #[$attr]
        async fn mark_job_dead_not_processing $args {
          let backend = $backend;
          $crate::backend::testing::mark_job_dead_not_processing(backend).await;
        }
        #[$attr]
        async fn retry_dead_job $args {
          let backend = $backend;
          $crate::backend::testing::retry_dead_job(backend).await;
        }
        #[$attr]
        async fn retry_dead_job_not_dead $args {
          let backend = $backend;
          $crate::backend::testing::retry_dead_job_not_dead(backend).await;
        }
        #[$attr]
        async fn retry_dead_job_not_found $args {
          let backend = $backend;
          $crate::backend::testing::retry_dead_job_not_found(backend).await;
        }
    };
}

pub use test_suite;

#[doc(hidden)]
#[async_trait::async_trait]
pub trait BackendTesting: Backend + Sync {
    async fn get_job(&self, id: &str) -> Job {
        self.get(&id.into())
            .await
            .unwrap()
            .expect("Job should exist")
    }

    /// Claims the next job and asserts it is the one expected.
    ///
    /// Only meaningful when `id` is the only claimable job at `now`.
    async fn claim_expecting(&self, id: &str, now: Timestamp) -> Job {
        let job = self.claim(now).await.unwrap().expect("A job to claim");
        assert_eq!(job.id.as_str(), id);
        job
    }

    /// Inserts a job and drives it through a failed final attempt into the dead letter queue.
    async fn insert_dead(&self, id: &str, now: Timestamp) {
        self.insert(NewJob::mock_job(id).with_max_retries(0))
            .await
            .unwrap();
        self.claim_expecting(id, now).await;
        self.mark_job_dead(&id.into(), 1, now).await.unwrap();
    }
}

impl<T: Backend + Sync> BackendTesting for T {}

#[doc(hidden)]
pub async fn insert_and_get(backend: impl BackendTesting) {
    let inserted = backend.insert(NewJob::mock_job("job1")).await.unwrap();

    assert_eq!(inserted.state, JobState::Pending);
    assert_eq!(inserted.attempts, 0);
    assert_eq!(backend.get_job("job1").await, inserted);
    assert_eq!(inserted.command, DEFAULT_COMMAND);
    assert_eq!(inserted.created_at, epoch());
    assert_eq!(inserted.updated_at, epoch());
}

#[doc(hidden)]
pub async fn insert_duplicate_id(backend: impl BackendTesting) {
    backend.insert(NewJob::mock_job("job1")).await.unwrap();
    let duplicate = NewJob {
        command: "echo other".to_owned(),
        ..NewJob::mock_job("job1")
    };

    assert!(matches!(
        backend.insert(duplicate).await,
        Err(BackendError::DuplicateId(id)) if id.as_str() == "job1"
    ));
    assert_eq!(backend.get_job("job1").await.command, DEFAULT_COMMAND);
}

#[doc(hidden)]
pub async fn get_not_found(backend: impl BackendTesting) {
    assert!(backend.get(&"missing".into()).await.unwrap().is_none());
}

#[doc(hidden)]
pub async fn list_newest_first(backend: impl BackendTesting) {
    for (offset, id) in [(0, "first"), (2, "third"), (1, "second")] {
        backend
            .insert(NewJob::mock_job(id).with_created_at(epoch() + TimeDelta::seconds(offset)))
            .await
            .unwrap();
    }

    let ids: Vec<_> = backend
        .list(None)
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.id)
        .collect();

    assert_eq!(ids, ["third", "second", "first"].map(JobId::from));
}

#[doc(hidden)]
pub async fn list_by_state(backend: impl BackendTesting) {
    backend.insert(NewJob::mock_job("pending")).await.unwrap();
    backend.insert_dead("dead", epoch()).await;

    let dead = backend.list(Some(JobState::Dead)).await.unwrap();
    let pending = backend.list(Some(JobState::Pending)).await.unwrap();
    let completed = backend.list(Some(JobState::Completed)).await.unwrap();

    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id.as_str(), "dead");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id.as_str(), "pending");
    assert!(completed.is_empty());
    assert_eq!(backend.list(None).await.unwrap().len(), 2);
}

#[doc(hidden)]
pub async fn summary(backend: impl BackendTesting) {
    assert_eq!(backend.summary().await.unwrap().total(), 0);

    backend.insert_dead("dead", epoch()).await;
    backend.insert(NewJob::mock_job("pending1")).await.unwrap();
    backend.insert(NewJob::mock_job("pending2")).await.unwrap();

    let summary = backend.summary().await.unwrap();
    assert_eq!(summary.count(JobState::Pending), 2);
    assert_eq!(summary.count(JobState::Dead), 1);
    assert_eq!(summary.count(JobState::Processing), 0);
    assert_eq!(summary.total(), 3);
}

#[doc(hidden)]
pub async fn claim_empty(backend: impl BackendTesting) {
    assert!(backend.claim(epoch()).await.unwrap().is_none());
}

#[doc(hidden)]
pub async fn claim_marks_processing(backend: impl BackendTesting) {
    let now = epoch() + TimeDelta::minutes(1);
    backend.insert(NewJob::mock_job("job1")).await.unwrap();

    let claimed = backend.claim_expecting("job1", now).await;

    assert_eq!(claimed.state, JobState::Processing);
    assert_eq!(claimed.updated_at, now);
    assert_eq!(claimed.attempts, 0);
    assert_eq!(backend.get_job("job1").await, claimed);
    assert!(backend.claim(now).await.unwrap().is_none());
}

#[doc(hidden)]
pub async fn claim_least_recently_updated_first(backend: impl BackendTesting) {
    for (offset, id) in [(2, "newest"), (0, "oldest"), (1, "middle")] {
        backend
            .insert(NewJob::mock_job(id).with_created_at(epoch() + TimeDelta::seconds(offset)))
            .await
            .unwrap();
    }
    let now = epoch() + TimeDelta::minutes(1);

    backend.claim_expecting("oldest", now).await;
    backend.claim_expecting("middle", now).await;
    backend.claim_expecting("newest", now).await;
}

#[doc(hidden)]
pub async fn claim_ties_broken_by_id(backend: impl BackendTesting) {
    backend.insert(NewJob::mock_job("b")).await.unwrap();
    backend.insert(NewJob::mock_job("a")).await.unwrap();

    backend.claim_expecting("a", epoch()).await;
    backend.claim_expecting("b", epoch()).await;
}

#[doc(hidden)]
pub async fn claim_skips_unclaimable(backend: impl BackendTesting) {
    let now = epoch();
    backend.insert(NewJob::mock_job("completed")).await.unwrap();
    backend.claim_expecting("completed", now).await;
    backend
        .mark_job_completed(&"completed".into(), now)
        .await
        .unwrap();
    backend.insert_dead("dead", now).await;
    backend.insert(NewJob::mock_job("processing")).await.unwrap();
    backend.claim_expecting("processing", now).await;

    assert!(backend
        .claim(now + TimeDelta::days(365))
        .await
        .unwrap()
        .is_none());
}

#[doc(hidden)]
pub async fn claim_failed_after_backoff(backend: impl BackendTesting) {
    let now = epoch();
    let retry_at = now + TimeDelta::seconds(5);
    backend.insert(NewJob::mock_job("job1")).await.unwrap();
    backend.claim_expecting("job1", now).await;
    backend
        .mark_job_failed(&"job1".into(), 1, retry_at, now)
        .await
        .unwrap();

    assert!(backend.claim(retry_at - DELTA).await.unwrap().is_none());

    let claimed = backend.claim_expecting("job1", retry_at).await;
    assert_eq!(claimed.attempts, 1);
    assert_eq!(claimed.state, JobState::Processing);
}

#[doc(hidden)]
pub async fn claim_is_exclusive(backend: impl BackendTesting) {
    const JOBS: usize = 10;
    for i in 0..JOBS {
        backend
            .insert(NewJob::mock_job(format!("job{i}")))
            .await
            .unwrap();
    }

    let claims = futures::future::join_all((0..JOBS * 3).map(|_| backend.claim(epoch()))).await;
    let claimed: Vec<JobId> = claims
        .into_iter()
        .filter_map(|claim| claim.unwrap())
        .map(|job| job.id)
        .collect();
    let unique: HashSet<_> = claimed.iter().cloned().collect();

    assert_eq!(claimed.len(), JOBS);
    assert_eq!(unique.len(), JOBS);
}

#[doc(hidden)]
pub async fn mark_job_completed(backend: impl BackendTesting) {
    let now = epoch() + TimeDelta::seconds(3);
    backend.insert(NewJob::mock_job("job1")).await.unwrap();
    backend.claim_expecting("job1", epoch()).await;

    backend.mark_job_completed(&"job1".into(), now).await.unwrap();

    let job = backend.get_job("job1").await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.updated_at, now);
    assert_eq!(job.attempts, 0);
}

#[doc(hidden)]
pub async fn mark_job_completed_not_processing(backend: impl BackendTesting) {
    backend.insert(NewJob::mock_job("job1")).await.unwrap();

    assert!(matches!(
        backend.mark_job_completed(&"job1".into(), epoch()).await,
        Err(BackendError::JobNotInState { state: JobState::Processing, .. })
    ));
    assert!(matches!(
        backend.mark_job_completed(&"missing".into(), epoch()).await,
        Err(BackendError::JobNotInState { .. })
    ));
    assert_eq!(backend.get_job("job1").await.state, JobState::Pending);
}

#[doc(hidden)]
pub async fn mark_job_failed(backend: impl BackendTesting) {
    let now = epoch() + TimeDelta::seconds(3);
    let retry_at = now + TimeDelta::seconds(5);
    backend.insert(NewJob::mock_job("job1")).await.unwrap();
    backend.claim_expecting("job1", epoch()).await;

    backend
        .mark_job_failed(&"job1".into(), 1, retry_at, now)
        .await
        .unwrap();

    let job = backend.get_job("job1").await;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.next_attempt_at, Some(retry_at));
    assert_eq!(job.updated_at, now);
}

#[doc(hidden)]
pub async fn mark_job_failed_not_processing(backend: impl BackendTesting) {
    backend.insert(NewJob::mock_job("job1")).await.unwrap();

    assert!(matches!(
        backend
            .mark_job_failed(&"job1".into(), 1, epoch(), epoch())
            .await,
        Err(BackendError::JobNotInState { state: JobState::Processing, .. })
    ));
    let job = backend.get_job("job1").await;
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.attempts, 0);
}

#[doc(hidden)]
pub async fn mark_job_dead(backend: impl BackendTesting) {
    let now = epoch() + TimeDelta::seconds(3);
    backend
        .insert(NewJob::mock_job("job1").with_max_retries(2))
        .await
        .unwrap();
    backend.claim_expecting("job1", epoch()).await;

    backend.mark_job_dead(&"job1".into(), 3, now).await.unwrap();

    let job = backend.get_job("job1").await;
    assert_eq!(job.state, JobState::Dead);
    assert_eq!(job.attempts, 3);
    assert_eq!(job.updated_at, now);
}

#[doc(hidden)]
pub async fn mark_job_dead_not_processing(backend: impl BackendTesting) {
    backend.insert(NewJob::mock_job("job1")).await.unwrap();

    assert!(matches!(
        backend.mark_job_dead(&"job1".into(), 1, epoch()).await,
        Err(BackendError::JobNotInState { state: JobState::Processing, .. })
    ));
    assert_eq!(backend.get_job("job1").await.state, JobState::Pending);
}

#[doc(hidden)]
pub async fn retry_dead_job(backend: impl BackendTesting) {
    let now = epoch() + TimeDelta::hours(1);
    backend.insert_dead("job1", epoch()).await;

    let job = backend.retry_dead_job(&"job1".into(), now).await.unwrap();

    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.updated_at, now);
    assert_eq!(job.max_retries, 0);
    assert_eq!(backend.get_job("job1").await, job);
    backend.claim_expecting("job1", now).await;
}

#[doc(hidden)]
pub async fn retry_dead_job_not_dead(backend: impl BackendTesting) {
    backend.insert(NewJob::mock_job("job1")).await.unwrap();
    let before = backend.get_job("job1").await;

    assert!(matches!(
        backend.retry_dead_job(&"job1".into(), epoch()).await,
        Err(BackendError::JobNotInState { state: JobState::Dead, .. })
    ));
    assert_eq!(backend.get_job("job1").await, before);
}

#[doc(hidden)]
pub async fn retry_dead_job_not_found(backend: impl BackendTesting) {
    assert!(matches!(
        backend.retry_dead_job(&"missing".into(), epoch()).await,
        Err(BackendError::JobNotInState { state: JobState::Dead, .. })
    ));
}
