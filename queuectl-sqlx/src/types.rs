use queuectl::{backend::BackendError, timestamp::Timestamp};
use sqlx::prelude::FromRow;

#[derive(sqlx::Type, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(rename_all = "lowercase")]
pub(crate) enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl From<JobState> for queuectl::job::JobState {
    fn from(value: JobState) -> Self {
        match value {
            JobState::Pending => Self::Pending,
            JobState::Processing => Self::Processing,
            JobState::Completed => Self::Completed,
            JobState::Failed => Self::Failed,
            JobState::Dead => Self::Dead,
        }
    }
}

impl From<queuectl::job::JobState> for JobState {
    fn from(value: queuectl::job::JobState) -> Self {
        match value {
            queuectl::job::JobState::Pending => Self::Pending,
            queuectl::job::JobState::Processing => Self::Processing,
            queuectl::job::JobState::Completed => Self::Completed,
            queuectl::job::JobState::Failed => Self::Failed,
            queuectl::job::JobState::Dead => Self::Dead,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct Job {
    pub id: String,
    pub command: String,
    pub state: JobState,
    pub attempts: i64,
    pub max_retries: i64,
    pub created_at: String,
    pub updated_at: String,
    pub next_attempt_at: Option<String>,
}

fn timestamp(value: &str) -> Result<Timestamp, BackendError> {
    Timestamp::parse_canonical(value).map_err(|error| BackendError::Decode(error.to_string()))
}

fn count(column: &str, value: i64) -> Result<u32, BackendError> {
    u32::try_from(value)
        .map_err(|_| BackendError::Decode(format!("`{column}` out of range: {value}")))
}

impl TryFrom<Job> for queuectl::job::Job {
    type Error = BackendError;

    fn try_from(value: Job) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.id.into(),
            command: value.command,
            state: value.state.into(),
            attempts: count("attempts", value.attempts)?,
            max_retries: count("max_retries", value.max_retries)?,
            created_at: timestamp(&value.created_at)?,
            updated_at: timestamp(&value.updated_at)?,
            next_attempt_at: value
                .next_attempt_at
                .as_deref()
                .map(timestamp)
                .transpose()?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn row() -> Job {
        Job {
            id: "job1".to_owned(),
            command: "true".to_owned(),
            state: JobState::Failed,
            attempts: 1,
            max_retries: 3,
            created_at: "2024-01-01T00:00:00.000000Z".to_owned(),
            updated_at: "2024-01-01T00:00:01.000000Z".to_owned(),
            next_attempt_at: Some("2024-01-01T00:00:06.000000Z".to_owned()),
        }
    }

    #[test]
    fn row_converts_to_job() {
        let job = queuectl::job::Job::try_from(row()).unwrap();

        assert_eq!(job.id.as_str(), "job1");
        assert_eq!(job.state, queuectl::job::JobState::Failed);
        assert_eq!(job.attempts, 1);
        assert_eq!(
            job.next_attempt_at.map(|at| at.to_canonical()).as_deref(),
            Some("2024-01-01T00:00:06.000000Z")
        );
    }

    #[test]
    fn malformed_rows_are_decode_errors() {
        let bad_timestamp = Job {
            updated_at: "yesterday".to_owned(),
            ..row()
        };
        let negative_attempts = Job {
            attempts: -1,
            ..row()
        };

        assert!(matches!(
            queuectl::job::Job::try_from(bad_timestamp),
            Err(BackendError::Decode(_))
        ));
        assert!(matches!(
            queuectl::job::Job::try_from(negative_attempts),
            Err(BackendError::Decode(_))
        ));
    }
}
