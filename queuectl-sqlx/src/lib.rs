//! A SQLite backed [`Backend`](queuectl::backend::Backend) for queuectl.
//!
//! The database is opened in write-ahead logging mode with a busy timeout, so any number of
//! worker processes can share one database file. Every state change is a single `UPDATE`
//! statement guarded by the state the job is expected to be in, which SQLite executes atomically;
//! in particular [`Backend::claim`](queuectl::backend::Backend::claim) selects and marks a job in
//! one statement, so two workers can never claim the same job.
//!
//! The schema is created by the embedded migrations in `migrations/`.
use std::{path::Path, str::FromStr, time::Duration};

use queuectl::{
    backend::BackendError,
    job::{JobId, NewJob},
    timestamp::Timestamp,
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use tracing::instrument;

mod backend;
mod query;
mod types;

use types::*;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CONNECTIONS: u32 = 4;

#[derive(Clone, Debug)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

pub(crate) fn map_err(error: sqlx::Error) -> BackendError {
    match error {
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::TypeNotFound { .. } => BackendError::Decode(error.to_string()),
        error => BackendError::Unavailable(error.to_string()),
    }
}

impl SqliteBackend {
    /// Opens the database at `url` (for example `sqlite://queuectl.db`), creating it if needed,
    /// and applies any pending migrations.
    pub async fn connect(url: &str) -> Result<Self, BackendError> {
        let options = SqliteConnectOptions::from_str(url).map_err(map_err)?;
        Self::connect_with(options).await
    }

    /// Opens the database file at `path`, creating it if needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        Self::connect_with(SqliteConnectOptions::new().filename(path)).await
    }

    async fn connect_with(options: SqliteConnectOptions) -> Result<Self, BackendError> {
        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(map_err)?;
        Self::from_pool(pool).await
    }

    /// Wraps an existing pool, applying any pending migrations.
    #[instrument(skip(pool))]
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, BackendError> {
        sqlx::migrate!()
            .run(&pool)
            .await
            .inspect_err(|error| tracing::error!(?error, "Failed to migrate job store: {error}"))
            .map_err(|error| BackendError::Unavailable(error.to_string()))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn insert_job(&self, job: &NewJob) -> sqlx::Result<u64> {
        let created_at = job.created_at.to_canonical();
        sqlx::query(
            r#"INSERT INTO jobs (
                id,
                command,
                state,
                attempts,
                max_retries,
                created_at,
                updated_at,
                next_attempt_at
            )
            VALUES (?, ?, 'pending', 0, ?, ?, ?, NULL)
            "#,
        )
        .bind(job.id.as_str())
        .bind(&job.command)
        .bind(i64::from(job.max_retries))
        .bind(&created_at)
        .bind(&created_at)
        .execute(&self.pool)
        .await
        .map(|result| result.rows_affected())
    }

    async fn load_job(&self, id: &JobId) -> sqlx::Result<Option<Job>> {
        sqlx::query_as::<_, Job>(
            r#"SELECT
                id,
                command,
                state,
                attempts,
                max_retries,
                created_at,
                updated_at,
                next_attempt_at
            FROM jobs
            WHERE id = ?
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
    }

    async fn count_by_state(&self) -> sqlx::Result<Vec<(JobState, i64)>> {
        sqlx::query_as::<_, (JobState, i64)>(
            "SELECT state, COUNT(*) AS count FROM jobs GROUP BY state",
        )
        .fetch_all(&self.pool)
        .await
    }

    async fn load_job_mark_as_processing(&self, now: Timestamp) -> sqlx::Result<Option<Job>> {
        let now = now.to_canonical();
        sqlx::query_as::<_, Job>(
            r#"UPDATE jobs
            SET
                state = 'processing',
                updated_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE state = 'pending'
                OR (state = 'failed' AND next_attempt_at <= ?)
                ORDER BY updated_at ASC, created_at ASC, id ASC
                LIMIT 1
            )
            AND state IN ('pending', 'failed')
            RETURNING
                id,
                command,
                state,
                attempts,
                max_retries,
                created_at,
                updated_at,
                next_attempt_at
            "#,
        )
        .bind(&now)
        .bind(&now)
        .fetch_optional(&self.pool)
        .await
    }

    async fn _mark_job_completed(&self, id: &JobId, now: Timestamp) -> sqlx::Result<u64> {
        sqlx::query(
            r#"UPDATE jobs
            SET
                state = 'completed',
                updated_at = ?
            WHERE id = ? AND state = 'processing'
            "#,
        )
        .bind(now.to_canonical())
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map(|result| result.rows_affected())
    }

    async fn _mark_job_failed(
        &self,
        id: &JobId,
        attempts: u32,
        next_attempt_at: Timestamp,
        now: Timestamp,
    ) -> sqlx::Result<u64> {
        sqlx::query(
            r#"UPDATE jobs
            SET
                state = 'failed',
                attempts = ?,
                next_attempt_at = ?,
                updated_at = ?
            WHERE id = ? AND state = 'processing'
            "#,
        )
        .bind(i64::from(attempts))
        .bind(next_attempt_at.to_canonical())
        .bind(now.to_canonical())
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map(|result| result.rows_affected())
    }

    async fn _mark_job_dead(&self, id: &JobId, attempts: u32, now: Timestamp) -> sqlx::Result<u64> {
        sqlx::query(
            r#"UPDATE jobs
            SET
                state = 'dead',
                attempts = ?,
                updated_at = ?
            WHERE id = ? AND state = 'processing'
            "#,
        )
        .bind(i64::from(attempts))
        .bind(now.to_canonical())
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map(|result| result.rows_affected())
    }

    async fn rerun_dead_job(&self, id: &JobId, now: Timestamp) -> sqlx::Result<Option<Job>> {
        let now = now.to_canonical();
        sqlx::query_as::<_, Job>(
            r#"UPDATE jobs
            SET
                state = 'pending',
                attempts = 0,
                next_attempt_at = ?,
                updated_at = ?
            WHERE id = ? AND state = 'dead'
            RETURNING
                id,
                command,
                state,
                attempts,
                max_retries,
                created_at,
                updated_at,
                next_attempt_at
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
    }
}
