use queuectl::job::JobState;
use sqlx::{QueryBuilder, Sqlite};

/// Builds the query behind [`Backend::list`](queuectl::backend::Backend::list).
pub(crate) fn list_jobs(state: Option<JobState>) -> QueryBuilder<'static, Sqlite> {
    let mut builder = QueryBuilder::new(
        r#"SELECT
            id,
            command,
            state,
            attempts,
            max_retries,
            created_at,
            updated_at,
            next_attempt_at
        FROM jobs"#,
    );
    if let Some(state) = state {
        builder.push(" WHERE state = ");
        builder.push_bind(crate::types::JobState::from(state));
    }
    builder.push(" ORDER BY created_at DESC, id DESC");
    builder
}
