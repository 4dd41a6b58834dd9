//! Parsing and validating job submission documents.
//!
//! A submission is a JSON object with a required `command` and optional `id` and `max_retries`:
//!
//! ```json
//! {"id": "job1", "command": "echo hello", "max_retries": 2}
//! ```
//!
//! A file may also hold an array of such objects. The whole batch is validated before anything is
//! written to the store.
use std::collections::HashSet;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    backend::{Backend, BackendError},
    clock::Clock,
    QueueError,
};

use super::{builder::JobBuilder, Job};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl Submission {
    /// Checks the submission and turns it into a [`JobBuilder`].
    pub fn validate(self) -> Result<JobBuilder, QueueError> {
        let command = match self.command {
            Some(command) if !command.trim().is_empty() => command,
            Some(_) => return Err(invalid("`command` must not be empty")),
            None => return Err(invalid("`command` is required")),
        };
        let mut builder = JobBuilder::new(command);
        if let Some(id) = self.id {
            if id.trim().is_empty() {
                return Err(invalid("`id` must not be empty when given"));
            }
            builder = builder.with_id(id);
        }
        if let Some(max_retries) = self.max_retries {
            builder = builder.with_max_retries(max_retries);
        }
        Ok(builder)
    }
}

fn invalid(reason: impl Into<String>) -> QueueError {
    QueueError::InvalidSubmission(reason.into())
}

/// Parses a submission file holding either a single document or an array of documents.
pub fn parse(input: &str) -> Result<Vec<Submission>, QueueError> {
    let documents = match serde_json::from_str::<Value>(input)? {
        Value::Array(documents) => documents,
        document @ Value::Object(_) => vec![document],
        _ => return Err(invalid("expected a JSON object or an array of objects")),
    };
    if documents.is_empty() {
        return Err(invalid("no jobs given"));
    }
    documents
        .into_iter()
        .enumerate()
        .map(|(index, document)| {
            if !document.is_object() {
                return Err(invalid(format!("document {index} is not a JSON object")));
            }
            Ok(serde_json::from_value::<Submission>(document)?)
        })
        .collect()
}

/// Validates every submission, rejecting the whole batch if any is invalid or if two of them
/// share an id.
pub fn validate_all(submissions: Vec<Submission>) -> Result<Vec<JobBuilder>, QueueError> {
    let mut seen = HashSet::new();
    submissions
        .into_iter()
        .enumerate()
        .map(|(index, submission)| {
            if let Some(id) = &submission.id {
                if !seen.insert(id.clone()) {
                    return Err(invalid(format!("id `{id}` is given more than once")));
                }
            }
            submission
                .validate()
                .map_err(|error| match error {
                    QueueError::InvalidSubmission(reason) => {
                        invalid(format!("document {index}: {reason}"))
                    }
                    error => error,
                })
        })
        .collect()
}

/// Parses, validates and inserts a submission file, returning the jobs created.
///
/// Nothing is inserted when any document is invalid or names an id that is already stored. Each
/// document is created one microsecond after the one before it, so a batch is claimed in file
/// order.
pub async fn enqueue_all<B: Backend + ?Sized>(
    input: &str,
    backend: &B,
    clock: &dyn Clock,
) -> Result<Vec<Job>, QueueError> {
    let now = clock.now();
    let jobs: Vec<_> = validate_all(parse(input)?)?
        .into_iter()
        .zip(0..)
        .map(|(builder, index)| builder.build(now + TimeDelta::microseconds(index)))
        .collect();
    for job in &jobs {
        if backend.get(&job.id).await?.is_some() {
            return Err(BackendError::DuplicateId(job.id.clone()).into());
        }
    }
    let mut inserted = Vec::with_capacity(jobs.len());
    for job in jobs {
        inserted.push(backend.insert(job).await?);
    }
    Ok(inserted)
}
