//! The job record and its lifecycle.
use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::timestamp::Timestamp;

pub mod builder;
pub mod submission;
pub mod transition;

/// The default number of retries a job gets when none is requested.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Opaque identifier of a job, unique for the lifetime of a store.
#[derive(Debug, Eq, PartialEq, Clone, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<JobId> for String {
    fn from(value: JobId) -> Self {
        value.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a job is in its lifecycle.
///
/// ```text
/// pending ──claim──▶ processing ──success──▶ completed
///    ▲                  │  ▲
///    │                  │  └──claim (next_attempt_at <= now)──┐
///    │                  ├──failure, retries left──▶ failed ───┘
///    │                  └──failure, no retries left──▶ dead
///    └──────────────── operator retry ◀──────────────────┘
/// ```
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Failed,
        Self::Dead,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Dead => "dead",
        }
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown job state `{0}`, expected one of pending, processing, completed, failed, dead")]
pub struct UnknownJobState(String);

impl FromStr for JobState {
    type Err = UnknownJobState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| UnknownJobState(s.to_owned()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub command: String,
    pub state: JobState,
    /// Number of failed executions so far.
    pub attempts: u32,
    pub max_retries: u32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Only meaningful while the job is [`JobState::Failed`].
    pub next_attempt_at: Option<Timestamp>,
}

impl Job {
    /// Whether a worker asking at `now` may claim this job.
    pub fn is_claimable(&self, now: Timestamp) -> bool {
        match self.state {
            JobState::Pending => true,
            JobState::Failed => self.next_attempt_at.is_some_and(|at| at <= now),
            JobState::Processing | JobState::Completed | JobState::Dead => false,
        }
    }
}

/// A validated job ready to be inserted into a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub id: JobId,
    pub command: String,
    pub max_retries: u32,
    pub created_at: Timestamp,
}

impl NewJob {
    /// The record a store holds right after inserting this job.
    pub fn into_job(self) -> Job {
        Job {
            id: self.id,
            command: self.command,
            state: JobState::Pending,
            attempts: 0,
            max_retries: self.max_retries,
            created_at: self.created_at,
            updated_at: self.created_at,
            next_attempt_at: None,
        }
    }
}
