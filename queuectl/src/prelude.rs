//! The purpose of this module is to alleviate the need to import many of the `[queuectl]` types.
//!
//! ```
//! # #![allow(unused_imports)]
//! use queuectl::prelude::*;
//! ```
pub use crate::backend::{Backend, BackendError, QueueSummary};
pub use crate::backoff::{Exponential, Strategy};
pub use crate::clock::{Clock, FixedClock, SystemClock};
pub use crate::job::builder::JobBuilder;
pub use crate::job::{Job, JobId, JobState};
pub use crate::supervisor::{ExitOutcome, ShellSupervisor, Supervisor};
pub use crate::timestamp::Timestamp;
pub use crate::worker::{StopReason, Worker, WorkerConfig, WorkerReport};
pub use crate::{Queue, QueueError};
