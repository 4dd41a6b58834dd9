//! Deciding where a claimed job goes once its command has finished.
use chrono::TimeDelta;

use crate::{backoff::Strategy, supervisor::ExitOutcome, timestamp::Timestamp};

use super::Job;

/// The state change to record for a job that has just been executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The command succeeded; `attempts` is left as it is.
    Complete,
    /// The command failed and the job has retries left.
    Retry {
        attempts: u32,
        next_attempt_at: Timestamp,
        delay: TimeDelta,
    },
    /// The command failed and the job has no retries left.
    Bury { attempts: u32 },
}

impl Job {
    /// Computes the transition for this job given the `outcome` of running it at `now`.
    ///
    /// A failure increments `attempts`; once that count exceeds `max_retries` the job is dead,
    /// which keeps `attempts <= max_retries + 1`.
    pub fn transition(
        &self,
        outcome: &ExitOutcome,
        now: Timestamp,
        backoff: &impl Strategy,
    ) -> Transition {
        if outcome.is_success() {
            return Transition::Complete;
        }
        let attempts = self.attempts.saturating_add(1);
        if attempts > self.max_retries {
            Transition::Bury { attempts }
        } else {
            let delay = backoff.backoff(attempts);
            Transition::Retry {
                attempts,
                next_attempt_at: now + delay,
                delay,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;
    use crate::{
        backoff::DEFAULT_BACKOFF,
        job::{JobState, NewJob},
    };

    fn processing_job(attempts: u32, max_retries: u32) -> Job {
        Job {
            state: JobState::Processing,
            attempts,
            ..NewJob {
                id: "job".into(),
                command: "false".to_owned(),
                max_retries,
                created_at: Timestamp::now(),
            }
            .into_job()
        }
    }

    fn failure() -> ExitOutcome {
        ExitOutcome::Failure { code: Some(1) }
    }

    #[test]
    fn success_completes_without_touching_attempts() {
        let job = processing_job(2, 3);

        let transition = job.transition(&ExitOutcome::Success, Timestamp::now(), &DEFAULT_BACKOFF);

        assert_eq!(transition, Transition::Complete);
    }

    #[test]
    fn failure_with_retries_left_schedules_backoff_from_new_attempt_count() {
        let now = Timestamp::now();
        let job = processing_job(1, 3);

        let transition = job.transition(&failure(), now, &DEFAULT_BACKOFF);

        assert_eq!(
            transition,
            Transition::Retry {
                attempts: 2,
                next_attempt_at: now + TimeDelta::seconds(10),
                delay: TimeDelta::seconds(10),
            }
        );
    }

    #[test]
    fn failure_without_retries_buries_the_job() {
        let job = processing_job(0, 0);

        let transition = job.transition(&failure(), Timestamp::now(), &DEFAULT_BACKOFF);

        assert_eq!(transition, Transition::Bury { attempts: 1 });
    }

    #[test]
    fn launch_errors_count_as_failures() {
        let job = processing_job(0, 1);

        let transition = job.transition(
            &ExitOutcome::LaunchError("no such shell".to_owned()),
            Timestamp::now(),
            &DEFAULT_BACKOFF,
        );

        assert_matches!(transition, Transition::Retry { attempts: 1, .. });
    }

    #[test]
    fn attempts_never_exceed_max_retries_plus_one() {
        for max_retries in 0..6 {
            let mut job = processing_job(0, max_retries);
            loop {
                match job.transition(&failure(), Timestamp::now(), &DEFAULT_BACKOFF) {
                    Transition::Retry { attempts, .. } => {
                        assert!(attempts <= max_retries);
                        job.attempts = attempts;
                    }
                    Transition::Bury { attempts } => {
                        assert_eq!(attempts, max_retries + 1);
                        break;
                    }
                    Transition::Complete => unreachable!("failures never complete"),
                }
            }
        }
    }
}
