//! Running job commands as child processes.
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

/// How a job's command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The command exited with status zero.
    Success,
    /// The command exited with a non-zero status, or was killed by a signal (`code` is `None`).
    Failure { code: Option<i32> },
    /// The command could not be started at all.
    LaunchError(String),
}

impl ExitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "exited successfully"),
            Self::Failure { code: Some(code) } => write!(f, "exited with status {code}"),
            Self::Failure { code: None } => write!(f, "terminated by signal"),
            Self::LaunchError(error) => write!(f, "failed to start: {error}"),
        }
    }
}

/// Runs commands on behalf of a worker.
///
/// Implementations must wait for the command to finish; the worker relies on this to never have
/// more than one job in flight.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Supervisor: Send + Sync {
    async fn run(&self, command: &str) -> ExitOutcome;
}

/// Runs commands through a shell with no standard input, streaming the command's output to the
/// worker's own stdout and stderr.
#[derive(Debug, Clone)]
pub struct ShellSupervisor {
    shell: String,
}

impl ShellSupervisor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellSupervisor {
    fn default() -> Self {
        Self::new("sh")
    }
}

#[async_trait]
impl Supervisor for ShellSupervisor {
    async fn run(&self, command: &str) -> ExitOutcome {
        let status = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => ExitOutcome::Success,
            Ok(status) => ExitOutcome::Failure {
                code: status.code(),
            },
            Err(error) => ExitOutcome::LaunchError(error.to_string()),
        }
    }
}
