//! Command line definition and the implementation of each command.
use std::{
    fs::OpenOptions,
    io::Read,
    path::{Path, PathBuf},
    process::Stdio,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::{style, Emoji};
use queuectl::{backend::Backend, job::JobState, worker::Worker, Queue};
use queuectl_sqlx::SqliteBackend;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{Config, DEFAULT_CONFIG_FILE},
    registry::Registry,
    table,
};

static SUCCESS: Emoji<'_, '_> = Emoji("✓", "√");
static INFO: Emoji<'_, '_> = Emoji("ℹ", "i");

#[derive(Parser, Debug)]
#[command(name = "queuectl")]
#[command(about = "A persistent job queue that runs shell commands on background workers")]
#[command(version)]
pub struct Cli {
    /// Configuration file
    #[arg(long, short = 'c', default_value = DEFAULT_CONFIG_FILE, global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit the job or jobs described in a JSON file (`-` reads standard input)
    Enqueue { file: PathBuf },
    /// Manage worker processes
    Worker {
        #[command(subcommand)]
        action: WorkerAction,
    },
    /// List jobs, newest first
    List {
        /// Only show jobs in this state
        #[arg(long, short = 's')]
        state: Option<JobState>,
    },
    /// Show the number of jobs in each state and the number of active workers
    Status,
    /// Inspect and retry jobs in the dead letter queue
    Dlq {
        #[command(subcommand)]
        action: DlqAction,
    },
    /// Manage configuration values
    Config {
        action: String,
        args: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum WorkerAction {
    /// Start detached worker processes
    Start {
        /// Number of workers to start
        #[arg(long, short = 'n', default_value = "1", value_parser = clap::value_parser!(u32).range(1..))]
        count: u32,
    },
    /// Ask every running worker to stop once its current job is finished
    Stop,
    /// Run a single worker in the foreground
    #[command(hide = true)]
    Run,
}

#[derive(Subcommand, Debug)]
pub enum DlqAction {
    /// List dead jobs
    List,
    /// Move a dead job back to pending with its attempts reset
    Retry { id: String },
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = Config::load(&self.config)
            .with_context(|| format!("Failed to load configuration from {}", self.config.display()))?;
        match self.command {
            Command::Enqueue { file } => enqueue(&config, &file).await,
            Command::Worker { action } => match action {
                WorkerAction::Start { count } => start_workers(&config, &self.config, count).await,
                WorkerAction::Stop => stop_workers(&config),
                WorkerAction::Run => run_worker(&config).await,
            },
            Command::List { state } => list(&config, state).await,
            Command::Status => status(&config).await,
            Command::Dlq { action } => match action {
                DlqAction::List => list(&config, Some(JobState::Dead)).await,
                DlqAction::Retry { id } => retry_dead(&config, &id).await,
            },
            Command::Config { action, .. } => {
                println!("{INFO} config {action}: not implemented");
                Ok(())
            }
        }
    }
}

async fn open_backend(config: &Config) -> Result<SqliteBackend> {
    SqliteBackend::connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to open job store {}", config.database_url))
}

async fn open_queue(config: &Config) -> Result<Queue<SqliteBackend>> {
    Ok(Queue::new(open_backend(config).await?))
}

fn read_submission(file: &Path) -> Result<String> {
    if file == Path::new("-") {
        let mut contents = String::new();
        std::io::stdin()
            .read_to_string(&mut contents)
            .context("Failed to read standard input")?;
        return Ok(contents);
    }
    std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
}

async fn enqueue(config: &Config, file: &Path) -> Result<()> {
    let submission = read_submission(file)?;
    let queue = open_queue(config).await?;
    let result = queue.enqueue(&submission).await;
    queue.close().await;
    let jobs = result.with_context(|| format!("Failed to enqueue {}", file.display()))?;
    for job in jobs {
        println!("{SUCCESS} Enqueued job {}", style(&job.id).cyan());
    }
    Ok(())
}

async fn list(config: &Config, state: Option<JobState>) -> Result<()> {
    let queue = open_queue(config).await?;
    let result = queue.list(state).await;
    queue.close().await;
    print!("{}", table::jobs(&result.context("Failed to list jobs")?));
    Ok(())
}

async fn status(config: &Config) -> Result<()> {
    let queue = open_queue(config).await?;
    let result = queue.summary().await;
    queue.close().await;
    let summary = result.context("Failed to count jobs")?;
    let workers = Registry::new(&config.registry_dir).live()?;
    print!("{}", table::summary(&summary, workers.len()));
    Ok(())
}

async fn retry_dead(config: &Config, id: &str) -> Result<()> {
    let queue = open_queue(config).await?;
    let result = queue.retry_dead(&id.into()).await;
    queue.close().await;
    let job = result.with_context(|| format!("Failed to retry job {id}"))?;
    println!(
        "{SUCCESS} Job {} moved back to {}",
        style(&job.id).cyan(),
        job.state
    );
    Ok(())
}

async fn start_workers(config: &Config, config_file: &Path, count: u32) -> Result<()> {
    // Workers opening a fresh database at the same time would race to create the schema.
    open_backend(config).await?.close().await;

    let registry = Registry::new(&config.registry_dir);
    registry.live()?;
    registry.ensure_dir()?;
    let log_file = registry.log_file();
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .with_context(|| format!("Failed to open {}", log_file.display()))?;
    let exe = std::env::current_exe().context("Failed to locate the queuectl executable")?;

    for _ in 0..count {
        let mut command = std::process::Command::new(&exe);
        command
            .arg("--config")
            .arg(config_file)
            .args(["worker", "run"])
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone().context("Failed to clone log handle")?))
            .stderr(Stdio::from(log.try_clone().context("Failed to clone log handle")?));
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let child = command.spawn().context("Failed to start worker")?;
        let pid = child.id();
        registry.register(pid)?;
        println!("{SUCCESS} Started worker (PID: {pid})");
    }
    println!(
        "{INFO} Worker output is appended to {}",
        style(log_file.display()).dim()
    );
    Ok(())
}

fn stop_workers(config: &Config) -> Result<()> {
    let pids = Registry::new(&config.registry_dir).stop_all()?;
    if pids.is_empty() {
        println!("{INFO} No workers running");
        return Ok(());
    }
    for pid in pids {
        println!("{SUCCESS} Sent stop signal to worker (PID: {pid})");
    }
    Ok(())
}

async fn run_worker(config: &Config) -> Result<()> {
    // Listen before anything else so a stop request sent while the store is opening is not lost.
    let shutdown = CancellationToken::new();
    let signals = ShutdownSignals::listen().context("Failed to listen for shutdown signals")?;
    tokio::spawn(cancel_on_shutdown_signal(signals, shutdown.clone()));

    let pid = std::process::id();
    let registry = Registry::new(&config.registry_dir);
    registry.register(pid)?;

    let result = async {
        let backend = open_backend(config).await?;
        let worker = Worker::new(backend)
            .with_config(config.worker_config())
            .with_cancellation_token(shutdown);
        let report = worker.run().await;
        tracing::info!(
            pid,
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            stop_reason = ?report.stop_reason,
            "Worker exiting"
        );
        anyhow::Ok(())
    }
    .await;

    registry.unregister(pid)?;
    result
}

/// Cancels `token` on interrupt or terminate, leaving the current job to finish.
async fn cancel_on_shutdown_signal(mut signals: ShutdownSignals, token: CancellationToken) {
    signals.recv().await;
    tracing::info!("Shutdown requested, finishing current job");
    token.cancel();
}

/// Interrupt and terminate handlers, installed as soon as this is constructed.
#[cfg(unix)]
struct ShutdownSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    fn listen() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => {}
            _ = self.terminate.recv() => {}
        }
    }
}

#[cfg(windows)]
struct ShutdownSignals {
    ctrl_c: tokio::signal::windows::CtrlC,
}

#[cfg(windows)]
impl ShutdownSignals {
    fn listen() -> std::io::Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c()?,
        })
    }

    async fn recv(&mut self) {
        self.ctrl_c.recv().await;
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("queuectl").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn enqueue_takes_a_file() {
        let cli = parse(&["enqueue", "jobs.json"]);

        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        assert!(matches!(cli.command, Command::Enqueue { file } if file == Path::new("jobs.json")));
    }

    #[test]
    fn worker_start_defaults_to_one() {
        let cli = parse(&["worker", "start"]);
        assert!(matches!(
            cli.command,
            Command::Worker {
                action: WorkerAction::Start { count: 1 }
            }
        ));

        let cli = parse(&["worker", "start", "--count", "4"]);
        assert!(matches!(
            cli.command,
            Command::Worker {
                action: WorkerAction::Start { count: 4 }
            }
        ));
    }

    #[test]
    fn worker_start_rejects_zero() {
        assert!(Cli::try_parse_from(["queuectl", "worker", "start", "--count", "0"]).is_err());
    }

    #[test]
    fn config_flag_is_global() {
        let cli = parse(&["worker", "run", "--config", "other.toml"]);

        assert_eq!(cli.config, PathBuf::from("other.toml"));
        assert!(matches!(
            cli.command,
            Command::Worker {
                action: WorkerAction::Run
            }
        ));
    }

    #[test]
    fn list_parses_states() {
        let cli = parse(&["list", "--state", "failed"]);
        assert!(matches!(
            cli.command,
            Command::List {
                state: Some(JobState::Failed)
            }
        ));

        assert!(Cli::try_parse_from(["queuectl", "list", "--state", "sleeping"]).is_err());
    }

    #[test]
    fn dlq_retry_takes_an_id() {
        let cli = parse(&["dlq", "retry", "job1"]);

        assert!(matches!(
            cli.command,
            Command::Dlq {
                action: DlqAction::Retry { id }
            } if id == "job1"
        ));
    }

    #[test]
    fn config_accepts_any_action() {
        let cli = parse(&["config", "set", "max_retries", "5"]);

        assert!(matches!(
            cli.command,
            Command::Config { action, args } if action == "set" && args == ["max_retries", "5"]
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_cancels_the_worker_token() {
        let token = CancellationToken::new();
        let signals = ShutdownSignals::listen().unwrap();
        tokio::spawn(cancel_on_shutdown_signal(signals, token.clone()));

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(std::time::Duration::from_secs(5), token.cancelled())
            .await
            .unwrap();
    }
}
