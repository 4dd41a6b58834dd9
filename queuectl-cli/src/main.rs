//! `queuectl`: submit shell command jobs and run the workers that execute them.
use std::process::ExitCode;

use clap::Parser;
use console::style;
use tracing::Subscriber;
use tracing_subscriber::{
    fmt::MakeWriter, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, Layer,
};

use crate::cli::{Cli, Command, WorkerAction};

mod cli;
mod config;
mod registry;
mod table;

/// Log lines only carry colour codes when `ansi` is set; detached workers write to a file.
fn log_layer<S, W>(writer: W, ansi: bool) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    // Workers log their progress; operator commands only report problems.
    let default_filter = match cli.command {
        Command::Worker {
            action: WorkerAction::Run,
        } => "queuectl=info,queuectl_sqlx=info,sqlx=warn",
        _ => "warn",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(log_layer(std::io::stderr, console::colors_enabled_stderr()))
        .init();

    match cli.execute().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{} {error:#}", style("error:").red().bold());
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::Write,
        sync::{Arc, Mutex},
    };

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn capture(ansi: bool) -> String {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::registry().with(log_layer(
            {
                let captured = captured.clone();
                move || captured.clone()
            },
            ansi,
        ));

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(job_id = "job1", "Job job1 exited with status 1");
        });

        let output = captured.0.lock().unwrap().clone();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn plain_log_lines_have_no_escape_codes() {
        let output = capture(false);

        assert!(output.contains("Job job1 exited with status 1"));
        assert!(output.contains("job_id=\"job1\""));
        assert!(!output.contains('\x1b'));
    }

    #[test]
    fn coloured_log_lines_have_escape_codes() {
        assert!(capture(true).contains('\x1b'));
    }
}
