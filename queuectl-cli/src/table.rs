//! Fixed-width tables for the `list`, `dlq list` and `status` commands.
use std::fmt::Write;

use console::{style, StyledObject};
use queuectl::{
    backend::QueueSummary,
    job::{Job, JobState},
};

const ID_WIDTH: usize = 36;
const STATE_WIDTH: usize = 10;
const COUNT_WIDTH: usize = 8;
const TIME_WIDTH: usize = 27;
const COMMAND_WIDTH: usize = 48;

fn styled_state(state: JobState, width: usize) -> StyledObject<String> {
    let cell = style(format!("{:<width$}", state.as_str()));
    match state {
        JobState::Pending => cell.yellow(),
        JobState::Processing => cell.cyan(),
        JobState::Completed => cell.green(),
        JobState::Failed => cell.red(),
        JobState::Dead => cell.red().bold(),
    }
}

pub fn jobs(jobs: &[Job]) -> String {
    if jobs.is_empty() {
        return "No jobs found.\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}",
        style(format!(
            "{:<ID_WIDTH$} {:<STATE_WIDTH$} {:>COUNT_WIDTH$} {:>COUNT_WIDTH$} {:<TIME_WIDTH$} COMMAND",
            "ID", "STATE", "ATTEMPTS", "RETRIES", "UPDATED"
        ))
        .bold()
    );
    for job in jobs {
        let _ = writeln!(
            out,
            "{:<ID_WIDTH$} {} {:>COUNT_WIDTH$} {:>COUNT_WIDTH$} {:<TIME_WIDTH$} {}",
            job.id.as_str(),
            styled_state(job.state, STATE_WIDTH),
            job.attempts,
            job.max_retries,
            job.updated_at.to_canonical(),
            console::truncate_str(&job.command, COMMAND_WIDTH, "..."),
        );
    }
    out
}

pub fn summary(summary: &QueueSummary, active_workers: usize) -> String {
    let mut out = String::new();
    for (state, count) in summary.iter() {
        let _ = writeln!(
            out,
            "{} {count:>COUNT_WIDTH$}",
            styled_state(state, STATE_WIDTH + 2)
        );
    }
    let _ = writeln!(
        out,
        "{} {:>COUNT_WIDTH$}",
        style(format!("{:<width$}", "total", width = STATE_WIDTH + 2)).bold(),
        summary.total()
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "Active workers: {}", style(active_workers).bold());
    out
}

#[cfg(test)]
mod tests {
    use console::strip_ansi_codes;
    use queuectl::{job::NewJob, timestamp::Timestamp};

    use super::*;

    fn job(id: &str, command: &str, state: JobState) -> Job {
        let created_at: Timestamp = "2024-01-01T00:00:00.000000Z".parse().unwrap();
        Job {
            state,
            ..NewJob {
                id: id.into(),
                command: command.to_string(),
                max_retries: 3,
                created_at,
            }
            .into_job()
        }
    }

    #[test]
    fn empty_list() {
        assert_eq!(jobs(&[]), "No jobs found.\n");
    }

    #[test]
    fn one_row_per_job() {
        let table = jobs(&[
            job("job1", "echo one", JobState::Pending),
            job("job2", "exit 1", JobState::Dead),
        ]);
        let table = strip_ansi_codes(&table);
        let lines: Vec<_> = table.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ID"));
        assert!(lines[0].ends_with("COMMAND"));
        assert!(lines[1].starts_with("job1 "));
        assert!(lines[1].contains(" pending "));
        assert!(lines[1].contains("2024-01-01T00:00:00.000000Z"));
        assert!(lines[1].ends_with("echo one"));
        assert!(lines[2].contains(" dead "));
        assert_eq!(lines[1].find("echo"), lines[2].find("exit"));
    }

    #[test]
    fn long_commands_are_truncated() {
        let command = "x".repeat(200);
        let table = jobs(&[job("job1", &command, JobState::Pending)]);
        let table = strip_ansi_codes(&table);

        assert!(table.lines().nth(1).unwrap().ends_with("..."));
        assert!(!table.contains(&command));
    }

    #[test]
    fn summary_lists_every_state() {
        let counts: QueueSummary = [(JobState::Pending, 2), (JobState::Dead, 1)]
            .into_iter()
            .collect();

        let table = summary(&counts, 3);
        let table = strip_ansi_codes(&table);
        let lines: Vec<_> = table.lines().collect();

        assert_eq!(lines.len(), 8);
        assert!(lines[0].starts_with("pending"));
        assert!(lines[0].ends_with(" 2"));
        assert!(lines[2].starts_with("completed"));
        assert!(lines[2].ends_with(" 0"));
        assert!(lines[5].starts_with("total"));
        assert!(lines[5].ends_with(" 3"));
        assert_eq!(lines[7], "Active workers: 3");
    }
}
