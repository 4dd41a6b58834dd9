//! PID-file registry of worker processes.
//!
//! Every worker writes `<pid>.pid` into the registry directory when it starts and removes it when
//! it exits. Entries whose process is gone (a worker that was killed outright) are pruned whenever
//! the live workers are listed.
use std::{io::ErrorKind, path::PathBuf};

use anyhow::{Context, Result};

const PID_EXTENSION: &str = "pid";
const LOG_FILE: &str = "workers.log";

#[derive(Debug, Clone)]
pub struct Registry {
    dir: PathBuf,
}

impl Registry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File that detached workers append their output to.
    pub fn log_file(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    fn pid_file(&self, pid: u32) -> PathBuf {
        self.dir.join(format!("{pid}.{PID_EXTENSION}"))
    }

    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))
    }

    pub fn register(&self, pid: u32) -> Result<()> {
        self.ensure_dir()?;
        let path = self.pid_file(pid);
        std::fs::write(&path, pid.to_string())
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Removes the entry for `pid`. Removing an entry that does not exist is not an error.
    pub fn unregister(&self, pid: u32) -> Result<()> {
        let path = self.pid_file(pid);
        match std::fs::remove_file(&path) {
            Err(error) if error.kind() != ErrorKind::NotFound => {
                Err(error).with_context(|| format!("Failed to remove {}", path.display()))
            }
            _ => Ok(()),
        }
    }

    /// Every registered PID, live or not, in ascending order.
    pub fn pids(&self) -> Result<Vec<u32>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(error) => {
                return Err(error).with_context(|| format!("Failed to read {}", self.dir.display()))
            }
        };
        let mut pids = vec![];
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == PID_EXTENSION) {
                if let Some(pid) = path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .and_then(|stem| stem.parse().ok())
                {
                    pids.push(pid);
                }
            }
        }
        pids.sort_unstable();
        Ok(pids)
    }

    /// The registered PIDs whose process is still running. Stale entries are removed.
    pub fn live(&self) -> Result<Vec<u32>> {
        let mut live = vec![];
        for pid in self.pids()? {
            if is_process_alive(pid) {
                live.push(pid);
            } else {
                tracing::debug!(pid, "Pruning stale worker entry");
                self.unregister(pid)?;
            }
        }
        Ok(live)
    }

    /// Asks every live worker to shut down and returns the PIDs that were signalled.
    ///
    /// Workers remove their own entry once their current job is recorded.
    pub fn stop_all(&self) -> Result<Vec<u32>> {
        let pids = self.live()?;
        for pid in &pids {
            terminate_process(*pid);
        }
        Ok(pids)
    }
}

#[cfg(unix)]
fn terminate_process(pid: u32) {
    let _ = std::process::Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status();
}

#[cfg(not(unix))]
fn terminate_process(pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string()])
        .status();
}

#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .output()
        .is_ok_and(|o| o.status.success())
}

#[cfg(not(unix))]
fn is_process_alive(pid: u32) -> bool {
    std::process::Command::new("tasklist")
        .args(["/FI", &format!("PID eq {pid}"), "/NH"])
        .output()
        .is_ok_and(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[cfg(unix)]
    fn exited_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        child.wait().unwrap();
        child.id()
    }

    #[test]
    fn missing_directory_has_no_workers() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::new(dir.path().join("workers"));

        assert!(registry.pids().unwrap().is_empty());
        assert!(registry.live().unwrap().is_empty());
    }

    #[test]
    fn register_and_unregister() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::new(dir.path().join("workers"));

        registry.register(42).unwrap();
        registry.register(7).unwrap();
        assert_eq!(registry.pids().unwrap(), vec![7, 42]);

        registry.unregister(42).unwrap();
        registry.unregister(42).unwrap();
        assert_eq!(registry.pids().unwrap(), vec![7]);
    }

    #[test]
    fn other_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::new(dir.path());
        registry.register(12).unwrap();
        std::fs::write(registry.log_file(), "output").unwrap();
        std::fs::write(dir.path().join("notapid.pid"), "").unwrap();

        assert_eq!(registry.pids().unwrap(), vec![12]);
    }

    #[cfg(unix)]
    #[test]
    fn live_prunes_dead_processes() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::new(dir.path());
        let me = std::process::id();
        let gone = exited_pid();
        registry.register(me).unwrap();
        registry.register(gone).unwrap();

        assert_eq!(registry.live().unwrap(), vec![me]);
        assert_eq!(registry.pids().unwrap(), vec![me]);
    }
}
