//! Configuration for the queuectl command line.
//!
//! Values are layered: built in defaults, then the TOML file (`queuectl.toml` unless `--config`
//! names another), then `QUEUECTL_*` environment variables.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::TimeDelta;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use queuectl::{backoff::Exponential, worker::WorkerConfig};
use serde::{Deserialize, Serialize};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_FILE: &str = "queuectl.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Job store URL (`sqlite://...`).
    pub database_url: String,
    /// Directory holding one PID file per running worker.
    pub registry_dir: PathBuf,
    pub poll_interval_ms: u64,
    pub max_idle_polls: u32,
    /// Delay before the first retry; later retries double it.
    pub backoff_base_seconds: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://queuectl.db".to_string(),
            registry_dir: PathBuf::from(".queuectl/workers"),
            poll_interval_ms: 1000,
            max_idle_polls: 10,
            backoff_base_seconds: 5,
        }
    }
}

impl Config {
    /// Load configuration from `path` and the environment.
    ///
    /// A missing file is not an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("QUEUECTL_"))
            .extract()?;
        Ok(config)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_idle_polls: self.max_idle_polls,
            backoff: Exponential::new(TimeDelta::seconds(i64::from(self.backoff_base_seconds))),
        }
    }
}
