use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use nix::sys::signal::Signal;
use serde::Deserialize;

use crate::backend::hpss::DEFAULT_CLIENT;
use crate::error::ConfigError;
use crate::scheduler::SchedulerConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// Parent of the per-instrument staging directories.
    pub queue_root: PathBuf,
    /// Parent of the per-instrument archive directories on the backend.
    pub archive_root: PathBuf,
    /// Log directory; stderr when unset.
    #[serde(default)]
    pub log_root: Option<PathBuf>,
    #[serde(default = "default_poll_delay_secs")]
    pub poll_delay_secs: f64,
    #[serde(default = "default_polls_per_data_check")]
    pub polls_per_data_check: u32,
    #[serde(default = "default_signals")]
    pub signals: Vec<String>,
    #[serde(default)]
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Local,
    Hpss {
        #[serde(default = "default_client")]
        client: PathBuf,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Hpss {
            client: default_client(),
        }
    }
}

fn default_poll_delay_secs() -> f64 {
    1.0
}

fn default_polls_per_data_check() -> u32 {
    10
}

fn default_signals() -> Vec<String> {
    ["SIGHUP", "SIGINT", "SIGTERM"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_client() -> PathBuf {
    PathBuf::from(DEFAULT_CLIENT)
}

impl WatchConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: WatchConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.poll_delay_secs.is_finite() || self.poll_delay_secs < 0.0 {
            return Err(ConfigError::InvalidPollDelay(self.poll_delay_secs));
        }
        if self.polls_per_data_check == 0 {
            return Err(ConfigError::ZeroPollsPerCheck);
        }
        self.signals()?;
        Ok(())
    }

    pub fn signals(&self) -> Result<Vec<Signal>, ConfigError> {
        self.signals
            .iter()
            .map(|name| {
                Signal::from_str(name).map_err(|_| ConfigError::UnknownSignal(name.clone()))
            })
            .collect()
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_delay: Duration::from_secs_f64(self.poll_delay_secs),
            polls_per_data_check: self.polls_per_data_check,
        }
    }
}
