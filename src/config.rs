//! Configuration for tradeya-backfill

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::BackfillError;
use crate::jobs::{builtin_jobs, validate_jobs, JobSpec};
use crate::reputation::ReputationConfig;

/// Default directory for the local store and run state
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tradeya")
}

/// What to do when a single document fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Record the failure and keep going
    #[default]
    Continue,
    /// Abort the run on the first failure
    FailFast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path of the sled document store
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Directory for checkpoint and backups
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Documents in flight at once during a backfill
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub error_policy: ErrorPolicy,

    /// Log progress every N documents
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,

    #[serde(default)]
    pub reputation: ReputationConfig,

    #[serde(default = "builtin_jobs")]
    pub jobs: Vec<JobSpec>,
}

fn default_store_path() -> PathBuf {
    default_data_dir().join("store.sled")
}

fn default_state_dir() -> PathBuf {
    default_data_dir().join("backfill")
}

fn default_concurrency() -> usize {
    4
}

fn default_progress_every() -> usize {
    25
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            state_dir: default_state_dir(),
            concurrency: default_concurrency(),
            error_policy: ErrorPolicy::Continue,
            progress_every: default_progress_every(),
            reputation: ReputationConfig::default(),
            jobs: builtin_jobs(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, BackfillError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, BackfillError> {
        let config: Config =
            toml::from_str(content).map_err(|e| BackfillError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), BackfillError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| BackfillError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), BackfillError> {
        if self.concurrency == 0 {
            return Err(BackfillError::Config("concurrency must be at least 1".into()));
        }
        if self.progress_every == 0 {
            return Err(BackfillError::Config("progress_every must be at least 1".into()));
        }
        validate_jobs(&self.jobs)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.state_dir.join("checkpoint.json")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.state_dir.join("backups")
    }
}
