use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use taskmesh_core::{TaskmeshError, TaskmeshResult};

/// Coordinator settings, usually loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Identity used as `requester_id` and as the reply-address prefix.
    #[serde(default = "default_coordinator_id")]
    pub coordinator_id: String,
    /// Per-dispatch reply deadline in seconds.
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,
    /// How long to wait for a provisioned worker to announce itself.
    #[serde(default = "default_readiness_timeout_secs")]
    pub readiness_timeout_secs: u64,
    /// Appended to the version-stripped capability name to name a worker.
    #[serde(default = "default_worker_suffix")]
    pub worker_suffix: String,
    /// 1 runs nodes strictly one at a time; more lets independent branches overlap.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_true")]
    pub emit_learning_records: bool,
    /// Interval of the stale pending-request reaper. 0 disables it.
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
}

fn default_coordinator_id() -> String {
    "taskmesh-coordinator".to_string()
}
fn default_dispatch_timeout_secs() -> u64 {
    60
}
fn default_readiness_timeout_secs() -> u64 {
    30
}
fn default_worker_suffix() -> String {
    "_worker".to_string()
}
fn default_max_concurrency() -> usize {
    1
}
fn default_true() -> bool {
    true
}
fn default_reap_interval_secs() -> u64 {
    30
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            coordinator_id: default_coordinator_id(),
            dispatch_timeout_secs: default_dispatch_timeout_secs(),
            readiness_timeout_secs: default_readiness_timeout_secs(),
            worker_suffix: default_worker_suffix(),
            max_concurrency: default_max_concurrency(),
            emit_learning_records: true,
            reap_interval_secs: default_reap_interval_secs(),
        }
    }
}

impl CoordinatorConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> TaskmeshResult<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| TaskmeshError::Config(format!("Invalid coordinator config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> TaskmeshResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> TaskmeshResult<()> {
        if self.coordinator_id.trim().is_empty() {
            return Err(TaskmeshError::Config("coordinator_id must not be empty".into()));
        }
        if self.dispatch_timeout_secs == 0 {
            return Err(TaskmeshError::Config(
                "dispatch_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.readiness_timeout_secs == 0 {
            return Err(TaskmeshError::Config(
                "readiness_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(TaskmeshError::Config(
                "max_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn reap_interval(&self) -> Option<Duration> {
        (self.reap_interval_secs > 0).then(|| Duration::from_secs(self.reap_interval_secs))
    }
}
