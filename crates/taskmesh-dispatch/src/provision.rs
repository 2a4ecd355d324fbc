//! On-demand worker provisioning and readiness signalling.

use crate::table::deadline_after;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tracing::{info, warn};

/// Trailing version marker such as `_v2`, `-1.3`, `@2.0.1` or `:v1`.
static VERSION_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[_\-@:.]v?\d+(?:\.\d+)*$").expect("Invalid version suffix regex")
});

/// Strip a trailing version marker from a capability name.
pub fn strip_version_suffix(capability: &str) -> &str {
    match VERSION_SUFFIX.find(capability) {
        Some(m) if m.start() > 0 => &capability[..m.start()],
        _ => capability,
    }
}

/// Derive the worker identifier to provision for a capability.
pub fn worker_name_for(capability: &str, suffix: &str) -> String {
    format!("{}{suffix}", strip_version_suffix(capability))
}

/// Handle returned by a successful launch.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pub worker_name: String,
    pub pid: Option<u32>,
    pub launched_at: DateTime<Utc>,
}

impl WorkerHandle {
    pub fn new(worker_name: impl Into<String>) -> Self {
        Self {
            worker_name: worker_name.into(),
            pid: None,
            launched_at: Utc::now(),
        }
    }
}

/// Result of waiting for a worker to announce itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyOutcome {
    Ready,
    TimedOut,
}

impl ReadyOutcome {
    pub fn is_ready(self) -> bool {
        self == ReadyOutcome::Ready
    }
}

/// Starts workers for capabilities nobody currently advertises.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Request that `worker_name` be started. `None` if the launch failed.
    async fn launch(&self, worker_name: &str) -> Option<WorkerHandle>;

    /// Wait until `worker_name` has announced itself, or `timeout` elapses.
    async fn wait_for_ready(&self, worker_name: &str, timeout: Duration) -> ReadyOutcome;
}

/// Set of workers that have announced themselves, with wakeups for waiters.
#[derive(Default)]
pub struct ReadinessBoard {
    ready: Mutex<HashSet<String>>,
    notify: Notify,
}

impl ReadinessBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `worker_name` as ready and wake every waiter.
    pub fn announce(&self, worker_name: &str) {
        let inserted = self.ready.lock().insert(worker_name.to_string());
        if inserted {
            info!(worker = %worker_name, "Worker announced ready");
        }
        self.notify.notify_waiters();
    }

    /// Forget a worker, e.g. after it exits.
    pub fn retract(&self, worker_name: &str) -> bool {
        self.ready.lock().remove(worker_name)
    }

    pub fn is_ready(&self, worker_name: &str) -> bool {
        self.ready.lock().contains(worker_name)
    }

    /// Wait for `worker_name` to be announced, bounded by `timeout`.
    pub async fn wait(&self, worker_name: &str, timeout: Duration) -> ReadyOutcome {
        let deadline = deadline_after(timeout);
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking, so an announce in between is not missed.
            notified.as_mut().enable();

            if self.is_ready(worker_name) {
                return ReadyOutcome::Ready;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return if self.is_ready(worker_name) {
                    ReadyOutcome::Ready
                } else {
                    ReadyOutcome::TimedOut
                };
            }
        }
    }
}

/// Configuration for [`CommandProvisioner`].
///
/// `{worker}` in `command` or any of `args` is replaced with the worker name.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandProvisionerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Provisioner that starts each worker as a local subprocess.
///
/// Readiness comes from the shared [`ReadinessBoard`], which the registry
/// updates when the new worker advertises its capabilities.
pub struct CommandProvisioner {
    config: CommandProvisionerConfig,
    board: Arc<ReadinessBoard>,
    children: tokio::sync::Mutex<HashMap<String, Child>>,
}

impl CommandProvisioner {
    pub fn new(config: CommandProvisionerConfig, board: Arc<ReadinessBoard>) -> Self {
        Self {
            config,
            board,
            children: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    fn build_command(&self, worker_name: &str) -> Command {
        let fill = |s: &str| s.replace("{worker}", worker_name);
        let mut cmd = Command::new(fill(&self.config.command));
        cmd.args(self.config.args.iter().map(|a| fill(a)))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);
        for (key, val) in &self.config.env {
            cmd.env(key, fill(val));
        }
        cmd
    }

    /// Number of worker processes started by this provisioner and not yet reaped.
    pub async fn running_count(&self) -> usize {
        self.children.lock().await.len()
    }

    /// Kill every worker process this provisioner started.
    pub async fn shutdown(&self) {
        let mut children = self.children.lock().await;
        for (name, mut child) in children.drain() {
            if let Err(e) = child.kill().await {
                warn!(worker = %name, error = %e, "Failed to stop worker process");
            }
            self.board.retract(&name);
        }
    }
}

#[async_trait]
impl Provisioner for CommandProvisioner {
    async fn launch(&self, worker_name: &str) -> Option<WorkerHandle> {
        let mut children = self.children.lock().await;
        if let Some(child) = children.get_mut(worker_name) {
            match child.try_wait() {
                Ok(None) => {
                    info!(worker = %worker_name, "Worker process already running");
                    return Some(WorkerHandle {
                        pid: child.id(),
                        ..WorkerHandle::new(worker_name)
                    });
                }
                Ok(Some(status)) => {
                    warn!(worker = %worker_name, status = %status, "Worker process exited; relaunching");
                }
                Err(e) => {
                    warn!(worker = %worker_name, error = %e, "Could not poll worker process; relaunching");
                }
            }
            children.remove(worker_name);
            self.board.retract(worker_name);
        }

        match self.build_command(worker_name).spawn() {
            Ok(child) => {
                let handle = WorkerHandle {
                    pid: child.id(),
                    ..WorkerHandle::new(worker_name)
                };
                info!(worker = %worker_name, pid = ?handle.pid, "Launched worker process");
                children.insert(worker_name.to_string(), child);
                Some(handle)
            }
            Err(e) => {
                warn!(
                    worker = %worker_name,
                    command = %self.config.command,
                    error = %e,
                    "Failed to launch worker process"
                );
                None
            }
        }
    }

    async fn wait_for_ready(&self, worker_name: &str, timeout: Duration) -> ReadyOutcome {
        self.board.wait(worker_name, timeout).await
    }
}
