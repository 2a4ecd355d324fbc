use thiserror::Error;

/// A convenience `Result` alias using [`TaskmeshError`].
pub type TaskmeshResult<T> = Result<T, TaskmeshError>;

/// Top-level error type for the Taskmesh workspace.
///
/// Only the project-fatal conditions and infrastructure failures live here.
/// Per-node dispatch failures are data, see [`crate::NodeError`].
#[derive(Error, Debug)]
pub enum TaskmeshError {
    /// The decomposition oracle's output could not be parsed into a subtask list.
    #[error("Decomposition error: {0}")]
    Decomposition(String),

    /// A subtask references the output of a task that is not strictly earlier.
    #[error("Invalid dependency: task {task} references output of task {references}")]
    InvalidDependency { task: usize, references: usize },

    /// The dependency graph could not be topologically ordered.
    #[error("Circular dependency among tasks {remaining:?}")]
    CircularDependency { remaining: Vec<usize> },

    /// The capability registry could not be queried.
    #[error("Registry error: {0}")]
    Registry(String),

    /// A worker could not be provisioned.
    #[error("Provisioning error: {0}")]
    Provisioning(String),

    /// The messaging transport failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A reasoning oracle failed to produce output.
    #[error("Oracle error: {0}")]
    Oracle(String),

    /// Configuration could not be parsed or is invalid.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TaskmeshError {
    /// Whether this error aborts a whole project before any node executes.
    pub fn is_project_fatal(&self) -> bool {
        matches!(
            self,
            TaskmeshError::Decomposition(_)
                | TaskmeshError::InvalidDependency { .. }
                | TaskmeshError::CircularDependency { .. }
        )
    }
}
