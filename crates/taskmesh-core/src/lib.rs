//! Core types and error definitions for the Taskmesh orchestration engine.
//!
//! This crate provides the data model shared by the dispatcher and the
//! orchestrator: parsed subtasks, per-node results (including errors
//! modelled as data), capability advertisements and wire messages.
//!
//! # Main types
//!
//! - [`TaskmeshError`] — Unified error enum for project-fatal and infrastructure failures.
//! - [`TaskmeshResult`] — Convenience alias for `Result<T, TaskmeshError>`.
//! - [`SubtaskSpec`] — One node of a decomposed project.
//! - [`NodeResult`] — The value recorded for a node: a payload or a [`NodeError`].
//! - [`ResultsMap`] — Write-once map from node index to [`NodeResult`].
//! - [`CapabilityAdvertisement`] — A provider's advertised capability.
//! - [`TaskRequestMessage`] / [`TaskResultMessage`] — Wire messages.

/// Error enum and result alias.
pub mod error;
/// Wire messages and correlation tokens.
pub mod message;

pub use error::{TaskmeshError, TaskmeshResult};
pub use message::{CorrelationToken, ReplyStatus, TaskRequestMessage, TaskResultMessage};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Parameter mapping carried by a subtask.
pub type TaskParameters = serde_json::Map<String, serde_json::Value>;

// --- Subtasks ---

/// One subtask produced by decomposing a project query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskSpec {
    pub capability_needed: String,
    #[serde(default)]
    pub task_parameters: TaskParameters,
    #[serde(default)]
    pub task_description: String,
}

impl SubtaskSpec {
    pub fn new(capability_needed: impl Into<String>) -> Self {
        Self {
            capability_needed: capability_needed.into(),
            task_parameters: TaskParameters::new(),
            task_description: String::new(),
        }
    }

    /// Adds a parameter, replacing any previous value under `key`.
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.task_parameters.insert(key.into(), value);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.task_description = description.into();
        self
    }
}

// --- Capabilities ---

/// A capability advertised by a provider. Read-only from the coordinator's side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityAdvertisement {
    pub capability_id: String,
    pub provider_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_parameter_schema")]
    pub parameter_schema: serde_json::Value,
}

fn default_parameter_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl CapabilityAdvertisement {
    pub fn new(capability_id: impl Into<String>, provider_id: impl Into<String>) -> Self {
        let capability_id = capability_id.into();
        Self {
            name: capability_id.clone(),
            capability_id,
            provider_id: provider_id.into(),
            description: String::new(),
            parameter_schema: default_parameter_schema(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

// --- Node results ---

/// Classification of a node-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeErrorKind {
    #[serde(rename = "CapabilityNotFoundError")]
    CapabilityNotFound,
    #[serde(rename = "DispatchError")]
    Dispatch,
    #[serde(rename = "TimeoutError")]
    Timeout,
    #[serde(rename = "RemoteFailure")]
    RemoteFailure,
}

impl fmt::Display for NodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeErrorKind::CapabilityNotFound => write!(f, "CapabilityNotFoundError"),
            NodeErrorKind::Dispatch => write!(f, "DispatchError"),
            NodeErrorKind::Timeout => write!(f, "TimeoutError"),
            NodeErrorKind::RemoteFailure => write!(f, "RemoteFailure"),
        }
    }
}

/// A non-fatal failure recorded as a node's result value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeError {
    #[serde(rename = "error")]
    pub kind: NodeErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl NodeError {
    pub fn new(kind: NodeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn capability_not_found(capability: &str) -> Self {
        Self::new(
            NodeErrorKind::CapabilityNotFound,
            format!("No provider found for capability '{capability}'"),
        )
    }

    pub fn dispatch(message: impl Into<String>) -> Self {
        Self::new(NodeErrorKind::Dispatch, message)
    }

    pub fn timeout(capability: &str, timeout_ms: u128) -> Self {
        Self::new(
            NodeErrorKind::Timeout,
            format!("No reply for capability '{capability}' within {timeout_ms}ms"),
        )
    }

    /// Wraps the provider's error details verbatim.
    pub fn remote_failure(details: Option<serde_json::Value>) -> Self {
        Self {
            kind: NodeErrorKind::RemoteFailure,
            message: "Provider reported failure".to_string(),
            details,
        }
    }
}

/// The value recorded for a graph node.
///
/// Serializes untagged: a success is its payload verbatim, an error is the
/// `{"error": ..., "message": ...}` object. That shape is what downstream
/// nodes and the integration oracle see, but it is ambiguous on the way back
/// in: a success payload that looks like an error object deserializes as
/// [`NodeResult::Error`]. Use [`tagged_results`] when results must round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeResult {
    Error(NodeError),
    Success(serde_json::Value),
}

impl NodeResult {
    pub fn is_error(&self) -> bool {
        matches!(self, NodeResult::Error(_))
    }

    pub fn as_error(&self) -> Option<&NodeError> {
        match self {
            NodeResult::Error(e) => Some(e),
            NodeResult::Success(_) => None,
        }
    }

    /// Textual form used when splicing this result into a downstream string.
    ///
    /// Strings are inserted raw; everything else is compact JSON.
    pub fn render(&self) -> String {
        match self {
            NodeResult::Success(serde_json::Value::String(s)) => s.clone(),
            NodeResult::Success(value) => value.to_string(),
            NodeResult::Error(err) => serde_json::to_string(err)
                .unwrap_or_else(|_| format!("{{\"error\":\"{}\"}}", err.kind)),
        }
    }
}

impl From<NodeError> for NodeResult {
    fn from(err: NodeError) -> Self {
        NodeResult::Error(err)
    }
}

/// Results of a graph execution keyed by node index.
///
/// Each index is written at most once; later writes are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultsMap {
    entries: BTreeMap<usize, NodeResult>,
}

impl ResultsMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the result for `index`. Returns `false` if one was already recorded.
    pub fn record(&mut self, index: usize, result: NodeResult) -> bool {
        if self.entries.contains_key(&index) {
            return false;
        }
        self.entries.insert(index, result);
        true
    }

    pub fn get(&self, index: usize) -> Option<&NodeResult> {
        self.entries.get(&index)
    }

    pub fn contains(&self, index: usize) -> bool {
        self.entries.contains_key(&index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &NodeResult)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    pub fn error_count(&self) -> usize {
        self.entries.values().filter(|r| r.is_error()).count()
    }
}

/// Lossless serde form of a [`ResultsMap`] for storage.
///
/// Each entry carries an explicit `outcome` tag, so a success payload shaped
/// like an error object stays a success. Use with `#[serde(with = "...")]`.
pub mod tagged_results {
    use super::{NodeError, NodeResult, ResultsMap};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize)]
    #[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
    enum TaggedResult {
        Success(serde_json::Value),
        Error(NodeError),
    }

    /// Write each entry as `{"outcome": ..., "value": ...}` keyed by index.
    pub fn serialize<S: Serializer>(results: &ResultsMap, serializer: S) -> Result<S::Ok, S::Error> {
        let tagged: BTreeMap<usize, TaggedResult> = results
            .iter()
            .map(|(index, result)| {
                let entry = match result {
                    NodeResult::Success(value) => TaggedResult::Success(value.clone()),
                    NodeResult::Error(err) => TaggedResult::Error(err.clone()),
                };
                (index, entry)
            })
            .collect();
        tagged.serialize(serializer)
    }

    /// Read the tagged form back into a [`ResultsMap`].
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ResultsMap, D::Error> {
        let tagged = BTreeMap::<usize, TaggedResult>::deserialize(deserializer)?;
        let mut results = ResultsMap::new();
        for (index, entry) in tagged {
            let result = match entry {
                TaggedResult::Success(value) => NodeResult::Success(value),
                TaggedResult::Error(err) => NodeResult::Error(err),
            };
            results.record(index, result);
        }
        Ok(results)
    }
}
