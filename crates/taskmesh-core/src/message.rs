//! Wire messages exchanged between the coordinator and capability providers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque token returned by a transport when it accepts an outbound message.
///
/// Distinct from the coordinator-chosen `request_id` carried inside the payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationToken(String);

impl CorrelationToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationToken {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Outbound request asking a provider to execute one capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequestMessage {
    pub request_id: String,
    pub requester_id: String,
    pub target_id: String,
    pub capability_filter: String,
    pub parameters: serde_json::Map<String, serde_json::Value>,
    pub reply_address: String,
    /// Free-text description of the subtask, for providers that log or route on it.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Outcome reported by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Success,
    Failure,
}

/// Inbound reply to a [`TaskRequestMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResultMessage {
    pub request_id: String,
    pub status: ReplyStatus,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub error_details: Option<serde_json::Value>,
}

impl TaskResultMessage {
    /// Creates a successful reply carrying `payload`.
    pub fn success(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            request_id: request_id.into(),
            status: ReplyStatus::Success,
            payload: Some(payload),
            error_details: None,
        }
    }

    /// Creates a failed reply carrying provider-specific error details.
    pub fn failure(request_id: impl Into<String>, error_details: serde_json::Value) -> Self {
        Self {
            request_id: request_id.into(),
            status: ReplyStatus::Failure,
            payload: None,
            error_details: Some(error_details),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ReplyStatus::Success
    }
}
