use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskmesh_core::{ResultsMap, SubtaskSpec, TaskmeshResult};
use uuid::Uuid;

/// A completed interaction, kept for offline analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningRecord {
    pub project_id: Uuid,
    pub session_id: Uuid,
    pub query: String,
    pub plan: Vec<SubtaskSpec>,
    /// Stored tagged, so payloads that look like error objects survive a reload.
    #[serde(with = "taskmesh_core::tagged_results")]
    pub results: ResultsMap,
    pub answer: String,
    pub created_at: DateTime<Utc>,
}

/// Destination for learning records. Storage is up to the implementor.
#[async_trait]
pub trait LearningSink: Send + Sync {
    async fn record(&self, record: LearningRecord) -> TaskmeshResult<()>;
}
