use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use taskmesh_core::{ResultsMap, SubtaskSpec};
use uuid::Uuid;

/// Lifecycle of one project run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    Created,
    Decomposing,
    DecomposeFailed,
    GraphBuilding,
    GraphInvalid,
    Executing,
    Executed,
    Integrating,
    Done,
}

impl ProjectState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: ProjectState) -> bool {
        use ProjectState::*;
        matches!(
            (self, next),
            (Created, Decomposing)
                | (Decomposing, DecomposeFailed)
                | (Decomposing, GraphBuilding)
                | (GraphBuilding, GraphInvalid)
                | (GraphBuilding, Executing)
                | (Executing, Executed)
                | (Executed, Integrating)
                | (Integrating, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProjectState::DecomposeFailed | ProjectState::GraphInvalid | ProjectState::Done
        )
    }
}

impl std::fmt::Display for ProjectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProjectState::Created => "created",
            ProjectState::Decomposing => "decomposing",
            ProjectState::DecomposeFailed => "decompose_failed",
            ProjectState::GraphBuilding => "graph_building",
            ProjectState::GraphInvalid => "graph_invalid",
            ProjectState::Executing => "executing",
            ProjectState::Executed => "executed",
            ProjectState::Integrating => "integrating",
            ProjectState::Done => "done",
        };
        write!(f, "{name}")
    }
}

/// One recorded state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: ProjectState,
    pub to: ProjectState,
    pub at: DateTime<Utc>,
}

/// Everything a project run produced, including how it got there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectOutcome {
    pub project_id: Uuid,
    pub state: ProjectState,
    /// The integrated answer, or an explanatory message when the run ended early.
    pub answer: String,
    pub plan: Vec<SubtaskSpec>,
    pub results: ResultsMap,
    pub transitions: Vec<StateTransition>,
}

impl ProjectOutcome {
    pub(crate) fn new(project_id: Uuid) -> Self {
        Self {
            project_id,
            state: ProjectState::Created,
            answer: String::new(),
            plan: Vec::new(),
            results: ResultsMap::new(),
            transitions: Vec::new(),
        }
    }

    /// Move to `next`, recording the transition. Illegal moves are refused.
    pub(crate) fn advance(&mut self, next: ProjectState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.transitions.push(StateTransition {
            from: self.state,
            to: next,
            at: Utc::now(),
        });
        self.state = next;
        true
    }

    /// States visited in order, starting with `Created`.
    pub fn visited_states(&self) -> Vec<ProjectState> {
        std::iter::once(ProjectState::Created)
            .chain(self.transitions.iter().map(|t| t.to))
            .collect()
    }
}

/// Caller context threaded through a project run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: Uuid,
    pub requester_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            requester_id: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_requester(mut self, requester_id: impl Into<String>) -> Self {
        self.requester_id = Some(requester_id.into());
        self
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}
