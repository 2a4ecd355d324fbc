use crate::config::CoordinatorConfig;
use crate::executor::TaskGraphExecutor;
use crate::graph::TaskGraphBuilder;
use crate::learning::{LearningRecord, LearningSink};
use crate::oracle::{
    parse_subtasks, render_catalog, render_results, DecompositionOracle, IntegrationOracle,
};
use crate::types::{ProjectOutcome, ProjectState, SessionContext};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use taskmesh_core::{SubtaskSpec, TaskmeshError, TaskmeshResult};
use taskmesh_dispatch::{CapabilityRegistry, Provisioner, RemoteDispatcher, Transport};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Top-level sequencer for one natural-language project request.
/// Implements the decompose → validate → execute → integrate pattern.
///
/// Shareable across concurrently running projects via `Arc`.
pub struct ProjectCoordinator {
    config: CoordinatorConfig,
    dispatcher: Arc<RemoteDispatcher>,
    executor: TaskGraphExecutor,
    decomposer: Arc<dyn DecompositionOracle>,
    integrator: Arc<dyn IntegrationOracle>,
    learning: Option<Arc<dyn LearningSink>>,
}

impl ProjectCoordinator {
    /// Create a coordinator around an already configured dispatcher.
    pub fn new(
        config: CoordinatorConfig,
        dispatcher: Arc<RemoteDispatcher>,
        decomposer: Arc<dyn DecompositionOracle>,
        integrator: Arc<dyn IntegrationOracle>,
    ) -> Self {
        let executor = TaskGraphExecutor::new(dispatcher.clone(), config.dispatch_timeout())
            .with_max_concurrency(config.max_concurrency);
        Self {
            config,
            dispatcher,
            executor,
            decomposer,
            integrator,
            learning: None,
        }
    }

    /// Validate `config` and build the dispatcher it describes.
    pub fn from_config(
        config: CoordinatorConfig,
        registry: Arc<dyn CapabilityRegistry>,
        transport: Arc<dyn Transport>,
        provisioner: Option<Arc<dyn Provisioner>>,
        decomposer: Arc<dyn DecompositionOracle>,
        integrator: Arc<dyn IntegrationOracle>,
    ) -> TaskmeshResult<Self> {
        config.validate()?;
        let mut dispatcher = RemoteDispatcher::new(&config.coordinator_id, registry, transport)
            .with_readiness_timeout(config.readiness_timeout())
            .with_worker_suffix(&config.worker_suffix);
        if let Some(provisioner) = provisioner {
            dispatcher = dispatcher.with_provisioner(provisioner);
        }
        Ok(Self::new(config, Arc::new(dispatcher), decomposer, integrator))
    }

    pub fn with_learning_sink(mut self, sink: Arc<dyn LearningSink>) -> Self {
        self.learning = Some(sink);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<RemoteDispatcher> {
        &self.dispatcher
    }

    /// Start the periodic stale-request reaper, if the config enables one.
    pub fn spawn_maintenance(&self) -> Option<JoinHandle<()>> {
        let interval = self.config.reap_interval()?;
        Some(self.dispatcher.start_reaper(interval))
    }

    /// Run a project and return only the answer text.
    pub async fn handle_project(&self, query: &str, session: &SessionContext) -> String {
        self.run_project(query, session).await.answer
    }

    /// Run a project to a terminal state.
    ///
    /// Never fails: fatal conditions end in `DecomposeFailed` or `GraphInvalid`
    /// with an explanatory answer.
    pub async fn run_project(&self, query: &str, session: &SessionContext) -> ProjectOutcome {
        let start = Instant::now();
        let mut outcome = ProjectOutcome::new(Uuid::new_v4());
        let project_id = outcome.project_id;

        info!(
            project_id = %project_id,
            session_id = %session.session_id,
            requester = session.requester_id.as_deref().unwrap_or("anonymous"),
            "Coordinator: starting project"
        );

        // Phase 1: decompose
        transition(&mut outcome, ProjectState::Decomposing);
        let catalog = self.catalog_text(project_id).await;
        let plan = match self.decompose(query, &catalog).await {
            Ok(plan) => plan,
            Err(e) => {
                error!(project_id = %project_id, error = %e, "Coordinator: decomposition failed");
                transition(&mut outcome, ProjectState::DecomposeFailed);
                outcome.answer = format!(
                    "I could not break this request down into executable steps ({e}). \
                     Please rephrase it or try again."
                );
                return outcome;
            }
        };
        info!(project_id = %project_id, subtasks = plan.len(), "Coordinator: plan ready");
        outcome.plan = plan.clone();

        // Phase 2: validate
        transition(&mut outcome, ProjectState::GraphBuilding);
        let graph = match TaskGraphBuilder::build(plan) {
            Ok(graph) => graph,
            Err(e) => {
                error!(project_id = %project_id, error = %e, "Coordinator: plan rejected");
                transition(&mut outcome, ProjectState::GraphInvalid);
                outcome.answer = invalid_plan_message(&e);
                return outcome;
            }
        };

        // Phase 3: execute
        transition(&mut outcome, ProjectState::Executing);
        outcome.results = self.executor.execute(&graph).await;
        transition(&mut outcome, ProjectState::Executed);
        info!(
            project_id = %project_id,
            nodes = outcome.results.len(),
            failed = outcome.results.error_count(),
            "Coordinator: execution complete"
        );

        // Phase 4: integrate
        transition(&mut outcome, ProjectState::Integrating);
        outcome.answer = self.integrate(project_id, query, &outcome).await;
        transition(&mut outcome, ProjectState::Done);

        self.emit_learning_record(session, query, &outcome);

        info!(
            project_id = %project_id,
            duration_ms = start.elapsed().as_millis(),
            "Coordinator: project complete"
        );
        outcome
    }

    async fn catalog_text(&self, project_id: Uuid) -> String {
        let capabilities = match self.dispatcher.registry().get_all_capabilities().await {
            Ok(caps) => caps,
            Err(e) => {
                warn!(project_id = %project_id, error = %e, "Capability catalog unavailable");
                Vec::new()
            }
        };
        render_catalog(&capabilities).unwrap_or_else(|_| "[]".to_string())
    }

    async fn decompose(
        &self,
        query: &str,
        catalog: &str,
    ) -> TaskmeshResult<Vec<SubtaskSpec>> {
        let raw = self.decomposer.decompose(query, catalog).await?;
        parse_subtasks(&raw)
    }

    async fn integrate(&self, project_id: Uuid, query: &str, outcome: &ProjectOutcome) -> String {
        let results_text = match render_results(&outcome.results) {
            Ok(text) => text,
            Err(e) => {
                error!(project_id = %project_id, error = %e, "Could not render results");
                return format!("The results of this project could not be rendered: {e}");
            }
        };

        match self.integrator.integrate(query, &results_text).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(
                    project_id = %project_id,
                    error = %e,
                    "Integration oracle failed; returning raw results"
                );
                format!(
                    "The results could not be summarized ({e}). Raw results by step:\n{results_text}"
                )
            }
        }
    }

    fn emit_learning_record(&self, session: &SessionContext, query: &str, outcome: &ProjectOutcome) {
        if !self.config.emit_learning_records {
            return;
        }
        let Some(sink) = self.learning.clone() else {
            return;
        };

        let record = LearningRecord {
            project_id: outcome.project_id,
            session_id: session.session_id,
            query: query.to_string(),
            plan: outcome.plan.clone(),
            results: outcome.results.clone(),
            answer: outcome.answer.clone(),
            created_at: Utc::now(),
        };
        tokio::spawn(async move {
            let project_id = record.project_id;
            if let Err(e) = sink.record(record).await {
                warn!(project_id = %project_id, error = %e, "Learning record dropped");
            }
        });
    }
}

fn transition(outcome: &mut ProjectOutcome, next: ProjectState) {
    let from = outcome.state;
    if outcome.advance(next) {
        info!(project_id = %outcome.project_id, from = %from, to = %next, "Project state changed");
    } else {
        error!(project_id = %outcome.project_id, from = %from, to = %next, "Illegal project state change");
    }
}

fn invalid_plan_message(err: &TaskmeshError) -> String {
    match err {
        TaskmeshError::InvalidDependency { task, references } => format!(
            "The generated plan is invalid: step {task} uses the output of step {references}, \
             but a step may only use outputs of steps that come before it."
        ),
        TaskmeshError::CircularDependency { remaining } => format!(
            "The generated plan is invalid: steps {remaining:?} depend on each other in a cycle."
        ),
        other => format!("The generated plan is invalid: {other}"),
    }
}
