use crate::graph::TaskGraph;
use crate::substitute::substitute;
use std::sync::Arc;
use std::time::Duration;
use taskmesh_core::{NodeError, NodeResult, ResultsMap};
use taskmesh_dispatch::RemoteDispatcher;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Walks a validated [`TaskGraph`], dispatching each node once its producers
/// have results. Node failures are recorded, never propagated.
pub struct TaskGraphExecutor {
    dispatcher: Arc<RemoteDispatcher>,
    timeout: Duration,
    max_concurrency: usize,
}

impl TaskGraphExecutor {
    /// Sequential executor: one node at a time, in topological order.
    pub fn new(dispatcher: Arc<RemoteDispatcher>, timeout: Duration) -> Self {
        Self {
            dispatcher,
            timeout,
            max_concurrency: 1,
        }
    }

    /// Allow up to `max` independent nodes in flight at once.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Execute every node and return the results keyed by node index.
    pub async fn execute(&self, graph: &TaskGraph) -> ResultsMap {
        if self.max_concurrency <= 1 {
            self.execute_sequential(graph).await
        } else {
            self.execute_parallel(graph).await
        }
    }

    async fn execute_sequential(&self, graph: &TaskGraph) -> ResultsMap {
        let mut results = ResultsMap::new();
        for &index in graph.execution_order() {
            let Some(node) = graph.node(index) else {
                continue;
            };
            let params = substitute(&node.task_parameters, &results);
            info!(task = index, capability = %node.capability_needed, "Executing task");

            let result = self
                .dispatcher
                .dispatch(
                    &node.capability_needed,
                    params,
                    &node.task_description,
                    self.timeout,
                )
                .await;
            log_outcome(index, &result);
            results.record(index, result);
        }
        results
    }

    async fn execute_parallel(&self, graph: &TaskGraph) -> ResultsMap {
        let mut results = ResultsMap::new();
        let mut started = vec![false; graph.len()];
        let mut in_flight: JoinSet<(usize, NodeResult)> = JoinSet::new();

        loop {
            for &index in graph.execution_order() {
                if in_flight.len() >= self.max_concurrency {
                    break;
                }
                if started[index]
                    || !graph
                        .dependencies_of(index)
                        .iter()
                        .all(|p| results.contains(*p))
                {
                    continue;
                }
                let Some(node) = graph.node(index).cloned() else {
                    continue;
                };
                started[index] = true;

                let params = substitute(&node.task_parameters, &results);
                info!(task = index, capability = %node.capability_needed, "Executing task");

                let dispatcher = self.dispatcher.clone();
                let timeout = self.timeout;
                in_flight.spawn(async move {
                    let result = dispatcher
                        .dispatch(
                            &node.capability_needed,
                            params,
                            &node.task_description,
                            timeout,
                        )
                        .await;
                    (index, result)
                });
            }

            match in_flight.join_next().await {
                Some(Ok((index, result))) => {
                    log_outcome(index, &result);
                    results.record(index, result);
                }
                Some(Err(e)) => {
                    error!(error = %e, "Task execution aborted");
                }
                None => break,
            }
        }

        // Only reachable when a spawned dispatch panicked or was cancelled.
        for index in 0..graph.len() {
            if !results.contains(index) {
                results.record(
                    index,
                    NodeError::dispatch("Task was not executed: an upstream execution aborted")
                        .into(),
                );
            }
        }
        results
    }
}

fn log_outcome(index: usize, result: &NodeResult) {
    match result {
        NodeResult::Success(_) => info!(task = index, "Task completed"),
        NodeResult::Error(err) => warn!(
            task = index,
            kind = %err.kind,
            message = %err.message,
            "Task failed; continuing with remaining tasks"
        ),
    }
}
