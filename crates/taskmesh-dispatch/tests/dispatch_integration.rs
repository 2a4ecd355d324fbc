#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for the taskmesh-dispatch crate.
//!
//! Covers: LocalTransport + reply pump, concurrent dispatches sharing one
//! table, and on-demand provisioning signalled through the readiness board.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use taskmesh_core::{
    CapabilityAdvertisement, NodeErrorKind, NodeResult, TaskParameters, TaskRequestMessage,
    TaskResultMessage,
};
use taskmesh_dispatch::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Doubles the `n` parameter after an optional delay.
struct Doubler {
    delay: Duration,
}

#[async_trait]
impl TaskHandler for Doubler {
    async fn handle(&self, request: TaskRequestMessage) -> TaskResultMessage {
        tokio::time::sleep(self.delay).await;
        let n = request.parameters.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
        TaskResultMessage::success(request.request_id, json!({"doubled": n * 2}))
    }
}

struct AlwaysFails;

#[async_trait]
impl TaskHandler for AlwaysFails {
    async fn handle(&self, request: TaskRequestMessage) -> TaskResultMessage {
        TaskResultMessage::failure(request.request_id, json!({"reason": "disk full"}))
    }
}

fn params(n: i64) -> TaskParameters {
    let mut p = TaskParameters::new();
    p.insert("n".into(), json!(n));
    p
}

// ---------------------------------------------------------------------------
// Local transport round trip
// ---------------------------------------------------------------------------

#[tokio::test]
async fn local_round_trip_success_and_failure() {
    let registry = Arc::new(InMemoryCapabilityRegistry::new());
    registry
        .advertise(CapabilityAdvertisement::new("double", "doubler"))
        .await;
    registry
        .advertise(CapabilityAdvertisement::new("store", "broken-store"))
        .await;

    let (transport, replies) = LocalTransport::channel(16);
    transport.register("doubler", Arc::new(Doubler { delay: Duration::ZERO }));
    transport.register("broken-store", Arc::new(AlwaysFails));

    let dispatcher = RemoteDispatcher::new("coord", registry, Arc::new(transport));
    let _pump = dispatcher.spawn_reply_pump(replies);

    let ok = dispatcher
        .dispatch("double", params(21), "double it", Duration::from_secs(5))
        .await;
    assert_eq!(ok, NodeResult::Success(json!({"doubled": 42})));

    let failed = dispatcher
        .dispatch("store", TaskParameters::new(), "", Duration::from_secs(5))
        .await;
    let err = failed.as_error().unwrap();
    assert_eq!(err.kind, NodeErrorKind::RemoteFailure);
    assert_eq!(err.details, Some(json!({"reason": "disk full"})));

    assert!(dispatcher.table().is_empty());
}

// ---------------------------------------------------------------------------
// Many concurrent dispatches share one dispatch table
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_dispatches_are_correlated() {
    let registry = Arc::new(InMemoryCapabilityRegistry::new());
    registry
        .advertise(CapabilityAdvertisement::new("double", "doubler"))
        .await;
    let (transport, replies) = LocalTransport::channel(64);
    transport.register(
        "doubler",
        Arc::new(Doubler {
            delay: Duration::from_millis(10),
        }),
    );

    let dispatcher = Arc::new(RemoteDispatcher::new("coord", registry, Arc::new(transport)));
    let _pump = dispatcher.spawn_reply_pump(replies);

    let mut handles = Vec::new();
    for n in 0..32 {
        let d = dispatcher.clone();
        handles.push(tokio::spawn(async move {
            (n, d.dispatch("double", params(n), "", Duration::from_secs(5)).await)
        }));
    }

    for handle in handles {
        let (n, result) = handle.await.unwrap();
        assert_eq!(result, NodeResult::Success(json!({"doubled": n * 2})));
    }
    assert!(dispatcher.table().is_empty());
}

// ---------------------------------------------------------------------------
// Provisioning: the launched worker advertises itself, which signals readiness
// ---------------------------------------------------------------------------

/// Simulates a process launch by advertising the worker after a short delay.
struct SimulatedProvisioner {
    registry: Arc<InMemoryCapabilityRegistry>,
    board: Arc<ReadinessBoard>,
}

#[async_trait]
impl Provisioner for SimulatedProvisioner {
    async fn launch(&self, worker_name: &str) -> Option<WorkerHandle> {
        let registry = self.registry.clone();
        let worker = worker_name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            registry
                .advertise(CapabilityAdvertisement::new("double_v2", worker))
                .await;
        });
        Some(WorkerHandle::new(worker_name))
    }

    async fn wait_for_ready(&self, worker_name: &str, timeout: Duration) -> ReadyOutcome {
        self.board.wait(worker_name, timeout).await
    }
}

#[tokio::test]
async fn provisioned_worker_serves_request() {
    let board = Arc::new(ReadinessBoard::new());
    let registry = Arc::new(InMemoryCapabilityRegistry::new().with_readiness(board.clone()));

    let (transport, replies) = LocalTransport::channel(16);
    transport.register("double_worker", Arc::new(Doubler { delay: Duration::ZERO }));

    let dispatcher = RemoteDispatcher::new("coord", registry.clone(), Arc::new(transport))
        .with_provisioner(Arc::new(SimulatedProvisioner {
            registry: registry.clone(),
            board: board.clone(),
        }))
        .with_readiness_timeout(Duration::from_secs(2));
    let _pump = dispatcher.spawn_reply_pump(replies);

    let result = dispatcher
        .dispatch("double_v2", params(5), "", Duration::from_secs(5))
        .await;

    assert_eq!(result, NodeResult::Success(json!({"doubled": 10})));
    assert!(board.is_ready("double_worker"));
    assert_eq!(registry.capability_count().await, 1);
}

// ---------------------------------------------------------------------------
// Reaper clears entries whose waiters were dropped
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reaper_clears_abandoned_requests() {
    let registry = Arc::new(InMemoryCapabilityRegistry::new());
    registry
        .advertise(CapabilityAdvertisement::new("double", "doubler"))
        .await;
    let (transport, _replies) = LocalTransport::channel(16);
    transport.register(
        "doubler",
        Arc::new(Doubler {
            delay: Duration::from_secs(60),
        }),
    );
    let dispatcher = Arc::new(RemoteDispatcher::new("coord", registry, Arc::new(transport)));

    // Abandon a dispatch mid-flight: its pending entry stays behind.
    let d = dispatcher.clone();
    let abandoned = tokio::spawn(async move {
        d.dispatch("double", params(1), "", Duration::from_millis(30))
            .await
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    abandoned.abort();
    let _ = abandoned.await;
    assert_eq!(dispatcher.table().len(), 1);

    let reaper = dispatcher.start_reaper(Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(80)).await;
    reaper.abort();

    assert!(dispatcher.table().is_empty());
}
