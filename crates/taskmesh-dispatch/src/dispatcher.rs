//! Remote dispatcher: resolves a capability to a provider and performs one
//! correlated request/reply exchange with a deadline.

use crate::provision::{worker_name_for, Provisioner};
use crate::registry::CapabilityRegistry;
use crate::selection::{FirstMatch, ProviderSelector};
use crate::table::{deadline_after, Delivery, DispatchTable, PendingRequest};
use crate::transport::{InboundReply, Transport};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use taskmesh_core::{
    CapabilityAdvertisement, CorrelationToken, NodeError, NodeResult, ReplyStatus,
    TaskParameters, TaskRequestMessage, TaskResultMessage,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Dispatches subtasks to remote providers.
///
/// Owns its [`DispatchTable`]; independent dispatchers in one process share nothing.
pub struct RemoteDispatcher {
    coordinator_id: String,
    registry: Arc<dyn CapabilityRegistry>,
    transport: Arc<dyn Transport>,
    provisioner: Option<Arc<dyn Provisioner>>,
    selector: Arc<dyn ProviderSelector>,
    table: Arc<DispatchTable>,
    readiness_timeout: Duration,
    worker_suffix: String,
}

impl RemoteDispatcher {
    /// Create a dispatcher with first-match selection and no provisioner.
    pub fn new(
        coordinator_id: impl Into<String>,
        registry: Arc<dyn CapabilityRegistry>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            coordinator_id: coordinator_id.into(),
            registry,
            transport,
            provisioner: None,
            selector: Arc::new(FirstMatch),
            table: Arc::new(DispatchTable::new()),
            readiness_timeout: Duration::from_secs(30),
            worker_suffix: "_worker".to_string(),
        }
    }

    pub fn with_provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub fn with_selector(mut self, selector: Arc<dyn ProviderSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Upper bound on waiting for a freshly provisioned worker.
    pub fn with_readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }

    /// Suffix appended to the version-stripped capability name to name a worker.
    pub fn with_worker_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.worker_suffix = suffix.into();
        self
    }

    pub fn coordinator_id(&self) -> &str {
        &self.coordinator_id
    }

    pub fn registry(&self) -> &Arc<dyn CapabilityRegistry> {
        &self.registry
    }

    pub fn table(&self) -> &Arc<DispatchTable> {
        &self.table
    }

    /// Send one subtask to a provider and wait for its reply.
    ///
    /// Never fails: every problem comes back as a [`NodeResult::Error`].
    pub async fn dispatch(
        &self,
        capability_needed: &str,
        params: TaskParameters,
        description: &str,
        timeout: Duration,
    ) -> NodeResult {
        let candidates = self.resolve_providers(capability_needed).await;
        let Some(provider) = self.selector.select(capability_needed, &candidates) else {
            warn!(capability = %capability_needed, "No provider available");
            return NodeError::capability_not_found(capability_needed).into();
        };

        let request_id = Uuid::new_v4().to_string();
        let reply_address = format!("{}/replies/{}", self.coordinator_id, request_id);
        let request = TaskRequestMessage {
            request_id: request_id.clone(),
            requester_id: self.coordinator_id.clone(),
            target_id: provider.provider_id.clone(),
            capability_filter: capability_needed.to_string(),
            parameters: params,
            reply_address: reply_address.clone(),
            description: description.to_string(),
        };

        let deadline = deadline_after(timeout);
        let mut rx = self.table.reserve(PendingRequest {
            request_id: request_id.clone(),
            correlation_id: None,
            requester_id: self.coordinator_id.clone(),
            capability_id: provider.capability_id.clone(),
            target_id: provider.provider_id.clone(),
            reply_address,
            created_at: Utc::now(),
            deadline,
        });

        info!(
            request_id = %request_id,
            capability = %capability_needed,
            provider = %provider.provider_id,
            "Dispatching task request"
        );

        let Some(token) = self.transport.publish(&provider.provider_id, request).await else {
            self.table.release(&request_id);
            warn!(request_id = %request_id, provider = %provider.provider_id, "Transport rejected task request");
            return NodeError::dispatch(format!(
                "Transport failed to send request for capability '{}' to provider '{}'",
                capability_needed, provider.provider_id
            ))
            .into();
        };
        // A reply may already have been routed by request_id; binding is then a no-op.
        self.table.bind(&request_id, token.clone());

        match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(reply)) => {
                debug!(request_id = %request_id, token = %token, "Reply received");
                Self::interpret(reply)
            }
            Ok(Err(_)) => {
                self.table.release(&request_id);
                warn!(request_id = %request_id, "Pending request reaped before reply");
                NodeError::timeout(capability_needed, timeout.as_millis()).into()
            }
            Err(_) => {
                if self.table.release(&request_id).is_none() {
                    // Completed between the deadline firing and the release.
                    if let Ok(reply) = rx.try_recv() {
                        return Self::interpret(reply);
                    }
                }
                warn!(
                    request_id = %request_id,
                    token = %token,
                    timeout_ms = timeout.as_millis(),
                    "Task request timed out"
                );
                NodeError::timeout(capability_needed, timeout.as_millis()).into()
            }
        }
    }

    /// Route an inbound reply to the dispatch waiting on it.
    ///
    /// Late or unknown replies are dropped.
    pub fn deliver_reply(
        &self,
        token: Option<&CorrelationToken>,
        reply: TaskResultMessage,
    ) -> Delivery {
        route_reply(&self.table, token, reply)
    }

    /// Drain `replies` into the dispatch table on a background task.
    pub fn spawn_reply_pump(&self, mut replies: mpsc::Receiver<InboundReply>) -> JoinHandle<()> {
        let table = self.table.clone();
        tokio::spawn(async move {
            while let Some(inbound) = replies.recv().await {
                route_reply(&table, inbound.token.as_ref(), inbound.message);
            }
            debug!("Reply channel closed; reply pump stopping");
        })
    }

    /// Periodically remove pending entries whose deadline has passed.
    pub fn start_reaper(&self, interval: Duration) -> JoinHandle<()> {
        let table = self.table.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            loop {
                timer.tick().await;
                let reaped = table.reap_expired(Instant::now());
                if !reaped.is_empty() {
                    warn!(count = reaped.len(), "Reaped stale pending requests");
                }
            }
        })
    }

    /// Look up providers, provisioning a worker once if none are advertised.
    async fn resolve_providers(&self, capability: &str) -> Vec<CapabilityAdvertisement> {
        let found = self.lookup(capability).await;
        if !found.is_empty() {
            return found;
        }
        let Some(provisioner) = &self.provisioner else {
            return found;
        };

        let worker = worker_name_for(capability, &self.worker_suffix);
        info!(capability = %capability, worker = %worker, "Provisioning worker for missing capability");

        if provisioner.launch(&worker).await.is_none() {
            warn!(worker = %worker, "Worker launch failed");
            return Vec::new();
        }
        if !provisioner
            .wait_for_ready(&worker, self.readiness_timeout)
            .await
            .is_ready()
        {
            warn!(
                worker = %worker,
                timeout_ms = self.readiness_timeout.as_millis(),
                "Worker did not announce readiness in time"
            );
        }
        self.lookup(capability).await
    }

    async fn lookup(&self, capability: &str) -> Vec<CapabilityAdvertisement> {
        match self.registry.find_capabilities(capability).await {
            Ok(found) => found,
            Err(e) => {
                warn!(capability = %capability, error = %e, "Capability lookup failed");
                Vec::new()
            }
        }
    }

    fn interpret(reply: TaskResultMessage) -> NodeResult {
        match reply.status {
            ReplyStatus::Success => {
                NodeResult::Success(reply.payload.unwrap_or(serde_json::Value::Null))
            }
            ReplyStatus::Failure => NodeError::remote_failure(reply.error_details).into(),
        }
    }
}

fn route_reply(
    table: &DispatchTable,
    token: Option<&CorrelationToken>,
    reply: TaskResultMessage,
) -> Delivery {
    let request_id = reply.request_id.clone();
    let delivery = table.complete(token, reply);
    match delivery {
        Delivery::Delivered => {}
        Delivery::WaiterGone => {
            debug!(request_id = %request_id, "Reply arrived after its waiter went away");
        }
        Delivery::Unmatched => {
            debug!(
                request_id = %request_id,
                token = ?token,
                "Discarding late or unknown reply"
            );
        }
    }
    delivery
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::provision::ReadyOutcome;
    use crate::provision::WorkerHandle;
    use crate::registry::InMemoryCapabilityRegistry;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records published requests and never replies on its own.
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(CorrelationToken, TaskRequestMessage)>>,
        fail: bool,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn publish(
            &self,
            _target_id: &str,
            request: TaskRequestMessage,
        ) -> Option<CorrelationToken> {
            if self.fail {
                return None;
            }
            let mut sent = self.sent.lock();
            let token = CorrelationToken::new(format!("tok-{}", sent.len()));
            sent.push((token.clone(), request));
            Some(token)
        }
    }

    struct CountingProvisioner {
        launches: AtomicUsize,
        registry: Arc<InMemoryCapabilityRegistry>,
        advertise_on_launch: bool,
    }

    #[async_trait]
    impl Provisioner for CountingProvisioner {
        async fn launch(&self, worker_name: &str) -> Option<WorkerHandle> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            if self.advertise_on_launch {
                self.registry
                    .advertise(CapabilityAdvertisement::new("ocr_v1", worker_name))
                    .await;
            }
            Some(WorkerHandle::new(worker_name))
        }

        async fn wait_for_ready(&self, _worker_name: &str, _timeout: Duration) -> ReadyOutcome {
            if self.advertise_on_launch {
                ReadyOutcome::Ready
            } else {
                ReadyOutcome::TimedOut
            }
        }
    }

    async fn registry_with(cap: &str, provider: &str) -> Arc<InMemoryCapabilityRegistry> {
        let registry = Arc::new(InMemoryCapabilityRegistry::new());
        registry
            .advertise(CapabilityAdvertisement::new(cap, provider))
            .await;
        registry
    }

    #[tokio::test]
    async fn test_dispatch_success_via_token() {
        let registry = registry_with("summarize", "provider-a").await;
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Arc::new(RemoteDispatcher::new(
            "coord-1",
            registry,
            transport.clone(),
        ));

        let d = dispatcher.clone();
        let handle = tokio::spawn(async move {
            d.dispatch("summarize", TaskParameters::new(), "sum it", Duration::from_secs(5))
                .await
        });

        // Wait for the request to be published and bound.
        let (token, request) = loop {
            if let Some(entry) = transport.sent.lock().first().cloned() {
                if dispatcher.table().resolve(&entry.0).is_some() {
                    break entry;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert_eq!(request.requester_id, "coord-1");
        assert_eq!(request.target_id, "provider-a");
        assert_eq!(request.capability_filter, "summarize");
        assert_eq!(request.description, "sum it");
        assert_eq!(
            request.reply_address,
            format!("coord-1/replies/{}", request.request_id)
        );

        let delivery = dispatcher.deliver_reply(
            Some(&token),
            TaskResultMessage::success(request.request_id.clone(), json!({"v": 1})),
        );
        assert_eq!(delivery, Delivery::Delivered);

        let result = handle.await.unwrap();
        assert_eq!(result, NodeResult::Success(json!({"v": 1})));
        assert!(dispatcher.table().is_empty());
    }

    #[tokio::test]
    async fn test_unbounded_timeout_still_completes() {
        let registry = registry_with("ocr", "w").await;
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Arc::new(RemoteDispatcher::new("c", registry, transport.clone()));

        let d = dispatcher.clone();
        let handle = tokio::spawn(async move {
            d.dispatch("ocr", TaskParameters::new(), "", Duration::MAX)
                .await
        });
        let (token, request) = loop {
            if let Some(entry) = transport.sent.lock().first().cloned() {
                if dispatcher.table().resolve(&entry.0).is_some() {
                    break entry;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        dispatcher.deliver_reply(
            Some(&token),
            TaskResultMessage::success(request.request_id, json!("text")),
        );
        let result = handle.await.unwrap();
        assert_eq!(result, NodeResult::Success(json!("text")));
    }

    #[tokio::test]
    async fn test_remote_failure_details_verbatim() {
        let registry = registry_with("ocr", "w").await;
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Arc::new(RemoteDispatcher::new("c", registry, transport.clone()));

        let d = dispatcher.clone();
        let handle = tokio::spawn(async move {
            d.dispatch("ocr", TaskParameters::new(), "", Duration::from_secs(5))
                .await
        });
        let request = loop {
            if let Some((_, r)) = transport.sent.lock().first().cloned() {
                break r;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        let details = json!({"code": 500, "reason": "model crashed"});
        dispatcher.deliver_reply(
            None,
            TaskResultMessage::failure(request.request_id, details.clone()),
        );

        match handle.await.unwrap() {
            NodeResult::Error(err) => {
                assert_eq!(err.kind, taskmesh_core::NodeErrorKind::RemoteFailure);
                assert_eq!(err.details, Some(details));
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_removes_entry_and_late_reply_is_noop() {
        let registry = registry_with("slow", "w").await;
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = RemoteDispatcher::new("c", registry, transport.clone());

        let result = dispatcher
            .dispatch("slow", TaskParameters::new(), "", Duration::from_millis(50))
            .await;
        let err = result.as_error().unwrap();
        assert_eq!(err.kind, taskmesh_core::NodeErrorKind::Timeout);
        assert!(dispatcher.table().is_empty());

        let (token, request) = transport.sent.lock()[0].clone();
        let delivery = dispatcher.deliver_reply(
            Some(&token),
            TaskResultMessage::success(request.request_id, json!("too late")),
        );
        assert_eq!(delivery, Delivery::Unmatched);
        assert!(dispatcher.table().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_is_dispatch_error() {
        let registry = registry_with("ocr", "w").await;
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let dispatcher = RemoteDispatcher::new("c", registry, transport);

        let result = dispatcher
            .dispatch("ocr", TaskParameters::new(), "", Duration::from_secs(1))
            .await;
        assert_eq!(
            result.as_error().map(|e| e.kind),
            Some(taskmesh_core::NodeErrorKind::Dispatch)
        );
        assert!(dispatcher.table().is_empty());
    }

    #[tokio::test]
    async fn test_missing_capability_without_provisioner() {
        let registry = Arc::new(InMemoryCapabilityRegistry::new());
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = RemoteDispatcher::new("c", registry, transport.clone());

        let result = dispatcher
            .dispatch("nowhere", TaskParameters::new(), "", Duration::from_secs(1))
            .await;
        assert_eq!(
            result.as_error().map(|e| e.kind),
            Some(taskmesh_core::NodeErrorKind::CapabilityNotFound)
        );
        assert!(transport.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_provisioning_attempted_once_then_not_found() {
        let registry = Arc::new(InMemoryCapabilityRegistry::new());
        let provisioner = Arc::new(CountingProvisioner {
            launches: AtomicUsize::new(0),
            registry: registry.clone(),
            advertise_on_launch: false,
        });
        let dispatcher = RemoteDispatcher::new(
            "c",
            registry,
            Arc::new(RecordingTransport::default()),
        )
        .with_provisioner(provisioner.clone());

        let result = dispatcher
            .dispatch("ocr_v1", TaskParameters::new(), "", Duration::from_secs(1))
            .await;
        assert_eq!(provisioner.launches.load(Ordering::SeqCst), 1);
        assert_eq!(
            result.as_error().map(|e| e.kind),
            Some(taskmesh_core::NodeErrorKind::CapabilityNotFound)
        );
    }

    #[tokio::test]
    async fn test_provisioned_worker_receives_request() {
        let registry = Arc::new(InMemoryCapabilityRegistry::new());
        let provisioner = Arc::new(CountingProvisioner {
            launches: AtomicUsize::new(0),
            registry: registry.clone(),
            advertise_on_launch: true,
        });
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = RemoteDispatcher::new("c", registry, transport.clone())
            .with_provisioner(provisioner.clone());

        let result = dispatcher
            .dispatch("ocr_v1", TaskParameters::new(), "", Duration::from_millis(30))
            .await;

        assert_eq!(provisioner.launches.load(Ordering::SeqCst), 1);
        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.target_id, "ocr_worker");
        // Nobody replies in this test.
        assert_eq!(
            result.as_error().map(|e| e.kind),
            Some(taskmesh_core::NodeErrorKind::Timeout)
        );
    }

    #[tokio::test]
    async fn test_reply_pump_routes_replies() {
        let registry = registry_with("echo", "w").await;
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Arc::new(RemoteDispatcher::new("c", registry, transport.clone()));
        let (tx, rx) = mpsc::channel(4);
        let _pump = dispatcher.spawn_reply_pump(rx);

        let d = dispatcher.clone();
        let handle = tokio::spawn(async move {
            d.dispatch("echo", TaskParameters::new(), "", Duration::from_secs(5))
                .await
        });
        let (token, request) = loop {
            if let Some(entry) = transport.sent.lock().first().cloned() {
                break entry;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        tx.send(InboundReply {
            token: Some(token),
            message: TaskResultMessage::success(request.request_id, json!("pong")),
        })
        .await
        .unwrap();

        assert_eq!(handle.await.unwrap(), NodeResult::Success(json!("pong")));
    }
}
