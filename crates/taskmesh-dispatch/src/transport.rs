//! Messaging transport seam and an in-process implementation.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use taskmesh_core::{CorrelationToken, TaskRequestMessage, TaskResultMessage};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A reply as it comes off the wire, with the transport's token when known.
#[derive(Debug, Clone)]
pub struct InboundReply {
    pub token: Option<CorrelationToken>,
    pub message: TaskResultMessage,
}

/// Outbound half of the messaging transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand `request` to the transport for delivery to `target_id`.
    ///
    /// Returns the transport's correlation token, or `None` if the message
    /// could not be handed off.
    async fn publish(&self, target_id: &str, request: TaskRequestMessage)
        -> Option<CorrelationToken>;
}

/// Executes task requests on behalf of an in-process provider.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, request: TaskRequestMessage) -> TaskResultMessage;
}

/// Transport that delivers requests to handlers registered in this process.
///
/// Each request runs on its own tokio task; replies are pushed onto the
/// channel given at construction, tagged with a `local-<n>` token.
pub struct LocalTransport {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
    replies: mpsc::Sender<InboundReply>,
    next_token: AtomicU64,
}

impl LocalTransport {
    pub fn new(replies: mpsc::Sender<InboundReply>) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            replies,
            next_token: AtomicU64::new(1),
        }
    }

    /// Create a transport together with the receiving end of its reply channel.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<InboundReply>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }

    pub fn register(&self, provider_id: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.write().insert(provider_id.into(), handler);
    }

    pub fn unregister(&self, provider_id: &str) -> bool {
        self.handlers.write().remove(provider_id).is_some()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn publish(
        &self,
        target_id: &str,
        request: TaskRequestMessage,
    ) -> Option<CorrelationToken> {
        let handler = self.handlers.read().get(target_id).cloned();
        let Some(handler) = handler else {
            warn!(target = %target_id, request_id = %request.request_id, "No local handler for target");
            return None;
        };

        let token = CorrelationToken::new(format!(
            "local-{}",
            self.next_token.fetch_add(1, Ordering::SeqCst)
        ));
        let replies = self.replies.clone();
        let reply_token = token.clone();
        tokio::spawn(async move {
            let message = handler.handle(request).await;
            let reply = InboundReply {
                token: Some(reply_token),
                message,
            };
            if replies.send(reply).await.is_err() {
                debug!("Reply channel closed; dropping local reply");
            }
        });

        Some(token)
    }
}
