//! Dispatch table: outstanding requests and their completion signals.
//!
//! Entries are keyed by the coordinator-chosen `request_id` and reserved
//! before the request is published, so a reply that races the publish call
//! is never lost. Once the transport hands back its correlation token the
//! token is bound to the entry; replies may then be routed by either id.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use taskmesh_core::{CorrelationToken, TaskResultMessage};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

/// Stand-in deadline for timeouts too large to add to `Instant::now()`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + timeout`, saturating to a far-future instant instead of overflowing.
pub fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// An outstanding request awaiting its reply.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request_id: String,
    /// Transport token; `None` until the transport has accepted the message.
    pub correlation_id: Option<CorrelationToken>,
    pub requester_id: String,
    pub capability_id: String,
    pub target_id: String,
    pub reply_address: String,
    pub created_at: DateTime<Utc>,
    pub deadline: Instant,
}

/// Outcome of routing an inbound reply through the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The waiting dispatcher received the reply.
    Delivered,
    /// The entry existed but its waiter had already gone away.
    WaiterGone,
    /// No entry matched; the reply is late or unknown and was dropped.
    Unmatched,
}

struct Slot {
    request: PendingRequest,
    tx: oneshot::Sender<TaskResultMessage>,
}

#[derive(Default)]
struct Entries {
    by_request: HashMap<String, Slot>,
    by_token: HashMap<CorrelationToken, String>,
}

impl Entries {
    fn take(&mut self, request_id: &str) -> Option<Slot> {
        let slot = self.by_request.remove(request_id)?;
        if let Some(token) = &slot.request.correlation_id {
            self.by_token.remove(token);
        }
        Some(slot)
    }
}

/// Shared table of pending requests. All mutation happens under one lock.
#[derive(Default)]
pub struct DispatchTable {
    entries: Mutex<Entries>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending request and return the receiver its reply will arrive on.
    ///
    /// Replaces (and drops the waiter of) any entry with the same `request_id`.
    pub fn reserve(&self, request: PendingRequest) -> oneshot::Receiver<TaskResultMessage> {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.entries.lock();
        let request_id = request.request_id.clone();
        if let Some(old) = entries.take(&request_id) {
            debug!(request_id = %old.request.request_id, "Replacing pending request with duplicate id");
        }
        entries.by_request.insert(request_id, Slot { request, tx });
        rx
    }

    /// Bind the transport's correlation token to a reserved request.
    ///
    /// Returns `false` if the entry is already gone (completed or released).
    pub fn bind(&self, request_id: &str, token: CorrelationToken) -> bool {
        let mut entries = self.entries.lock();
        let Some(slot) = entries.by_request.get_mut(request_id) else {
            return false;
        };
        slot.request.correlation_id = Some(token.clone());
        entries.by_token.insert(token, request_id.to_string());
        true
    }

    /// Remove a request without completing it (timeout or failed publish).
    pub fn release(&self, request_id: &str) -> Option<PendingRequest> {
        self.entries.lock().take(request_id).map(|slot| slot.request)
    }

    /// Route a reply to its waiter.
    ///
    /// The transport token is tried first; when it is absent or unknown the
    /// reply's own `request_id` is used.
    pub fn complete(&self, token: Option<&CorrelationToken>, reply: TaskResultMessage) -> Delivery {
        let slot = {
            let mut entries = self.entries.lock();
            let by_token = token.and_then(|t| entries.by_token.get(t).cloned());
            let request_id = by_token.unwrap_or_else(|| reply.request_id.clone());
            entries.take(&request_id)
        };

        match slot {
            Some(slot) => {
                if slot.tx.send(reply).is_err() {
                    Delivery::WaiterGone
                } else {
                    Delivery::Delivered
                }
            }
            None => Delivery::Unmatched,
        }
    }

    /// The `request_id` a transport token is bound to, if any.
    pub fn resolve(&self, token: &CorrelationToken) -> Option<String> {
        self.entries.lock().by_token.get(token).cloned()
    }

    /// Snapshot of a pending request.
    pub fn get(&self, request_id: &str) -> Option<PendingRequest> {
        self.entries
            .lock()
            .by_request
            .get(request_id)
            .map(|slot| slot.request.clone())
    }

    /// Remove every entry whose deadline is at or before `now`.
    ///
    /// Their waiters observe a closed channel.
    pub fn reap_expired(&self, now: Instant) -> Vec<PendingRequest> {
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .by_request
            .iter()
            .filter(|(_, slot)| slot.request.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .iter()
            .filter_map(|id| entries.take(id))
            .map(|slot| slot.request)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().by_request.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
