//! Capability resolution and correlated request/reply dispatch.
//!
//! # Main types
//!
//! - [`RemoteDispatcher`] — Resolves a capability, publishes a request and awaits its reply.
//! - [`DispatchTable`] — Pending requests keyed by request id, with transport-token binding.
//! - [`CapabilityRegistry`] / [`InMemoryCapabilityRegistry`] — Provider discovery.
//! - [`Provisioner`] / [`CommandProvisioner`] / [`ReadinessBoard`] — On-demand workers.
//! - [`Transport`] / [`LocalTransport`] — Outbound messaging.
//! - [`ProviderSelector`] / [`FirstMatch`] — Provider choice among candidates.

/// Remote dispatcher.
pub mod dispatcher;
/// Worker provisioning and readiness.
pub mod provision;
/// Capability registry seam and in-memory registry.
pub mod registry;
/// Provider selection strategies.
pub mod selection;
/// Pending-request table.
pub mod table;
/// Transport seam and in-process transport.
pub mod transport;

pub use dispatcher::RemoteDispatcher;
pub use provision::{
    strip_version_suffix, worker_name_for, CommandProvisioner, CommandProvisionerConfig,
    Provisioner, ReadinessBoard, ReadyOutcome, WorkerHandle,
};
pub use registry::{CapabilityRegistry, InMemoryCapabilityRegistry};
pub use selection::{FirstMatch, ProviderSelector};
pub use table::{deadline_after, Delivery, DispatchTable, PendingRequest};
pub use transport::{InboundReply, LocalTransport, TaskHandler, Transport};
