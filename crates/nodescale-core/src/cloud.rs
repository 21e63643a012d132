//! The provider contract consumed by the autoscaling control loop.
//!
//! A [`CloudProvider`] enumerates [`NodeGroup`]s, maps nodes back to their
//! owning group, and exposes provider-wide metadata. Optional operations
//! are advertised through [`Capability`] and fail with
//! [`CloudError::NotImplemented`](crate::CloudError::NotImplemented) when
//! unsupported.
//!
//! # Blocking contract
//!
//! Mutations (`increase_size`, `decrease_target_size`, `delete_nodes`,
//! `create`, `delete`) return once the backend has acknowledged the change,
//! bounded by the provider's operation timeout. They do not wait for nodes
//! to become ready. Reads never touch the backend; they serve the snapshot
//! taken by the last successful `refresh`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CloudResult;
use crate::limiter::ResourceLimiter;
use crate::types::{Capability, Instance, Node, NodeTemplate};

/// A named, bounded pool of nodes with a target size.
#[async_trait]
pub trait NodeGroup: Send + Sync {
    fn id(&self) -> &str;

    fn min_size(&self) -> usize;

    fn max_size(&self) -> usize;

    /// Desired member count. May differ from `nodes().len()` while nodes
    /// boot or terminate.
    fn target_size(&self) -> CloudResult<usize>;

    /// Raise the target by `delta` (must be positive, result ≤ max).
    async fn increase_size(&self, delta: i64) -> CloudResult<()>;

    /// Lower the target by `-delta` (must be negative). Only cancels
    /// pending scale-up; never removes a node that already joined.
    async fn decrease_target_size(&self, delta: i64) -> CloudResult<()>;

    /// Remove specific member nodes and shrink the target by the same
    /// count.
    async fn delete_nodes(&self, nodes: &[Node]) -> CloudResult<()>;

    /// Current members as last reported by the backend.
    fn nodes(&self) -> CloudResult<Vec<Instance>>;

    /// Shape of a freshly started node of this group.
    fn template_node_info(&self) -> CloudResult<NodeTemplate>;

    /// False for theoretical groups and for groups removed by a refresh.
    fn exist(&self) -> bool;

    /// Instantiate a theoretical group on the backend.
    async fn create(&self) -> CloudResult<()>;

    /// Remove an autoprovisioned, empty group from the backend.
    async fn delete(&self) -> CloudResult<()>;

    /// Whether the control loop created this group and may delete it.
    fn autoprovisioned(&self) -> bool;

    /// One-line human readable summary.
    fn debug(&self) -> String;
}

/// Price of running nodes, for expander strategies that weigh cost.
pub trait PricingModel: Send + Sync {
    /// Price of one node of `machine_type` running for `duration`.
    fn node_price(&self, machine_type: &str, duration: Duration) -> CloudResult<f64>;
}

/// The aggregate over all node groups of one infrastructure backend.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Snapshot of every existing group.
    fn node_groups(&self) -> Vec<Arc<dyn NodeGroup>>;

    /// Owning group of a node. `Ok(None)` when the node is not managed
    /// (control-plane nodes, unlabelled hosts).
    fn node_group_for_node(&self, node: &Node) -> CloudResult<Option<Arc<dyn NodeGroup>>>;

    fn supports(&self, capability: Capability) -> bool;

    fn pricing(&self) -> CloudResult<Arc<dyn PricingModel>>;

    fn available_machine_types(&self) -> CloudResult<Vec<String>>;

    /// Build a theoretical group for scale-from-zero simulation. Nothing
    /// is created on the backend until [`NodeGroup::create`] is called.
    fn new_node_group(
        &self,
        machine_type: &str,
        labels: BTreeMap<String, String>,
        system_labels: BTreeMap<String, String>,
        extra_resources: BTreeMap<String, u64>,
    ) -> CloudResult<Arc<dyn NodeGroup>>;

    fn resource_limiter(&self) -> Arc<ResourceLimiter>;

    /// Release background tasks and backend connections. Calling it more
    /// than once is a no-op.
    async fn cleanup(&self) -> CloudResult<()>;

    /// Re-synchronize the group registry with the backend.
    async fn refresh(&self) -> CloudResult<()>;
}
