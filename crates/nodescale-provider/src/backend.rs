//! Outbound seam to the infrastructure that actually runs the pools.
//!
//! A [`Backend`] knows how to list pools, resize them, and remove
//! instances. The managed provider owns all bookkeeping; a backend only
//! reports and applies.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use nodescale_core::{
    Capability, CloudError, CloudResult, GroupId, Instance, InstanceId, MachineType, NodeTemplate,
    PricingModel,
};

/// A pool as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendGroup {
    pub id: GroupId,
    pub min_size: usize,
    pub max_size: usize,
    pub target_size: usize,
    pub instances: Vec<Instance>,
    pub template: Option<NodeTemplate>,
    pub autoprovisioned: bool,
}

/// Parameters for creating a pool from a theoretical group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRequest {
    pub id: GroupId,
    pub min_size: usize,
    pub max_size: usize,
    pub template: NodeTemplate,
}

/// Infrastructure backend behind a managed provider.
///
/// Optional operations default to `NotImplemented`; a backend that
/// overrides one must also list the matching [`Capability`].
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> BTreeSet<Capability>;

    /// List every pool with its current target and instances.
    async fn list_groups(&self) -> CloudResult<Vec<BackendGroup>>;

    /// Ask the backend to converge a pool toward `target` instances.
    async fn set_target_size(&self, group_id: &str, target: usize) -> CloudResult<()>;

    /// Terminate specific instances of a pool, shrinking its target.
    async fn delete_nodes(&self, _group_id: &str, _instances: &[InstanceId]) -> CloudResult<()> {
        Err(CloudError::not_implemented("delete nodes"))
    }

    async fn create_group(&self, _request: &GroupRequest) -> CloudResult<BackendGroup> {
        Err(CloudError::not_implemented("create node group"))
    }

    async fn delete_group(&self, _group_id: &str) -> CloudResult<()> {
        Err(CloudError::not_implemented("delete node group"))
    }

    fn machine_types(&self) -> CloudResult<Vec<MachineType>> {
        Err(CloudError::not_implemented("machine catalog"))
    }

    fn pricing(&self) -> CloudResult<Arc<dyn PricingModel>> {
        Err(CloudError::not_implemented("pricing"))
    }

    /// Release connections or watchers. Called once from provider cleanup.
    async fn close(&self) -> CloudResult<()> {
        Ok(())
    }
}
