//! Node group state machine.
//!
//! Each group's bookkeeping lives in a [`GroupCell`] shared between the
//! registry and every [`ManagedNodeGroup`] handle handed to callers, so a
//! handle obtained before a refresh observes the refreshed state.
//!
//! Mutations of one group are serialized by the cell's async `ops` lock:
//! the new target is computed from bookkeeping, pushed to the backend
//! under the operation timeout, and committed only after the backend
//! acknowledges. Every commit bumps the cell's generation, which refresh
//! uses to avoid reverting a target that was committed while its backend
//! listing was in flight.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info};

use nodescale_core::{
    Capability, CloudError, CloudResult, Instance, InstanceId, InstanceState, Node, NodeGroup,
    NodeTemplate,
};

use crate::backend::{BackendGroup, GroupRequest};
use crate::options::bounded;
use crate::provider::Shared;

/// Bookkeeping for one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GroupState {
    pub min_size: usize,
    pub max_size: usize,
    pub target_size: usize,
    pub members: Vec<Instance>,
    pub template: Option<NodeTemplate>,
    pub autoprovisioned: bool,
    pub exists: bool,
    /// Bumped on every locally committed mutation.
    pub generation: u64,
}

pub(crate) struct GroupCell {
    id: String,
    state: Mutex<GroupState>,
    /// Held for the whole duration of a mutation.
    ops: tokio::sync::Mutex<()>,
}

impl GroupCell {
    pub(crate) fn from_backend(group: BackendGroup) -> Self {
        Self::with_state(
            group.id,
            GroupState {
                min_size: group.min_size,
                max_size: group.max_size,
                target_size: group.target_size,
                members: group.instances,
                template: group.template,
                autoprovisioned: group.autoprovisioned,
                exists: true,
                generation: 0,
            },
        )
    }

    /// A group that exists only as a description until created.
    pub(crate) fn theoretical(id: String, max_size: usize, template: NodeTemplate) -> Self {
        Self::with_state(
            id,
            GroupState {
                min_size: 0,
                max_size,
                target_size: 0,
                members: Vec::new(),
                template: Some(template),
                autoprovisioned: true,
                exists: false,
                generation: 0,
            },
        )
    }

    fn with_state(id: String, state: GroupState) -> Self {
        Self {
            id,
            state: Mutex::new(state),
            ops: tokio::sync::Mutex::new(()),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, GroupState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn generation(&self) -> u64 {
        self.state().generation
    }

    pub(crate) fn exists(&self) -> bool {
        self.state().exists
    }

    pub(crate) fn mutation_in_flight(&self) -> bool {
        self.ops.try_lock().is_err()
    }

    /// Apply a locally decided change and bump the generation.
    pub(crate) fn commit(&self, change: impl FnOnce(&mut GroupState)) {
        let mut state = self.state();
        change(&mut state);
        state.generation += 1;
    }

    /// Fold a backend report into the bookkeeping.
    ///
    /// Bounds and template always follow the backend. Target and members
    /// follow it only when no mutation was committed or started since
    /// `seen_generation` was recorded; otherwise the local values win.
    pub(crate) fn merge(&self, reported: BackendGroup, seen_generation: Option<u64>) {
        let in_flight = self.mutation_in_flight();
        let mut state = self.state();

        state.min_size = reported.min_size;
        state.max_size = reported.max_size;
        state.autoprovisioned = reported.autoprovisioned;
        state.exists = true;
        if reported.template.is_some() {
            state.template = reported.template;
        }

        if in_flight || seen_generation != Some(state.generation) {
            debug!(
                group = %self.id,
                generation = state.generation,
                in_flight,
                "keeping locally committed target over older backend report"
            );
            return;
        }

        if state.target_size != reported.target_size {
            info!(
                group = %self.id,
                from = state.target_size,
                to = reported.target_size,
                "target size changed outside the control loop"
            );
        }
        state.target_size = reported.target_size;
        state.members = reported.instances;
    }

    /// The backend stopped reporting this group.
    pub(crate) fn mark_removed(&self) {
        let mut state = self.state();
        state.exists = false;
        state.members.clear();
    }
}

impl fmt::Display for GroupCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        write!(
            f,
            "{} [{}:{}] target={} members={} exists={} autoprovisioned={}",
            self.id,
            state.min_size,
            state.max_size,
            state.target_size,
            state.members.len(),
            state.exists,
            state.autoprovisioned
        )
    }
}

/// Handle to a node group managed by a [`ManagedProvider`](crate::ManagedProvider).
pub struct ManagedNodeGroup {
    cell: Arc<GroupCell>,
    shared: Arc<Shared>,
}

impl ManagedNodeGroup {
    pub(crate) fn new(cell: Arc<GroupCell>, shared: Arc<Shared>) -> Self {
        Self { cell, shared }
    }

    fn ensure_exists(&self, state: &GroupState) -> CloudResult<()> {
        if state.exists {
            Ok(())
        } else {
            Err(CloudError::NotFound(format!(
                "node group {} does not exist",
                self.cell.id()
            )))
        }
    }

    fn require(&self, capability: Capability) -> CloudResult<()> {
        if self.shared.supports(capability) {
            Ok(())
        } else {
            Err(CloudError::not_implemented(capability.as_str()))
        }
    }

    /// Resolve requested nodes to member instance ids.
    fn resolve_members(&self, state: &GroupState, nodes: &[Node]) -> CloudResult<Vec<InstanceId>> {
        let mut ids = Vec::with_capacity(nodes.len());
        let mut seen = HashSet::new();
        for node in nodes {
            let member = state
                .members
                .iter()
                .find(|m| node.matches(&m.id))
                .ok_or_else(|| {
                    CloudError::NotFound(format!(
                        "node {} does not belong to node group {}",
                        node.name,
                        self.cell.id()
                    ))
                })?;
            if !seen.insert(member.id.as_str()) {
                return Err(CloudError::InvalidArgument(format!(
                    "node {} named more than once",
                    node.name
                )));
            }
            ids.push(member.id.clone());
        }
        Ok(ids)
    }
}

#[async_trait]
impl NodeGroup for ManagedNodeGroup {
    fn id(&self) -> &str {
        self.cell.id()
    }

    fn min_size(&self) -> usize {
        self.cell.state().min_size
    }

    fn max_size(&self) -> usize {
        self.cell.state().max_size
    }

    fn target_size(&self) -> CloudResult<usize> {
        Ok(self.cell.state().target_size)
    }

    async fn increase_size(&self, delta: i64) -> CloudResult<()> {
        if delta <= 0 {
            return Err(CloudError::InvalidArgument(format!(
                "size increase must be positive, got {delta}"
            )));
        }

        let _ops = self.cell.ops.lock().await;
        let (current, max) = {
            let state = self.cell.state();
            self.ensure_exists(&state)?;
            (state.target_size, state.max_size)
        };

        let target = usize::try_from(delta)
            .ok()
            .and_then(|d| current.checked_add(d))
            .filter(|t| *t <= max)
            .ok_or_else(|| {
                CloudError::InvalidArgument(format!(
                    "size increase too large: {current} + {delta} exceeds max size {max}"
                ))
            })?;

        bounded(
            self.shared.options.operation_timeout,
            "set target size",
            self.shared.backend.set_target_size(self.cell.id(), target),
        )
        .await?;

        self.cell.commit(|state| state.target_size = target);
        info!(group = %self.cell.id(), from = current, to = target, "node group target increased");
        Ok(())
    }

    async fn decrease_target_size(&self, delta: i64) -> CloudResult<()> {
        if delta >= 0 {
            return Err(CloudError::InvalidArgument(format!(
                "size decrease must be negative, got {delta}"
            )));
        }

        let _ops = self.cell.ops.lock().await;
        let (current, min, joined) = {
            let state = self.cell.state();
            self.ensure_exists(&state)?;
            let joined = state
                .members
                .iter()
                .filter(|m| m.state != InstanceState::Creating)
                .count();
            (state.target_size, state.min_size, joined)
        };

        let target = usize::try_from(delta.unsigned_abs())
            .ok()
            .and_then(|d| current.checked_sub(d))
            .filter(|t| *t >= min)
            .ok_or_else(|| {
                CloudError::InvalidArgument(format!(
                    "size decrease too large: {current} - {} is below min size {min}",
                    delta.unsigned_abs()
                ))
            })?;

        // Only instances still booting may be cancelled by a decrease.
        if target < joined {
            return Err(CloudError::InvalidArgument(format!(
                "attempt to delete existing nodes: target {target} is below {joined} joined members"
            )));
        }

        bounded(
            self.shared.options.operation_timeout,
            "set target size",
            self.shared.backend.set_target_size(self.cell.id(), target),
        )
        .await?;

        self.cell.commit(|state| state.target_size = target);
        info!(group = %self.cell.id(), from = current, to = target, "node group target decreased");
        Ok(())
    }

    async fn delete_nodes(&self, nodes: &[Node]) -> CloudResult<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        self.require(Capability::DeleteNodes)?;

        let _ops = self.cell.ops.lock().await;
        let (ids, current) = {
            let state = self.cell.state();
            self.ensure_exists(&state)?;
            let ids = self.resolve_members(&state, nodes)?;
            if state.target_size < state.min_size + ids.len() {
                return Err(CloudError::InvalidArgument(format!(
                    "deleting {} nodes would take node group {} below min size {}",
                    ids.len(),
                    self.cell.id(),
                    state.min_size
                )));
            }
            (ids, state.target_size)
        };

        bounded(
            self.shared.options.operation_timeout,
            "delete nodes",
            self.shared.backend.delete_nodes(self.cell.id(), &ids),
        )
        .await?;

        let target = current - ids.len();
        self.cell.commit(|state| {
            state.members.retain(|m| !ids.contains(&m.id));
            state.target_size = target;
        });
        self.shared.registry.reindex();

        info!(group = %self.cell.id(), deleted = ids.len(), target, "deleted nodes from node group");
        Ok(())
    }

    fn nodes(&self) -> CloudResult<Vec<Instance>> {
        Ok(self.cell.state().members.clone())
    }

    fn template_node_info(&self) -> CloudResult<NodeTemplate> {
        self.require(Capability::TemplateNodeInfo)?;
        self.cell.state().template.clone().ok_or_else(|| {
            CloudError::NotImplemented(format!(
                "node group {} has no node template",
                self.cell.id()
            ))
        })
    }

    fn exist(&self) -> bool {
        self.cell.exists()
    }

    async fn create(&self) -> CloudResult<()> {
        self.require(Capability::CreateGroup)?;

        let _ops = self.cell.ops.lock().await;
        let request = {
            let state = self.cell.state();
            if state.exists {
                return Err(CloudError::InvalidArgument(format!(
                    "node group {} already exists",
                    self.cell.id()
                )));
            }
            let template = state.template.clone().ok_or_else(|| {
                CloudError::InvalidArgument(format!(
                    "node group {} has no template to create from",
                    self.cell.id()
                ))
            })?;
            GroupRequest {
                id: self.cell.id().to_string(),
                min_size: state.min_size,
                max_size: state.max_size,
                template,
            }
        };

        let created = bounded(
            self.shared.options.operation_timeout,
            "create node group",
            self.shared.backend.create_group(&request),
        )
        .await?;

        self.cell.commit(|state| {
            state.exists = true;
            state.min_size = created.min_size;
            state.max_size = created.max_size;
            state.target_size = created.target_size;
            state.members = created.instances;
        });
        self.shared.registry.insert(Arc::clone(&self.cell));

        info!(group = %self.cell.id(), "node group created");
        Ok(())
    }

    async fn delete(&self) -> CloudResult<()> {
        self.require(Capability::DeleteGroup)?;

        let _ops = self.cell.ops.lock().await;
        {
            let state = self.cell.state();
            self.ensure_exists(&state)?;
            if !state.autoprovisioned {
                return Err(CloudError::InvalidArgument(format!(
                    "node group {} is not autoprovisioned",
                    self.cell.id()
                )));
            }
            if state.target_size != 0 {
                return Err(CloudError::InvalidArgument(format!(
                    "node group {} still has target size {}",
                    self.cell.id(),
                    state.target_size
                )));
            }
        }

        bounded(
            self.shared.options.operation_timeout,
            "delete node group",
            self.shared.backend.delete_group(self.cell.id()),
        )
        .await?;

        self.cell.commit(|state| {
            state.exists = false;
            state.members.clear();
        });
        self.shared.registry.remove(self.cell.id());

        info!(group = %self.cell.id(), "node group deleted");
        Ok(())
    }

    fn autoprovisioned(&self) -> bool {
        self.cell.state().autoprovisioned
    }

    fn debug(&self) -> String {
        self.cell.to_string()
    }
}

impl fmt::Debug for ManagedNodeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedNodeGroup")
            .field("id", &self.cell.id())
            .field("state", &*self.cell.state())
            .finish()
    }
}
