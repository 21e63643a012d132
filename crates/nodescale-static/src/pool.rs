//! In-memory node pool with simulated instance boot.

use std::collections::HashSet;

use nodescale_core::{CloudError, CloudResult, Instance, InstanceId, InstanceState, NodeTemplate};
use nodescale_provider::BackendGroup;

/// One pool held by the static backend.
///
/// The pool's target size is always its instance count: growing adds
/// `Creating` instances, shrinking cancels them.
#[derive(Debug, Clone)]
pub(crate) struct StaticPool {
    pub id: String,
    pub min_size: usize,
    pub max_size: usize,
    pub instances: Vec<Instance>,
    pub template: Option<NodeTemplate>,
    pub autoprovisioned: bool,
    next_seq: u64,
    /// Booting instances already reported once; they join on the next listing.
    reported_booting: HashSet<InstanceId>,
}

impl StaticPool {
    pub(crate) fn new(id: &str, min_size: usize, max_size: usize) -> Self {
        Self {
            id: id.to_string(),
            min_size,
            max_size,
            instances: Vec::new(),
            template: None,
            autoprovisioned: false,
            next_seq: 0,
            reported_booting: HashSet::new(),
        }
    }

    pub(crate) fn target_size(&self) -> usize {
        self.instances.len()
    }

    /// Next unused `<pool>-<seq>` instance name.
    fn next_instance_id(&mut self) -> InstanceId {
        loop {
            let candidate = format!("{}-{}", self.id, self.next_seq);
            self.next_seq += 1;
            if !self.instances.iter().any(|i| i.id == candidate) {
                return candidate;
            }
        }
    }

    /// Grow or shrink to `target` instances.
    ///
    /// Returns the ids that were launched or cancelled.
    pub(crate) fn resize(&mut self, target: usize) -> CloudResult<Vec<InstanceId>> {
        if target > self.max_size {
            return Err(CloudError::InvalidArgument(format!(
                "pool {}: target {target} exceeds max size {}",
                self.id, self.max_size
            )));
        }

        let current = self.instances.len();
        if target >= current {
            let mut launched = Vec::with_capacity(target - current);
            for _ in current..target {
                let id = self.next_instance_id();
                self.instances.push(Instance::creating(&id));
                launched.push(id);
            }
            return Ok(launched);
        }

        let excess = current - target;
        let booting = self
            .instances
            .iter()
            .filter(|i| i.state == InstanceState::Creating)
            .count();
        if booting < excess {
            return Err(CloudError::InvalidArgument(format!(
                "pool {}: cannot shrink to {target}, only {booting} instances are still booting",
                self.id
            )));
        }

        // Newest booting instances go first.
        let mut cancelled = Vec::with_capacity(excess);
        for index in (0..self.instances.len()).rev() {
            if cancelled.len() == excess {
                break;
            }
            if self.instances[index].state == InstanceState::Creating {
                let id = self.instances.remove(index).id;
                self.reported_booting.remove(&id);
                cancelled.push(id);
            }
        }
        Ok(cancelled)
    }

    /// Remove named instances; all or nothing.
    pub(crate) fn remove(&mut self, ids: &[InstanceId]) -> CloudResult<()> {
        if let Some(missing) = ids.iter().find(|id| !self.instances.iter().any(|i| &i.id == *id)) {
            return Err(CloudError::NotFound(format!(
                "instance {missing} in pool {}",
                self.id
            )));
        }
        self.instances.retain(|i| !ids.contains(&i.id));
        self.reported_booting.retain(|id| !ids.contains(id));
        Ok(())
    }

    /// Advance simulated boot by one listing.
    ///
    /// A `Creating` instance is reported as such once and becomes `Running`
    /// on the listing after. Returns how many instances joined.
    pub(crate) fn advance_boot(&mut self) -> usize {
        let mut joined = 0;
        for instance in &mut self.instances {
            if instance.state != InstanceState::Creating {
                continue;
            }
            if self.reported_booting.remove(&instance.id) {
                instance.state = InstanceState::Running;
                joined += 1;
            } else {
                self.reported_booting.insert(instance.id.clone());
            }
        }
        joined
    }

    pub(crate) fn report(&self) -> BackendGroup {
        BackendGroup {
            id: self.id.clone(),
            min_size: self.min_size,
            max_size: self.max_size,
            target_size: self.target_size(),
            instances: self.instances.clone(),
            template: self.template.clone(),
            autoprovisioned: self.autoprovisioned,
        }
    }
}
