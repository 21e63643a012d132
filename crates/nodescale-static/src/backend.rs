//! StaticBackend: config-seeded pools held in memory.
//!
//! Pools are seeded from `[[node_groups]]`; listed nodes start `Running` and
//! any remaining target is filled with `Creating` instances. A launched
//! instance is listed as `Creating` once and as `Running` from the next
//! listing on, so a control loop sees nodes join one refresh after the
//! resize that launched them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info};

use nodescale_core::{
    Capability, CloudError, CloudResult, Instance, InstanceId, MachineType, NodeTemplate,
    NodescaleConfig, PricingModel,
};
use nodescale_provider::{Backend, BackendGroup, GroupRequest};

use crate::pool::StaticPool;
use crate::pricing::CatalogPricing;

pub const BACKEND_NAME: &str = "static";

pub struct StaticBackend {
    pools: Mutex<BTreeMap<String, StaticPool>>,
    catalog: Vec<MachineType>,
    pricing: Arc<CatalogPricing>,
    allow_group_creation: bool,
    allow_node_deletion: bool,
}

impl StaticBackend {
    /// Seed pools and the machine catalog from a validated config.
    pub fn from_config(config: &NodescaleConfig) -> CloudResult<Self> {
        let mut pools = BTreeMap::new();
        for group in &config.node_groups {
            let mut pool = StaticPool::new(&group.id, group.min_size, group.max_size);
            pool.autoprovisioned = group.autoprovisioned;
            pool.instances = group.nodes.iter().map(|n| Instance::running(n)).collect();
            pool.resize(group.initial_target())?;

            if let Some(name) = &group.machine_type {
                let machine = config
                    .machine_types
                    .iter()
                    .find(|m| &m.name == name)
                    .ok_or_else(|| CloudError::Config(format!("unknown machine type {name}")))?;
                let mut template = NodeTemplate::from_machine_type(machine);
                template
                    .labels
                    .insert(config.provider.group_label.clone(), group.id.clone());
                pool.template = Some(template);
            }

            debug!(group = %group.id, target = pool.target_size(), "seeded static pool");
            pools.insert(group.id.clone(), pool);
        }

        Ok(Self {
            pools: Mutex::new(pools),
            pricing: Arc::new(CatalogPricing::from_catalog(&config.machine_types)),
            catalog: config.machine_types.clone(),
            allow_group_creation: config.backend.allow_group_creation,
            allow_node_deletion: config.backend.allow_node_deletion,
        })
    }

    fn pools(&self) -> MutexGuard<'_, BTreeMap<String, StaticPool>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn require(&self, capability: Capability) -> CloudResult<()> {
        if self.capabilities().contains(&capability) {
            Ok(())
        } else {
            Err(CloudError::not_implemented(capability.as_str()))
        }
    }
}

fn unknown_pool(id: &str) -> CloudError {
    CloudError::NotFound(format!("pool {id}"))
}

#[async_trait]
impl Backend for StaticBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn capabilities(&self) -> BTreeSet<Capability> {
        let mut capabilities = BTreeSet::new();
        if self.allow_group_creation {
            capabilities.insert(Capability::CreateGroup);
            capabilities.insert(Capability::DeleteGroup);
        }
        if self.allow_node_deletion {
            capabilities.insert(Capability::DeleteNodes);
        }
        if !self.catalog.is_empty() {
            capabilities.insert(Capability::MachineCatalog);
            capabilities.insert(Capability::TemplateNodeInfo);
        }
        if !self.pricing.is_empty() {
            capabilities.insert(Capability::Pricing);
        }
        capabilities
    }

    async fn list_groups(&self) -> CloudResult<Vec<BackendGroup>> {
        let mut pools = self.pools();
        let mut listed = Vec::with_capacity(pools.len());
        for pool in pools.values_mut() {
            let joined = pool.advance_boot();
            if joined > 0 {
                debug!(group = %pool.id, joined, "instances finished booting");
            }
            listed.push(pool.report());
        }
        Ok(listed)
    }

    async fn set_target_size(&self, group_id: &str, target: usize) -> CloudResult<()> {
        let mut pools = self.pools();
        let pool = pools.get_mut(group_id).ok_or_else(|| unknown_pool(group_id))?;
        let changed = pool.resize(target)?;
        debug!(group = %group_id, target, changed = ?changed, "static pool resized");
        Ok(())
    }

    async fn delete_nodes(&self, group_id: &str, instances: &[InstanceId]) -> CloudResult<()> {
        self.require(Capability::DeleteNodes)?;
        let mut pools = self.pools();
        let pool = pools.get_mut(group_id).ok_or_else(|| unknown_pool(group_id))?;
        pool.remove(instances)?;
        debug!(group = %group_id, deleted = instances.len(), "instances removed from static pool");
        Ok(())
    }

    async fn create_group(&self, request: &GroupRequest) -> CloudResult<BackendGroup> {
        self.require(Capability::CreateGroup)?;
        let mut pools = self.pools();
        if pools.contains_key(&request.id) {
            return Err(CloudError::InvalidArgument(format!(
                "pool {} already exists",
                request.id
            )));
        }

        let mut pool = StaticPool::new(&request.id, request.min_size, request.max_size);
        pool.template = Some(request.template.clone());
        pool.autoprovisioned = true;
        let created = pool.report();
        pools.insert(request.id.clone(), pool);

        info!(group = %request.id, machine_type = %request.template.machine_type, "static pool created");
        Ok(created)
    }

    async fn delete_group(&self, group_id: &str) -> CloudResult<()> {
        self.require(Capability::DeleteGroup)?;
        self.pools()
            .remove(group_id)
            .ok_or_else(|| unknown_pool(group_id))?;
        info!(group = %group_id, "static pool deleted");
        Ok(())
    }

    fn machine_types(&self) -> CloudResult<Vec<MachineType>> {
        self.require(Capability::MachineCatalog)?;
        Ok(self.catalog.clone())
    }

    fn pricing(&self) -> CloudResult<Arc<dyn PricingModel>> {
        self.require(Capability::Pricing)?;
        Ok(self.pricing.clone())
    }
}
