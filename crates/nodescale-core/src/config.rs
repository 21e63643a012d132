//! nodescale.toml configuration parser.
//!
//! Every parse or validation failure surfaces as [`CloudError::Config`],
//! so a provider is either built from a fully valid config or not at all.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CloudError, CloudResult};
use crate::limiter::{Bounds, ResourceLimiter};
use crate::types::MachineType;

/// Default node label naming the group a node belongs to.
pub const DEFAULT_GROUP_LABEL: &str = "nodescale.io/group";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodescaleConfig {
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub backend: BackendSection,
    /// Aggregate resource bounds keyed by resource name.
    #[serde(default)]
    pub limits: BTreeMap<String, Bounds>,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub machine_types: Vec<MachineType>,
    #[serde(default)]
    pub node_groups: Vec<NodeGroupConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    /// Backend to build (e.g., "static").
    pub name: String,
    /// Upper bound on any single backend call.
    pub operation_timeout_secs: u64,
    /// Node label naming the owning group.
    pub group_label: String,
    /// Max size given to theoretical groups built for scale-from-zero.
    pub autoprovisioned_max_size: usize,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            name: "static".to_string(),
            operation_timeout_secs: 30,
            group_label: DEFAULT_GROUP_LABEL.to_string(),
            autoprovisioned_max_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSection {
    pub allow_group_creation: bool,
    /// When false, node deletion is reported as not implemented.
    pub allow_node_deletion: bool,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            allow_group_creation: true,
            allow_node_deletion: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoverySection {
    /// Bound overrides in `min:max:id` form.
    #[serde(default)]
    pub node_group_specs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeGroupConfig {
    pub id: String,
    pub min_size: usize,
    pub max_size: usize,
    /// Defaults to the number of listed nodes.
    #[serde(default)]
    pub target_size: Option<usize>,
    #[serde(default)]
    pub machine_type: Option<String>,
    #[serde(default)]
    pub autoprovisioned: bool,
    #[serde(default)]
    pub nodes: Vec<String>,
}

impl NodeGroupConfig {
    /// Target size the group starts with.
    pub fn initial_target(&self) -> usize {
        self.target_size.unwrap_or(self.nodes.len())
    }
}

/// A `min:max:id` discovery spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeGroupSpec {
    pub min_size: usize,
    pub max_size: usize,
    pub id: String,
}

impl FromStr for NodeGroupSpec {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CloudError::Config(format!("invalid node group spec: {s:?}"));

        let mut parts = s.splitn(3, ':');
        let min_size = parts.next().and_then(|p| p.trim().parse().ok()).ok_or_else(invalid)?;
        let max_size = parts.next().and_then(|p| p.trim().parse().ok()).ok_or_else(invalid)?;
        let id = parts.next().map(str::trim).filter(|p| !p.is_empty()).ok_or_else(invalid)?;

        if min_size > max_size {
            return Err(CloudError::Config(format!(
                "node group spec {s:?}: min size {min_size} exceeds max size {max_size}"
            )));
        }

        Ok(Self {
            min_size,
            max_size,
            id: id.to_string(),
        })
    }
}

impl NodescaleConfig {
    pub fn from_file(path: &Path) -> CloudResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CloudError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    /// Parse, apply discovery overrides, and validate.
    pub fn parse(content: &str) -> CloudResult<Self> {
        let mut config: NodescaleConfig = toml::from_str(content)?;
        config.apply_discovery()?;
        config.validate()?;
        Ok(config)
    }

    pub fn resource_limiter(&self) -> ResourceLimiter {
        ResourceLimiter::new(self.limits.clone())
    }

    /// Override group bounds from `discovery.node_group_specs`.
    fn apply_discovery(&mut self) -> CloudResult<()> {
        for raw in &self.discovery.node_group_specs {
            let spec: NodeGroupSpec = raw.parse()?;
            let group = self
                .node_groups
                .iter_mut()
                .find(|g| g.id == spec.id)
                .ok_or_else(|| {
                    CloudError::Config(format!(
                        "node group spec {raw:?} names unknown group {}",
                        spec.id
                    ))
                })?;
            group.min_size = spec.min_size;
            group.max_size = spec.max_size;
            debug!(group = %spec.id, min = spec.min_size, max = spec.max_size, "applied node group spec");
        }
        Ok(())
    }

    pub fn validate(&self) -> CloudResult<()> {
        if self.provider.name.trim().is_empty() {
            return Err(CloudError::Config("provider name must not be empty".into()));
        }
        if self.provider.operation_timeout_secs == 0 {
            return Err(CloudError::Config(
                "operation_timeout_secs must be greater than zero".into(),
            ));
        }

        for (resource, bounds) in &self.limits {
            if bounds.min > bounds.max {
                return Err(CloudError::Config(format!(
                    "limit {resource}: min {} exceeds max {}",
                    bounds.min, bounds.max
                )));
            }
        }

        let mut machine_names = HashSet::new();
        for machine in &self.machine_types {
            if !machine_names.insert(machine.name.as_str()) {
                return Err(CloudError::Config(format!(
                    "duplicate machine type {}",
                    machine.name
                )));
            }
        }

        let mut group_ids = HashSet::new();
        let mut node_owners: HashMap<&str, &str> = HashMap::new();
        for group in &self.node_groups {
            if group.id.trim().is_empty() {
                return Err(CloudError::Config("node group id must not be empty".into()));
            }
            if !group_ids.insert(group.id.as_str()) {
                return Err(CloudError::Config(format!(
                    "duplicate node group {}",
                    group.id
                )));
            }
            if group.min_size > group.max_size {
                return Err(CloudError::Config(format!(
                    "node group {}: min size {} exceeds max size {}",
                    group.id, group.min_size, group.max_size
                )));
            }
            let target = group.initial_target();
            if target < group.min_size || target > group.max_size {
                return Err(CloudError::Config(format!(
                    "node group {}: target size {target} outside [{}, {}]",
                    group.id, group.min_size, group.max_size
                )));
            }
            if group.nodes.len() > target {
                return Err(CloudError::Config(format!(
                    "node group {}: {} nodes listed but target size is {target}",
                    group.id,
                    group.nodes.len()
                )));
            }
            if let Some(machine) = &group.machine_type
                && !machine_names.contains(machine.as_str())
            {
                return Err(CloudError::Config(format!(
                    "node group {}: unknown machine type {machine}",
                    group.id
                )));
            }
            for node in &group.nodes {
                if let Some(owner) = node_owners.insert(node.as_str(), group.id.as_str()) {
                    return Err(CloudError::Config(format!(
                        "node {node} listed in both {owner} and {}",
                        group.id
                    )));
                }
            }
        }

        Ok(())
    }
}
