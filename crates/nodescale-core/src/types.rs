//! Domain types shared across the provider contract.
//!
//! These types describe cluster nodes as seen by the control loop,
//! instances as reported by a backend, and the machine shapes a backend
//! can provision.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unique identifier for a node group.
pub type GroupId = String;

/// Backend identifier of a single instance within a node group.
pub type InstanceId = String;

/// Resource name for CPU cores.
pub const RESOURCE_CPU: &str = "cpu";

/// Resource name for memory, measured in MiB.
pub const RESOURCE_MEMORY: &str = "memory";

// ── Nodes ──────────────────────────────────────────────────────────

/// A cluster node as observed by the control loop.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Node {
    /// Node name (usually the hostname).
    pub name: String,
    /// Backend-assigned instance identifier, when the node carries one.
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Node {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Builder method: set the backend instance identifier.
    pub fn with_provider_id(self, provider_id: &str) -> Self {
        Self {
            provider_id: Some(provider_id.to_string()),
            ..self
        }
    }

    /// Builder method: add a label.
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Whether this node is the instance with the given backend id.
    ///
    /// The provider id wins when present; otherwise the node name is
    /// compared.
    pub fn matches(&self, instance_id: &str) -> bool {
        match &self.provider_id {
            Some(id) => id == instance_id,
            None => self.name == instance_id,
        }
    }
}

// ── Instances ──────────────────────────────────────────────────────

/// Lifecycle state of an instance as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Requested, still booting or registering.
    Creating,
    Running,
    /// Termination requested, not yet gone.
    Deleting,
}

/// A member of a node group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub state: InstanceState,
}

impl Instance {
    pub fn running(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: InstanceState::Running,
        }
    }

    pub fn creating(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: InstanceState::Creating,
        }
    }
}

// ── Machine shapes ─────────────────────────────────────────────────

/// An entry of the backend's machine catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineType {
    pub name: String,
    /// CPU cores per node.
    pub cpu: u64,
    /// Memory per node in MiB.
    pub memory_mib: u64,
    /// On-demand price of one node for one hour.
    #[serde(default)]
    pub price_per_hour: Option<f64>,
    /// Additional resources per node (e.g. "gpu").
    #[serde(default)]
    pub extra: BTreeMap<String, u64>,
}

/// What a freshly started node of a group looks like.
///
/// Used by scale-up simulation to predict the capacity a new node adds.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeTemplate {
    pub machine_type: String,
    pub labels: BTreeMap<String, String>,
    pub system_labels: BTreeMap<String, String>,
    /// Capacity per resource name (cpu, memory in MiB, extras).
    pub capacity: BTreeMap<String, u64>,
}

impl NodeTemplate {
    /// Template for a bare node of the given machine type.
    pub fn from_machine_type(machine: &MachineType) -> Self {
        let mut capacity = machine.extra.clone();
        capacity.insert(RESOURCE_CPU.to_string(), machine.cpu);
        capacity.insert(RESOURCE_MEMORY.to_string(), machine.memory_mib);
        Self {
            machine_type: machine.name.clone(),
            capacity,
            ..Self::default()
        }
    }

    /// Capacity of one node for a resource, 0 when absent.
    pub fn capacity_of(&self, resource: &str) -> u64 {
        self.capacity.get(resource).copied().unwrap_or(0)
    }
}

// ── Capabilities ───────────────────────────────────────────────────

/// Optional operations a backend may or may not support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Pricing,
    MachineCatalog,
    TemplateNodeInfo,
    CreateGroup,
    DeleteGroup,
    DeleteNodes,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::Pricing,
        Capability::MachineCatalog,
        Capability::TemplateNodeInfo,
        Capability::CreateGroup,
        Capability::DeleteGroup,
        Capability::DeleteNodes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Pricing => "pricing",
            Capability::MachineCatalog => "machine_catalog",
            Capability::TemplateNodeInfo => "template_node_info",
            Capability::CreateGroup => "create_group",
            Capability::DeleteGroup => "delete_group",
            Capability::DeleteNodes => "delete_nodes",
        }
    }
}
