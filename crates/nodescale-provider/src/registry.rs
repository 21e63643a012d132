//! Node group registry: immutable snapshots swapped on change.
//!
//! Readers clone the current `Arc<Snapshot>` and never wait on the
//! backend. Writers build a new snapshot under the write lock, so a
//! refresh merge cannot interleave with a concurrent create or delete.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::backend::BackendGroup;
use crate::group::GroupCell;

/// Point-in-time view of all registered groups.
#[derive(Default)]
pub(crate) struct Snapshot {
    pub groups: BTreeMap<String, Arc<GroupCell>>,
    /// Instance id → owning group id.
    pub node_index: HashMap<String, String>,
}

impl Snapshot {
    /// Build a snapshot and its node index from a set of groups.
    ///
    /// An instance claimed by two groups stays with the first in id order.
    pub(crate) fn build(groups: BTreeMap<String, Arc<GroupCell>>) -> Self {
        let mut node_index = HashMap::new();
        for (id, cell) in &groups {
            let state = cell.state();
            if !state.exists {
                continue;
            }
            for member in &state.members {
                if let Some(owner) = node_index.get(&member.id) {
                    warn!(instance = %member.id, %owner, group = %id, "instance already indexed under another node group");
                    continue;
                }
                node_index.insert(member.id.clone(), id.clone());
            }
        }
        Self { groups, node_index }
    }

    pub(crate) fn owner_of(&self, instance_id: &str) -> Option<&Arc<GroupCell>> {
        self.node_index
            .get(instance_id)
            .and_then(|id| self.groups.get(id))
    }
}

pub(crate) struct Registry {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    pub(crate) fn load(&self) -> Arc<Snapshot> {
        let guard = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Replace the snapshot with one derived from the current one.
    pub(crate) fn update(&self, derive: impl FnOnce(&Snapshot) -> Snapshot) {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        let next = derive(&guard);
        *guard = Arc::new(next);
    }

    pub(crate) fn insert(&self, cell: Arc<GroupCell>) {
        self.update(|current| {
            let mut groups = current.groups.clone();
            groups.insert(cell.id().to_string(), cell);
            Snapshot::build(groups)
        });
    }

    pub(crate) fn remove(&self, id: &str) {
        self.update(|current| {
            let mut groups = current.groups.clone();
            groups.remove(id);
            Snapshot::build(groups)
        });
    }

    /// Rebuild the node index after membership changed in place.
    pub(crate) fn reindex(&self) {
        self.update(|current| Snapshot::build(current.groups.clone()));
    }
}

/// Merge a backend listing into the current snapshot.
///
/// `generations` holds each group's generation as recorded before the
/// listing was requested; groups absent from it were registered while the
/// listing was in flight.
pub(crate) fn merge_listing(
    current: &Snapshot,
    generations: &HashMap<String, u64>,
    mut listed: Vec<BackendGroup>,
) -> Snapshot {
    listed.sort_by(|a, b| a.id.cmp(&b.id));

    // An instance reported by two groups keeps its previous owner, or the
    // first group in id order when it is new.
    let mut owners: HashMap<String, String> = HashMap::new();
    for group in &listed {
        for instance in &group.instances {
            let previous = current.node_index.get(&instance.id);
            match owners.get(&instance.id) {
                None => {
                    owners.insert(instance.id.clone(), group.id.clone());
                }
                Some(_) if previous == Some(&group.id) => {
                    owners.insert(instance.id.clone(), group.id.clone());
                }
                Some(_) => {}
            }
        }
    }

    let mut groups = BTreeMap::new();
    for mut group in listed {
        let id = group.id.clone();
        if group.min_size > group.max_size {
            warn!(group = %id, min = group.min_size, max = group.max_size, "ignoring node group with inverted bounds");
            continue;
        }
        if groups.contains_key(&id) {
            warn!(group = %id, "ignoring duplicate node group in backend listing");
            continue;
        }

        group.instances.retain(|instance| {
            let owned = owners.get(&instance.id) == Some(&id);
            if !owned {
                warn!(instance = %instance.id, group = %id, "instance reported by two node groups, ignoring duplicate");
            }
            owned
        });

        let cell = match current.groups.get(&id) {
            Some(cell) => {
                cell.merge(group, generations.get(&id).copied());
                Arc::clone(cell)
            }
            None if generations.contains_key(&id) => {
                debug!(group = %id, "node group deleted during refresh, skipping");
                continue;
            }
            None => {
                info!(group = %id, target = group.target_size, "discovered node group");
                Arc::new(GroupCell::from_backend(group))
            }
        };
        groups.insert(id, cell);
    }

    for (id, cell) in &current.groups {
        if groups.contains_key(id) {
            continue;
        }
        if generations.contains_key(id) {
            cell.mark_removed();
            info!(group = %id, "node group removed outside the control loop");
        } else {
            groups.insert(id.clone(), Arc::clone(cell));
        }
    }

    Snapshot::build(groups)
}
