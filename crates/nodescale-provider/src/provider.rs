//! Managed provider: owns the group registry for one backend.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use nodescale_core::{
    Capability, CloudError, CloudProvider, CloudResult, Node, NodeGroup, NodeTemplate,
    PricingModel, ResourceLimiter,
};

use crate::backend::Backend;
use crate::group::{GroupCell, ManagedNodeGroup};
use crate::options::{ProviderOptions, bounded};
use crate::registry::{Registry, merge_listing};

/// State shared between the provider, its group handles, and the
/// background refresher.
pub(crate) struct Shared {
    pub backend: Arc<dyn Backend>,
    pub options: ProviderOptions,
    pub registry: Registry,
    capabilities: BTreeSet<Capability>,
}

impl Shared {
    pub(crate) fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// One backend listing, merged into the registry.
    async fn refresh(&self) -> CloudResult<()> {
        let before = self.registry.load();
        let generations: HashMap<String, u64> = before
            .groups
            .iter()
            .map(|(id, cell)| (id.clone(), cell.generation()))
            .collect();

        let listed = bounded(
            self.options.operation_timeout,
            "list node groups",
            self.backend.list_groups(),
        )
        .await
        .inspect_err(|e| {
            warn!(backend = %self.backend.name(), error = %e, "refresh failed, keeping last known node groups");
        })?;

        let listed_count = listed.len();
        self.registry
            .update(|current| merge_listing(current, &generations, listed));

        debug!(backend = %self.backend.name(), groups = listed_count, "node groups refreshed");
        Ok(())
    }
}

struct Refresher {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// A [`CloudProvider`] over any [`Backend`].
///
/// Groups are discovered by `refresh`; construct with [`ManagedProvider::connect`]
/// to perform the first refresh up front.
pub struct ManagedProvider {
    shared: Arc<Shared>,
    limiter: Arc<ResourceLimiter>,
    refresher: Mutex<Option<Refresher>>,
    cleanup_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl ManagedProvider {
    /// Create a provider with an empty registry.
    pub fn new(
        backend: Arc<dyn Backend>,
        limiter: Arc<ResourceLimiter>,
        options: ProviderOptions,
    ) -> Self {
        let capabilities = backend.capabilities();
        info!(
            backend = %backend.name(),
            capabilities = ?capabilities,
            timeout_ms = options.operation_timeout.as_millis() as u64,
            "managed provider created"
        );
        Self {
            shared: Arc::new(Shared {
                backend,
                options,
                registry: Registry::new(),
                capabilities,
            }),
            limiter,
            refresher: Mutex::new(None),
            cleanup_lock: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Create a provider and load the initial set of groups.
    pub async fn connect(
        backend: Arc<dyn Backend>,
        limiter: Arc<ResourceLimiter>,
        options: ProviderOptions,
    ) -> CloudResult<Self> {
        let provider = Self::new(backend, limiter, options);
        provider.shared.refresh().await?;
        Ok(provider)
    }

    /// Refresh on an interval in the background until [`cleanup`](CloudProvider::cleanup).
    ///
    /// Must be called from within a tokio runtime. Replaces any refresher
    /// already running; does nothing once the provider is cleaned up.
    pub fn spawn_refresher(&self, interval: Duration) {
        let mut slot = self.refresher.lock().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::SeqCst) {
            warn!("provider already cleaned up, background refresher not started");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);

        let handle = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "background refresher started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        // Failures are logged inside refresh; the next tick retries.
                        let _ = shared.refresh().await;
                    }
                    _ = shutdown_rx.changed() => {
                        info!("background refresher shutting down");
                        break;
                    }
                }
            }
        });

        let previous = slot.replace(Refresher {
            shutdown: shutdown_tx,
            handle,
        });
        if let Some(old) = previous {
            let _ = old.shutdown.send(true);
            old.handle.abort();
        }
    }

    fn take_refresher(&self) -> Option<Refresher> {
        self.refresher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn handle(&self, cell: &Arc<GroupCell>) -> Arc<dyn NodeGroup> {
        Arc::new(ManagedNodeGroup::new(Arc::clone(cell), Arc::clone(&self.shared)))
    }

    fn require(&self, capability: Capability) -> CloudResult<()> {
        if self.shared.supports(capability) {
            Ok(())
        } else {
            Err(CloudError::not_implemented(capability.as_str()))
        }
    }
}

#[async_trait]
impl CloudProvider for ManagedProvider {
    fn name(&self) -> &str {
        self.shared.backend.name()
    }

    fn node_groups(&self) -> Vec<Arc<dyn NodeGroup>> {
        let snapshot = self.shared.registry.load();
        snapshot
            .groups
            .values()
            .filter(|cell| cell.exists())
            .map(|cell| self.handle(cell))
            .collect()
    }

    fn node_group_for_node(&self, node: &Node) -> CloudResult<Option<Arc<dyn NodeGroup>>> {
        let snapshot = self.shared.registry.load();

        // Same key as `Node::matches`: the provider id when set, else the name.
        let key = node.provider_id.as_deref().unwrap_or(&node.name);
        if let Some(cell) = snapshot.owner_of(key) {
            return Ok(Some(self.handle(cell)));
        }

        match node.labels.get(&self.shared.options.group_label) {
            Some(group_id) => match snapshot.groups.get(group_id) {
                Some(cell) if cell.exists() => {
                    debug!(node = %node.name, group = %group_id, "node matched by group label");
                    Ok(Some(self.handle(cell)))
                }
                _ => Err(CloudError::NotFound(format!(
                    "node {} is labelled for unknown node group {group_id}",
                    node.name
                ))),
            },
            None => Ok(None),
        }
    }

    fn supports(&self, capability: Capability) -> bool {
        self.shared.supports(capability)
    }

    fn pricing(&self) -> CloudResult<Arc<dyn PricingModel>> {
        self.require(Capability::Pricing)?;
        self.shared.backend.pricing()
    }

    fn available_machine_types(&self) -> CloudResult<Vec<String>> {
        self.require(Capability::MachineCatalog)?;
        Ok(self
            .shared
            .backend
            .machine_types()?
            .into_iter()
            .map(|m| m.name)
            .collect())
    }

    fn new_node_group(
        &self,
        machine_type: &str,
        labels: BTreeMap<String, String>,
        system_labels: BTreeMap<String, String>,
        extra_resources: BTreeMap<String, u64>,
    ) -> CloudResult<Arc<dyn NodeGroup>> {
        self.require(Capability::MachineCatalog)?;

        let catalog = self.shared.backend.machine_types()?;
        let machine = catalog
            .iter()
            .find(|m| m.name == machine_type)
            .ok_or_else(|| CloudError::NotFound(format!("machine type {machine_type}")))?;

        let mut template = NodeTemplate::from_machine_type(machine);
        template.labels = labels;
        template.system_labels = system_labels;
        template.capacity.extend(extra_resources);

        let id = autoprovisioned_group_id(&template);
        debug!(group = %id, %machine_type, "built theoretical node group");

        let cell = Arc::new(GroupCell::theoretical(
            id,
            self.shared.options.autoprovisioned_max_size,
            template,
        ));
        Ok(self.handle(&cell))
    }

    fn resource_limiter(&self) -> Arc<ResourceLimiter> {
        Arc::clone(&self.limiter)
    }

    async fn cleanup(&self) -> CloudResult<()> {
        let _guard = self.cleanup_lock.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            debug!("provider already cleaned up");
            return Ok(());
        }

        if let Some(refresher) = self.take_refresher() {
            let _ = refresher.shutdown.send(true);
            if let Err(e) = refresher.handle.await {
                warn!(error = %e, "background refresher ended abnormally");
            }
        }

        // A failed close leaves the provider open so cleanup can be retried.
        bounded(
            self.shared.options.operation_timeout,
            "close backend",
            self.shared.backend.close(),
        )
        .await?;

        {
            let mut slot = self.refresher.lock().unwrap_or_else(PoisonError::into_inner);
            self.closed.store(true, Ordering::SeqCst);
            // Refresher started while the backend was closing.
            if let Some(late) = slot.take() {
                let _ = late.shutdown.send(true);
                late.handle.abort();
            }
        }

        info!(backend = %self.shared.backend.name(), "provider cleaned up");
        Ok(())
    }

    async fn refresh(&self) -> CloudResult<()> {
        self.shared.refresh().await
    }
}

/// Deterministic id for a theoretical group: the same template always
/// yields the same id.
fn autoprovisioned_group_id(template: &NodeTemplate) -> String {
    let mut hash: u64 = 0xcbf29ce484222325;
    let mut feed = |s: &str| {
        for byte in s.bytes().chain(std::iter::once(0)) {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
    };
    for (k, v) in template.labels.iter().chain(&template.system_labels) {
        feed(k.as_str());
        feed(v.as_str());
    }
    for (k, v) in &template.capacity {
        feed(k.as_str());
        feed(v.to_string().as_str());
    }
    format!("nodescale-{}-{:08x}", template.machine_type, hash as u32)
}
