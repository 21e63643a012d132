//! End-to-end provider contract over the static backend.
//!
//! Each test builds a provider from a TOML config exactly as `nodescaled`
//! does and drives it through the public `CloudProvider` / `NodeGroup`
//! surface.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use nodescale_core::*;
use nodescale_static::build_provider;

const BASE: &str = r#"
[provider]
name = "static"
operation_timeout_secs = 5

[limits.cpu]
max = 16

[[machine_types]]
name = "standard-4"
cpu = 4
memory_mib = 16384
price_per_hour = 0.2

[[machine_types]]
name = "gpu-8"
cpu = 8
memory_mib = 65536
extra = { gpu = 1 }

[[node_groups]]
id = "workers"
min_size = 1
max_size = 3
target_size = 2
machine_type = "standard-4"
nodes = ["worker-0"]

[[node_groups]]
id = "batch"
min_size = 0
max_size = 4
machine_type = "standard-4"
nodes = ["batch-a", "batch-b"]
"#;

async fn provider(extra: &str) -> impl CloudProvider {
    let config = NodescaleConfig::parse(&format!("{extra}\n{BASE}")).unwrap();
    build_provider(&config).await.unwrap()
}

fn group(provider: &impl CloudProvider, id: &str) -> Arc<dyn NodeGroup> {
    provider
        .node_groups()
        .into_iter()
        .find(|g| g.id() == id)
        .unwrap()
}

#[tokio::test]
async fn increase_scenario() {
    let provider = provider("").await;
    let workers = group(&provider, "workers");

    workers.increase_size(1).await.unwrap();
    assert_eq!(workers.target_size().unwrap(), 3);

    let err = workers.increase_size(1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(workers.target_size().unwrap(), 3);
}

#[tokio::test]
async fn decrease_scenario() {
    let provider = provider("").await;
    let workers = group(&provider, "workers");

    workers.decrease_target_size(-1).await.unwrap();
    assert_eq!(workers.target_size().unwrap(), 1);

    let err = workers.decrease_target_size(-1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    provider.refresh().await.unwrap();
    assert_eq!(workers.target_size().unwrap(), 1);
    assert_eq!(workers.nodes().unwrap(), vec![Instance::running("worker-0")]);
}

#[tokio::test]
async fn resized_nodes_join_after_refresh() {
    let provider = provider("").await;
    let batch = group(&provider, "batch");

    batch.increase_size(2).await.unwrap();
    provider.refresh().await.unwrap();

    let nodes = batch.nodes().unwrap();
    assert_eq!(nodes.len(), 4);
    assert_eq!(nodes[2].state, InstanceState::Creating);

    let new_node = Node::new("batch-0");
    let owner = provider.node_group_for_node(&new_node).unwrap().unwrap();
    assert_eq!(owner.id(), "batch");

    provider.refresh().await.unwrap();
    assert!(batch.nodes().unwrap().iter().all(|i| i.state == InstanceState::Running));
    assert_eq!(batch.target_size().unwrap(), 4);
}

#[tokio::test]
async fn delete_nodes_contract() {
    let provider = provider("").await;
    let batch = group(&provider, "batch");

    let err = batch.delete_nodes(&[Node::new("worker-0")]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(batch.target_size().unwrap(), 2);

    batch.delete_nodes(&[Node::new("batch-a")]).await.unwrap();
    assert_eq!(batch.target_size().unwrap(), 1);

    provider.refresh().await.unwrap();
    let ids: Vec<_> = batch.nodes().unwrap().into_iter().map(|i| i.id).collect();
    assert_eq!(ids, vec!["batch-b"]);
}

#[tokio::test]
async fn read_only_backend_rejects_node_deletion() {
    let provider = provider("[backend]\nallow_node_deletion = false\n").await;
    let batch = group(&provider, "batch");

    let err = batch.delete_nodes(&[Node::new("batch-a")]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotImplemented);
    assert_eq!(batch.nodes().unwrap().len(), 2);
}

#[tokio::test]
async fn node_mapping_partitions_nodes() {
    let provider = provider("").await;

    for g in provider.node_groups() {
        for instance in g.nodes().unwrap() {
            let owner = provider.node_group_for_node(&Node::new(&instance.id)).unwrap();
            assert_eq!(owner.map(|o| o.id().to_string()), Some(g.id().to_string()));
        }
    }

    let unmanaged = Node::new("control-plane-0");
    assert!(provider.node_group_for_node(&unmanaged).unwrap().is_none());
}

#[tokio::test]
async fn scale_from_zero_group() {
    let provider = provider("").await;
    assert_eq!(provider.available_machine_types().unwrap(), vec!["standard-4", "gpu-8"]);

    let gpu = provider
        .new_node_group(
            "gpu-8",
            BTreeMap::from([("accelerator".to_string(), "a100".to_string())]),
            BTreeMap::new(),
            BTreeMap::new(),
        )
        .unwrap();
    assert!(!gpu.exist());
    assert_eq!(gpu.template_node_info().unwrap().capacity_of("gpu"), 1);

    gpu.create().await.unwrap();
    assert!(gpu.exist());
    assert_eq!(gpu.target_size().unwrap(), 0);

    provider.refresh().await.unwrap();
    let listed = group(&provider, gpu.id());
    assert!(listed.autoprovisioned());

    gpu.delete().await.unwrap();
    provider.refresh().await.unwrap();
    assert_eq!(provider.node_groups().len(), 2);
}

#[tokio::test]
async fn group_creation_disabled() {
    let provider = provider("[backend]\nallow_group_creation = false\n").await;
    let group = provider
        .new_node_group("standard-4", BTreeMap::new(), BTreeMap::new(), BTreeMap::new())
        .unwrap();

    let err = group.create().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotImplemented);
    assert!(!provider.supports(Capability::CreateGroup));
}

#[tokio::test]
async fn pricing_from_catalog() {
    let provider = provider("").await;
    let pricing = provider.pricing().unwrap();

    let price = pricing.node_price("standard-4", Duration::from_secs(3600)).unwrap();
    assert!((price - 0.2).abs() < 1e-9);

    let err = pricing.node_price("gpu-8", Duration::from_secs(3600)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn limiter_comes_from_config() {
    let provider = provider("").await;
    let limiter = provider.resource_limiter();

    assert_eq!(limiter.max(RESOURCE_CPU), 16);
    assert_eq!(limiter.min(RESOURCE_CPU), 0);
    assert_eq!(limiter.max(RESOURCE_MEMORY), u64::MAX);
}

#[tokio::test]
async fn discovery_specs_override_bounds() {
    let provider = provider("[discovery]\nnode_group_specs = [\"0:10:batch\"]\n").await;
    let batch = group(&provider, "batch");

    assert_eq!((batch.min_size(), batch.max_size()), (0, 10));
}

#[tokio::test]
async fn provider_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(BASE.as_bytes()).unwrap();

    let config = NodescaleConfig::from_file(file.path()).unwrap();
    let provider = build_provider(&config).await.unwrap();

    assert_eq!(provider.name(), "static");
    assert_eq!(provider.node_groups().len(), 2);
    provider.cleanup().await.unwrap();
    provider.cleanup().await.unwrap();
}

#[test]
fn invalid_config_is_config_error() {
    let err = NodescaleConfig::parse("[[node_groups]]\nid = \"x\"\nmin_size = 3\nmax_size = 1\n")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[tokio::test]
async fn demo_config_builds() {
    let config =
        NodescaleConfig::parse(include_str!("../../../demos/static-cluster/nodescale.toml")).unwrap();
    let provider = build_provider(&config).await.unwrap();

    assert_eq!(provider.node_groups().len(), 3);
    let general = group(&provider, "general");
    assert_eq!((general.min_size(), general.max_size()), (1, 12));
    assert!(provider.supports(Capability::Pricing));
}
